//! Startup: find-or-create each configured list on the remote side,
//! mirror its authoritative membership and exceptions into the List
//! Registry, and derive the reconciler's rule set and word lists.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use lk_api::ApiClient;
use lk_domain::{Did, ListDescriptor, ListKey, RuntimeConfig};
use lk_matcher::WordList;
use lk_pipeline::{ReconcilerRule, RuleKind};
use lk_registry::{Entry, ListRegistry};

use crate::loaders::{load_exceptions, load_word_file};

pub struct BootstrapOutput {
    pub registry: Arc<ListRegistry>,
    pub rules: Arc<Vec<ReconcilerRule>>,
    pub word_lists: Arc<HashMap<ListKey, WordList>>,
    /// DIDs from every list's authoritative remote membership, to
    /// seed the Schedule queue and force re-evaluation.
    pub seed_dids: Vec<Did>,
}

/// Runs the per-list find-or-create/populate work for every configured
/// list concurrently, then assembles the registry, rule set, and word
/// lists from the results.
pub async fn bootstrap(config: &RuntimeConfig, api: &ApiClient) -> anyhow::Result<BootstrapOutput> {
    let registry = Arc::new(ListRegistry::new());
    let existing = api.list_my_lists().await?;

    let per_list = futures_util::future::join_all(
        config
            .lists
            .iter()
            .map(|descriptor| bootstrap_one_list(descriptor, api, &existing)),
    )
    .await;

    let mut rules = Vec::new();
    let mut word_lists = HashMap::new();
    let mut seed_dids = Vec::new();

    for result in per_list {
        let (descriptor, entries, exceptions) = result?;
        let key = descriptor.key.clone();
        seed_dids.extend(entries.iter().map(|e| e.did.clone()));

        if descriptor.follows_threshold.is_some() {
            let kind = if descriptor.require_unverified_follow_count {
                RuleKind::UnverifiedFollowCount
            } else {
                RuleKind::FollowCount
            };
            rules.push(ReconcilerRule {
                list_key: key.clone(),
                kind,
            });
        }
        if descriptor.followers_threshold.is_some() {
            rules.push(ReconcilerRule {
                list_key: key.clone(),
                kind: RuleKind::FollowerCount,
            });
        }
        if let Some(path) = &descriptor.word_list_path {
            let words = load_word_file(Path::new(path));
            word_lists.insert(key.clone(), WordList::compile(&words));
            rules.push(ReconcilerRule {
                list_key: key.clone(),
                kind: RuleKind::WordList,
            });
        }

        tracing::info!(
            list = %key,
            uri = descriptor.uri.as_deref().unwrap_or(""),
            entries = entries.len(),
            exceptions = exceptions.len(),
            "bootstrap: list registered"
        );
        registry.register(descriptor, entries, exceptions);
    }

    Ok(BootstrapOutput {
        registry,
        rules: Arc::new(rules),
        word_lists: Arc::new(word_lists),
        seed_dids,
    })
}

async fn bootstrap_one_list(
    descriptor: &ListDescriptor,
    api: &ApiClient,
    existing: &[(String, String)],
) -> anyhow::Result<(ListDescriptor, Vec<Entry>, HashSet<Did>)> {
    let uri = match existing.iter().find(|(name, _)| name == &descriptor.name) {
        Some((_, uri)) => uri.clone(),
        None => {
            tracing::info!(list = %descriptor.name, "bootstrap: list not found remotely, creating");
            api.create_list(&descriptor.name, &descriptor.description).await?
        }
    };

    let members = api.list_members(&uri).await?;
    let entries = members
        .into_iter()
        .map(|(did, rkey)| Entry { did, rkey })
        .collect();

    let exceptions = descriptor
        .exceptions_path
        .as_deref()
        .map(|p| load_exceptions(Path::new(p)))
        .unwrap_or_default();

    let mut descriptor = descriptor.clone();
    descriptor.uri = Some(uri);
    Ok((descriptor, entries, exceptions))
}

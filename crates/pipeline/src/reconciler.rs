//! The Reconciler Stage: applies the classification rules to a
//! resolved profile and mediates list add/remove through the registry.

use std::sync::Arc;

use lk_domain::{ListDescriptor, ListKey, Profile};
use lk_matcher::WordList;
use lk_registry::{ListRegistry, MembershipApi};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::queues::{ListaddReceiver, Shared};

/// Default domain suffix used by the unverified-follow-count rule
/// predicate (accounts on the network's own free hosting).
pub const DEFAULT_DOMAIN_SUFFIX: &str = "bsky.social";

pub enum RuleKind {
    FollowCount,
    UnverifiedFollowCount,
    FollowerCount,
    WordList,
}

pub struct ReconcilerRule {
    pub list_key: ListKey,
    pub kind: RuleKind,
}

/// Runs one reconciler worker, popping from the pool-wide shared
/// Listadd queue, until it closes or `shutdown` fires.
pub async fn run_reconciler_worker<A: MembershipApi + 'static>(
    worker_id: usize,
    rx: Shared<ListaddReceiver>,
    registry: Arc<ListRegistry>,
    api: Arc<A>,
    rules: Arc<Vec<ReconcilerRule>>,
    word_lists: Arc<HashMap<ListKey, WordList>>,
    shutdown: CancellationToken,
) {
    loop {
        let profile = tokio::select! {
            item = async { rx.lock().await.recv().await } => match item {
                Some(p) => p,
                None => return,
            },
            _ = shutdown.cancelled() => return,
        };

        if let Err(e) = reconcile(&registry, api.as_ref(), &rules, &word_lists, &profile).await {
            tracing::error!(worker = worker_id, did = %profile.did, error = %e, "reconciler: cycle failed");
        }
    }
}

async fn reconcile(
    registry: &ListRegistry,
    api: &dyn MembershipApi,
    rules: &[ReconcilerRule],
    word_lists: &HashMap<ListKey, WordList>,
    profile: &Profile,
) -> lk_domain::Result<()> {
    for rule in rules {
        let result = match rule.kind {
            RuleKind::FollowCount => {
                apply_threshold_rule(
                    registry,
                    api,
                    &rule.list_key,
                    profile,
                    profile.follows_count,
                    |descriptor| descriptor.follows_threshold,
                )
                .await
            }
            RuleKind::UnverifiedFollowCount => {
                if !has_default_domain_handle(profile) {
                    continue;
                }
                apply_threshold_rule(
                    registry,
                    api,
                    &rule.list_key,
                    profile,
                    profile.follows_count,
                    |descriptor| descriptor.follows_threshold,
                )
                .await
            }
            RuleKind::FollowerCount => {
                let result = apply_threshold_rule(
                    registry,
                    api,
                    &rule.list_key,
                    profile,
                    profile.followers_count,
                    |descriptor| descriptor.followers_threshold,
                )
                .await;
                if let Some(descriptor) = registry.descriptor(&rule.list_key).await {
                    if let Some(limit) = descriptor.followers_threshold {
                        tracing::debug!(
                            did = %profile.did,
                            followers_count = profile.followers_count,
                            followers_limit = limit,
                            "reconciler: followersover100k rule evaluated"
                        );
                    }
                }
                result
            }
            RuleKind::WordList => {
                apply_word_list_rule(registry, api, &rule.list_key, profile, word_lists).await
            }
        };

        if let Err(e) = result {
            if e.is_auth_expired() || e.is_transient() {
                return Err(e);
            }
            tracing::warn!(did = %profile.did, list = %rule.list_key, error = %e, "reconciler: rule failed with client error, continuing to next rule");
        }
    }
    Ok(())
}

fn has_default_domain_handle(profile: &Profile) -> bool {
    profile
        .handle
        .as_deref()
        .map(|h| h.ends_with(DEFAULT_DOMAIN_SUFFIX))
        .unwrap_or(false)
}

async fn apply_threshold_rule(
    registry: &ListRegistry,
    api: &dyn MembershipApi,
    list_key: &ListKey,
    profile: &Profile,
    value: u64,
    threshold_of: impl Fn(&ListDescriptor) -> Option<u64>,
) -> lk_domain::Result<()> {
    let Some(descriptor) = registry.descriptor(list_key).await else {
        return Ok(());
    };
    let Some(threshold) = threshold_of(&descriptor) else {
        return Ok(());
    };

    if registry.is_exception(&profile.did, list_key).await {
        return registry.remove(&profile.did, list_key, api).await;
    }
    if value >= threshold {
        registry.add(&profile.did, list_key, api).await
    } else {
        registry.remove(&profile.did, list_key, api).await
    }
}

async fn apply_word_list_rule(
    registry: &ListRegistry,
    api: &dyn MembershipApi,
    list_key: &ListKey,
    profile: &Profile,
    word_lists: &HashMap<ListKey, WordList>,
) -> lk_domain::Result<()> {
    if registry.is_exception(&profile.did, list_key).await {
        return registry.remove(&profile.did, list_key, api).await;
    }
    if profile.description.is_none() {
        return registry.remove(&profile.did, list_key, api).await;
    }
    let matched = word_lists
        .get(list_key)
        .map(|words| words.matches(profile))
        .unwrap_or(false);
    if matched {
        registry.add(&profile.did, list_key, api).await
    } else {
        registry.remove(&profile.did, list_key, api).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lk_domain::ListDescriptor;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        creates: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                creates: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl MembershipApi for FakeApi {
        async fn create_member(&self, _list_uri: &str, _did: &lk_domain::Did) -> lk_domain::Result<String> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("rkey-{n}"))
        }
        async fn delete_member(&self, _rkey: &str) -> lk_domain::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn descriptor(key: &str, follows: Option<u64>, followers: Option<u64>) -> ListDescriptor {
        ListDescriptor {
            key: ListKey(key.into()),
            name: key.into(),
            description: String::new(),
            uri: Some(format!("at://plc/list/{key}")),
            follows_threshold: follows,
            followers_threshold: followers,
            require_unverified_follow_count: false,
            word_list_path: None,
            exceptions_path: None,
        }
    }

    fn profile(did: &str, handle: &str, follows: u64, followers: u64) -> Profile {
        Profile {
            did: did.into(),
            handle: Some(handle.into()),
            display_name: None,
            description: None,
            follows_count: follows,
            followers_count: followers,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn over_threshold_is_added() {
        let registry = ListRegistry::new();
        registry.register(descriptor("over5k", Some(5000), None), Vec::new(), HashSet::new());
        let api = FakeApi::new();
        let key = ListKey("over5k".into());
        let p = profile("did:plc:a", "a.bsky.social", 6000, 0);

        apply_threshold_rule(&registry, &api, &key, &p, p.follows_count, |d| d.follows_threshold)
            .await
            .unwrap();

        assert!(registry.present(&p.did, &key).await);
        assert_eq!(api.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn under_threshold_is_removed_if_present() {
        let registry = ListRegistry::new();
        registry.register(descriptor("over5k", Some(5000), None), Vec::new(), HashSet::new());
        let api = FakeApi::new();
        let key = ListKey("over5k".into());
        let high = profile("did:plc:a", "a.bsky.social", 6000, 0);
        registry.add(&high.did, &key, &api).await.unwrap();

        let now_low = profile("did:plc:a", "a.bsky.social", 100, 0);
        apply_threshold_rule(
            &registry,
            &api,
            &key,
            &now_low,
            now_low.follows_count,
            |d| d.follows_threshold,
        )
        .await
        .unwrap();

        assert!(!registry.present(&now_low.did, &key).await);
    }

    #[tokio::test]
    async fn exception_dominates_threshold() {
        let registry = ListRegistry::new();
        let mut exceptions = HashSet::new();
        let did: lk_domain::Did = "did:plc:z".into();
        exceptions.insert(did.clone());
        registry.register(descriptor("over5k", Some(5000), None), Vec::new(), exceptions);
        let api = FakeApi::new();
        let key = ListKey("over5k".into());
        let p = profile("did:plc:z", "z.bsky.social", 50000, 0);

        apply_threshold_rule(&registry, &api, &key, &p, p.follows_count, |d| d.follows_threshold)
            .await
            .unwrap();

        assert!(!registry.present(&did, &key).await);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let registry = ListRegistry::new();
        registry.register(descriptor("over5k", Some(5000), None), Vec::new(), HashSet::new());
        let api = FakeApi::new();
        let rules = vec![ReconcilerRule {
            list_key: ListKey("over5k".into()),
            kind: RuleKind::FollowCount,
        }];
        let word_lists = HashMap::new();
        let p = profile("did:plc:a", "a.bsky.social", 6000, 0);

        reconcile(&registry, &api, &rules, &word_lists, &p).await.unwrap();
        reconcile(&registry, &api, &rules, &word_lists, &p).await.unwrap();

        assert_eq!(api.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unverified_rule_skips_non_default_domain_handles() {
        let registry = ListRegistry::new();
        registry.register(
            descriptor("unverified5k", Some(5000), None),
            Vec::new(),
            HashSet::new(),
        );
        let api = FakeApi::new();
        let rules = vec![ReconcilerRule {
            list_key: ListKey("unverified5k".into()),
            kind: RuleKind::UnverifiedFollowCount,
        }];
        let word_lists = HashMap::new();
        let p = profile("did:plc:custom", "someone.example.com", 50000, 0);

        reconcile(&registry, &api, &rules, &word_lists, &p).await.unwrap();

        assert_eq!(api.creates.load(Ordering::SeqCst), 0);
    }
}

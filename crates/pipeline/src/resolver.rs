//! The Resolver Stage: batches DIDs, fetches profiles from the remote
//! API, writes them to the cache, and forwards them to the reconciler.

use std::sync::Arc;

use lk_api::ApiClient;
use lk_cache::Cache;
use lk_domain::{Did, Error};
use lk_registry::ListRegistry;
use tokio_util::sync::CancellationToken;

use crate::queues::{drain_unique_up_to, ListaddSender, QueryReceiver, QuerySender, Shared};
use crate::scheduler::SchedulerConfig;

const BATCH_SIZE: usize = 25;

/// Runs one resolver worker, draining batches from the pool-wide
/// shared Query queue, until it closes or `shutdown` fires.
pub async fn run_resolver_worker(
    worker_id: usize,
    rx: Shared<QueryReceiver>,
    cache: Arc<Cache>,
    registry: Arc<ListRegistry>,
    api: Arc<ApiClient>,
    listadd_tx: ListaddSender,
    query_tx: QuerySender,
    config: Arc<SchedulerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let batch = tokio::select! {
            batch = async {
                let mut guard = rx.lock().await;
                drain_unique_up_to(&mut guard, BATCH_SIZE, |d: &Did| d.clone()).await
            } => batch,
            _ = shutdown.cancelled() => return,
        };
        if batch.is_empty() {
            // Sender side closed with nothing left to deliver.
            return;
        }

        // Re-check freshness: a sibling worker may have resolved one of
        // these DIDs since it was enqueued.
        let now = chrono::Utc::now();
        let mut still_pending = Vec::with_capacity(batch.len());
        for did in batch {
            match cache.skip_fetch(&did, now, config.cache_life, config.expire_enabled) {
                Ok(Some(profile)) if profile.has_handle() => {
                    let _ = listadd_tx.send(profile);
                }
                _ => still_pending.push(did),
            }
        }
        if still_pending.is_empty() {
            continue;
        }

        match api.get_profiles(&still_pending).await {
            Ok(profiles) => {
                for mut profile in profiles {
                    profile.cached_at = chrono::Utc::now();
                    if let Err(e) = cache.put(&profile) {
                        tracing::error!(worker = worker_id, did = %profile.did, error = %e, "resolver: cache write failed");
                        continue;
                    }
                    let _ = listadd_tx.send(profile);
                }
            }
            Err(Error::TerminalAccount { reason, .. }) => {
                // The batch call doesn't tell us which DID(s) triggered
                // this; fall back to resolving the batch one at a time
                // so terminal accounts can be identified and the rest
                // still make progress.
                tracing::warn!(worker = worker_id, reason = %reason, "resolver: batch hit a terminal account, falling back to per-DID resolve");
                for did in &still_pending {
                    resolve_one(worker_id, did, &cache, &registry, &api, &listadd_tx).await;
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(worker = worker_id, error = %e, count = still_pending.len(), "resolver: transient error after retries, requeueing batch");
                for did in still_pending {
                    let _ = query_tx.send(did);
                }
            }
            Err(e) => {
                tracing::error!(worker = worker_id, error = %e, "resolver: batch resolve failed");
            }
        }
    }
}

async fn resolve_one(
    worker_id: usize,
    did: &Did,
    cache: &Arc<Cache>,
    registry: &Arc<ListRegistry>,
    api: &Arc<ApiClient>,
    listadd_tx: &ListaddSender,
) {
    match api.get_profile(did).await {
        Ok(mut profile) => {
            profile.cached_at = chrono::Utc::now();
            if let Err(e) = cache.put(&profile) {
                tracing::error!(worker = worker_id, did = %did, error = %e, "resolver: cache write failed");
                return;
            }
            let _ = listadd_tx.send(profile);
        }
        Err(Error::TerminalAccount { reason, .. }) => {
            tracing::info!(worker = worker_id, did = %did, reason = %reason, "resolver: terminal account, removing from all lists and cache");
            if let Err(e) = registry.remove_from_all(did, api.as_ref()).await {
                tracing::error!(worker = worker_id, did = %did, error = %e, "resolver: failed to remove terminal account from all lists");
            }
            if let Err(e) = cache.delete(did) {
                tracing::error!(worker = worker_id, did = %did, error = %e, "resolver: failed to delete terminal account from cache");
            }
        }
        Err(e) => {
            tracing::error!(worker = worker_id, did = %did, error = %e, "resolver: per-did resolve failed");
        }
    }
}

//! The Scheduler Stage: decides whether an observed DID can skip a
//! remote resolve because a fresh profile is already cached.

use std::sync::Arc;
use std::time::Duration;

use lk_cache::Cache;
use tokio_util::sync::CancellationToken;

use crate::queues::{ListaddSender, QuerySender, ScheduleReceiver, Shared};

/// Cache freshness policy shared by the Scheduler and Resolver stages,
/// so both apply the same cache-life/expiry rule to the same cache.
pub struct SchedulerConfig {
    pub cache_life: Duration,
    pub expire_enabled: bool,
}

/// Runs one scheduler worker, popping from the pool-wide shared
/// Schedule queue, until it closes or `shutdown` fires.
pub async fn run_scheduler_worker(
    worker_id: usize,
    rx: Shared<ScheduleReceiver>,
    cache: Arc<Cache>,
    query_tx: QuerySender,
    listadd_tx: ListaddSender,
    config: Arc<SchedulerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        let did = tokio::select! {
            item = async { rx.lock().await.recv().await } => match item {
                Some(did) => did,
                None => return,
            },
            _ = shutdown.cancelled() => return,
        };

        let now = chrono::Utc::now();
        let cached = cache.skip_fetch(&did, now, config.cache_life, config.expire_enabled);
        match cached {
            Ok(Some(profile)) if profile.has_handle() => {
                if listadd_tx.send(profile).is_err() {
                    tracing::warn!(worker = worker_id, did = %did, "scheduler: listadd queue closed");
                }
            }
            Ok(Some(_profile)) => {
                tracing::error!(worker = worker_id, did = %did, "scheduler: fresh profile missing handle, dropping");
            }
            Ok(None) => {
                if query_tx.send(did.clone()).is_err() {
                    tracing::warn!(worker = worker_id, did = %did, "scheduler: query queue closed");
                }
            }
            Err(e) => {
                tracing::error!(worker = worker_id, did = %did, error = %e, "scheduler: cache error, routing to query");
                let _ = query_tx.send(did);
            }
        }
    }
}

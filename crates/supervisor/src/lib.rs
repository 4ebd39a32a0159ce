//! `lk-supervisor` — owns every worker pool's slots, scans them for
//! dead workers on a health tick, logs queue-depth telemetry, runs
//! periodic query-queue compaction, and drives graceful shutdown.
//!
//! Grounded on the teacher's `main.rs` periodic-task pattern: a
//! `tokio::time::interval` loop per concern (session flush, process
//! cleanup, stale-node pruning there; health scan, telemetry,
//! compaction here), all cooperatively cancelled by one shared token.

use std::sync::Arc;
use std::time::Duration;

use lk_cache::Cache;
use lk_pipeline::queues::{compact_query_queue, QuerySender, Shared};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A named set of worker slots, each independently respawnable.
pub struct WorkerPool {
    name: &'static str,
    slots: Vec<Option<JoinHandle<()>>>,
    spawn: Arc<dyn Fn(usize) -> JoinHandle<()> + Send + Sync>,
}

impl WorkerPool {
    /// Spawns `size` workers immediately using `spawn(slot_index)`.
    pub fn new(
        name: &'static str,
        size: usize,
        spawn: impl Fn(usize) -> JoinHandle<()> + Send + Sync + 'static,
    ) -> Self {
        let spawn: Arc<dyn Fn(usize) -> JoinHandle<()> + Send + Sync> = Arc::new(spawn);
        let slots = (0..size).map(|i| Some(spawn(i))).collect();
        Self { name, slots, spawn }
    }

    fn scan_and_respawn(&mut self) {
        for (slot_id, slot) in self.slots.iter_mut().enumerate() {
            let dead = match slot {
                Some(handle) => handle.is_finished(),
                None => true,
            };
            if dead {
                tracing::warn!(pool = self.name, slot = slot_id, "supervisor: worker slot dead, respawning");
                *slot = Some((self.spawn)(slot_id));
            }
        }
    }

    async fn shutdown(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                    tracing::warn!(pool = self.name, "supervisor: worker did not exit within shutdown timeout");
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Queue handles the supervisor needs for telemetry and compaction.
/// Senders are cheap to clone and carry the shared depth counter;
/// `query_rx` is the pool-wide shared receiver, locked briefly during
/// compaction so resolver workers are never starved for long.
pub struct QueueHandles {
    pub schedule_tx: lk_pipeline::queues::ScheduleSender,
    pub query_tx: QuerySender,
    pub query_rx: Shared<lk_pipeline::queues::QueryReceiver>,
    pub listadd_tx: lk_pipeline::queues::ListaddSender,
}

pub struct SupervisorConfig {
    pub health_scan_interval: Duration,
    pub telemetry_interval: Duration,
    pub compaction_interval: Duration,
    /// Compaction only runs when Schedule depth is below this and
    /// Query depth exceeds `compaction_watermark`.
    pub schedule_quiet_threshold: usize,
    pub compaction_watermark: f64,
}

pub struct Supervisor {
    pools: Vec<WorkerPool>,
    queues: QueueHandles,
    cache: Arc<Cache>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        pools: Vec<WorkerPool>,
        queues: QueueHandles,
        cache: Arc<Cache>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pools,
            queues,
            cache,
            config,
            shutdown,
        }
    }

    /// Runs the three periodic ticks until `shutdown` fires, then
    /// joins every worker slot and closes the cache.
    pub async fn run(mut self) {
        let mut health = tokio::time::interval(self.config.health_scan_interval);
        let mut telemetry = tokio::time::interval(self.config.telemetry_interval);
        let mut compaction = tokio::time::interval(self.config.compaction_interval);

        loop {
            tokio::select! {
                _ = health.tick() => self.scan_health(),
                _ = telemetry.tick() => self.log_telemetry(),
                _ = compaction.tick() => self.maybe_compact().await,
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.shutdown_all().await;
    }

    fn scan_health(&mut self) {
        for pool in &mut self.pools {
            pool.scan_and_respawn();
        }
    }

    fn log_telemetry(&self) {
        tracing::info!(
            schedule_depth = self.queues.schedule_tx.depth(),
            query_depth = self.queues.query_tx.depth(),
            listadd_depth = self.queues.listadd_tx.depth(),
            "supervisor: queue depths"
        );
    }

    async fn maybe_compact(&self) {
        let schedule_depth = self.queues.schedule_tx.depth();
        let query_depth = self.queues.query_tx.depth();
        if schedule_depth >= self.config.schedule_quiet_threshold {
            return;
        }
        if (query_depth as f64) <= self.config.compaction_watermark {
            return;
        }
        let mut rx = self.queues.query_rx.lock().await;
        let (before, after) = compact_query_queue(&self.queues.query_tx, &mut rx);
        tracing::info!(before, after, "supervisor: compacted query queue");
    }

    async fn shutdown_all(self) {
        tracing::info!("supervisor: shutting down worker pools");
        let Supervisor { mut pools, cache, .. } = self;
        for pool in &mut pools {
            pool.shutdown().await;
        }
        match Arc::try_unwrap(cache) {
            Ok(cache) => {
                if let Err(e) = cache.close() {
                    tracing::error!(error = %e, "supervisor: error closing cache");
                }
            }
            Err(_) => {
                tracing::warn!("supervisor: cache still referenced elsewhere at shutdown, skipping close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn respawns_a_finished_worker() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let mut pool = WorkerPool::new("test", 1, move |_slot| {
            let runs = runs_clone.clone();
            tokio::spawn(async move {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        });
        assert_eq!(pool.len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.scan_and_respawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn compaction_skips_when_schedule_busy() {
        let (schedule_tx, _schedule_rx) = lk_pipeline::queues::schedule_queue();
        let (query_tx, query_rx) = lk_pipeline::queues::query_queue();
        let (listadd_tx, _listadd_rx) = lk_pipeline::queues::listadd_queue();
        for _ in 0..200 {
            schedule_tx.send("did:plc:a".into()).unwrap();
        }
        for did in ["a", "a", "b"] {
            query_tx.send(did.into()).unwrap();
        }
        let query_rx = lk_pipeline::queues::shared(query_rx);
        let sup = Supervisor::new(
            Vec::new(),
            QueueHandles {
                schedule_tx,
                query_tx: query_tx.clone(),
                query_rx,
                listadd_tx,
            },
            Arc::new(dummy_cache()),
            SupervisorConfig {
                health_scan_interval: Duration::from_secs(5),
                telemetry_interval: Duration::from_secs(5),
                compaction_interval: Duration::from_secs(300),
                schedule_quiet_threshold: 100,
                compaction_watermark: 1.0,
            },
            CancellationToken::new(),
        );
        sup.maybe_compact().await;
        assert_eq!(query_tx.depth(), 3);
    }

    #[tokio::test]
    async fn compaction_dedupes_when_quiet_and_over_watermark() {
        let (schedule_tx, _schedule_rx) = lk_pipeline::queues::schedule_queue();
        let (query_tx, query_rx) = lk_pipeline::queues::query_queue();
        let (listadd_tx, _listadd_rx) = lk_pipeline::queues::listadd_queue();
        for did in ["a", "a", "b"] {
            query_tx.send(did.into()).unwrap();
        }
        let query_rx = lk_pipeline::queues::shared(query_rx);
        let sup = Supervisor::new(
            Vec::new(),
            QueueHandles {
                schedule_tx,
                query_tx: query_tx.clone(),
                query_rx,
                listadd_tx,
            },
            Arc::new(dummy_cache()),
            SupervisorConfig {
                health_scan_interval: Duration::from_secs(5),
                telemetry_interval: Duration::from_secs(5),
                compaction_interval: Duration::from_secs(300),
                schedule_quiet_threshold: 100,
                compaction_watermark: 1.0,
            },
            CancellationToken::new(),
        );
        sup.maybe_compact().await;
        assert_eq!(query_tx.depth(), 2);
    }

    fn dummy_cache() -> Cache {
        let dir = tempfile::tempdir().unwrap();
        Cache::open(dir.path().join("cache.db")).unwrap()
    }
}

//! `lk-pipeline` — the three worker-pool stages (Scheduler, Resolver,
//! Reconciler) and the queues connecting them.

pub mod queues;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;

pub use reconciler::{run_reconciler_worker, ReconcilerRule, RuleKind};
pub use resolver::run_resolver_worker;
pub use scheduler::{run_scheduler_worker, SchedulerConfig};

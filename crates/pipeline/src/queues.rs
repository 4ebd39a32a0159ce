//! The three work queues: Schedule, Query, Listadd.
//!
//! Each is a `tokio::sync::mpsc` unbounded channel wrapped with a
//! shared depth counter, since the unbounded channel itself exposes
//! no length — and the supervisor's queue-depth telemetry (and
//! compaction's watermark check) need one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lk_domain::{Did, Profile};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Clone)]
pub struct CountedSender<T> {
    tx: UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> CountedSender<T> {
    pub fn send(&self, item: T) -> Result<(), tokio::sync::mpsc::error::SendError<T>> {
        self.tx.send(item)?;
        self.depth.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

pub struct CountedReceiver<T> {
    rx: UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> CountedReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    pub fn try_recv(&mut self) -> Result<T, tokio::sync::mpsc::error::TryRecvError> {
        let item = self.rx.try_recv()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Ok(item)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

fn counted_channel<T>() -> (CountedSender<T>, CountedReceiver<T>) {
    let (tx, rx) = unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        CountedSender {
            tx,
            depth: depth.clone(),
        },
        CountedReceiver { rx, depth },
    )
}

pub type ScheduleSender = CountedSender<Did>;
pub type ScheduleReceiver = CountedReceiver<Did>;
pub type QuerySender = CountedSender<Did>;
pub type QueryReceiver = CountedReceiver<Did>;
pub type ListaddSender = CountedSender<Profile>;
pub type ListaddReceiver = CountedReceiver<Profile>;

/// A receiver shared by every worker in a pool: each worker locks it
/// only for the duration of a single pop/drain, so draining serializes
/// momentarily but processing the drained items does not.
pub type Shared<T> = Arc<tokio::sync::Mutex<T>>;

pub fn schedule_queue() -> (ScheduleSender, ScheduleReceiver) {
    counted_channel()
}

pub fn query_queue() -> (QuerySender, QueryReceiver) {
    counted_channel()
}

pub fn listadd_queue() -> (ListaddSender, ListaddReceiver) {
    counted_channel()
}

pub fn shared<T>(rx: T) -> Shared<T> {
    Arc::new(tokio::sync::Mutex::new(rx))
}

/// Drain up to `max` unique items from `rx` without blocking. If the
/// queue is empty before any item is collected, blocks for the first
/// item and then drains non-blockingly up to the remaining budget.
pub async fn drain_unique_up_to<T, K>(
    rx: &mut CountedReceiver<T>,
    max: usize,
    key_of: impl Fn(&T) -> K,
) -> Vec<T>
where
    K: std::hash::Hash + Eq,
{
    let mut out = Vec::with_capacity(max);
    let mut seen = std::collections::HashSet::with_capacity(max);

    match rx.recv().await {
        Some(first) => {
            let k = key_of(&first);
            if seen.insert(k) {
                out.push(first);
            }
        }
        None => return out,
    }

    while out.len() < max {
        match rx.try_recv() {
            Ok(item) => {
                let k = key_of(&item);
                if seen.insert(k) {
                    out.push(item);
                }
            }
            Err(_) => break,
        }
    }
    out
}

/// De-duplicate the contents of a query queue in place: drain
/// everything currently buffered, keep one instance per unique DID,
/// and re-enqueue. Used by the supervisor's periodic compaction.
pub fn compact_query_queue(tx: &QuerySender, rx: &mut QueryReceiver) -> (usize, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    let before = rx.depth();
    while let Ok(did) = rx.try_recv() {
        if seen.insert(did.clone()) {
            unique.push(did);
        }
    }
    let after = unique.len();
    for did in unique {
        let _ = tx.send(did);
    }
    (before, after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_up_to_max_and_dedupes() {
        let (tx, mut rx) = query_queue();
        for did in ["a", "a", "b", "c", "d"] {
            tx.send(did.into()).unwrap();
        }
        let batch = drain_unique_up_to(&mut rx, 25, |d: &Did| d.as_str().to_string()).await;
        assert_eq!(batch.len(), 4);
    }

    #[tokio::test]
    async fn respects_max_even_with_more_available() {
        let (tx, mut rx) = query_queue();
        for i in 0..30 {
            tx.send(format!("did:plc:{i}").into()).unwrap();
        }
        let batch = drain_unique_up_to(&mut rx, 25, |d: &Did| d.as_str().to_string()).await;
        assert_eq!(batch.len(), 25);
    }

    #[tokio::test]
    async fn blocks_for_first_item_when_empty() {
        let (tx, mut rx) = query_queue();
        let handle = tokio::spawn(async move {
            drain_unique_up_to(&mut rx, 25, |d: &Did| d.as_str().to_string()).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.send("did:plc:a".into()).unwrap();
        let batch = handle.await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn depth_tracks_outstanding_items() {
        let (tx, mut rx) = query_queue();
        tx.send("did:plc:a".into()).unwrap();
        tx.send("did:plc:b".into()).unwrap();
        assert_eq!(tx.depth(), 2);
        rx.recv().await;
        assert_eq!(rx.depth(), 1);
    }

    #[tokio::test]
    async fn compaction_deduplicates_without_losses() {
        let (tx, mut rx) = query_queue();
        for did in ["a", "a", "b", "a", "c"] {
            tx.send(did.into()).unwrap();
        }
        let (before, after) = compact_query_queue(&tx, &mut rx);
        assert_eq!(before, 5);
        assert_eq!(after, 3);
        assert_eq!(rx.depth(), 3);
    }
}

//! `lk-firehose` — the Firehose Ingestor: a durable websocket consumer
//! that extracts DIDs from repository events and pushes them onto the
//! Schedule queue.

pub mod reconnect;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lk_domain::Did;
use reconnect::ReconnectPolicy;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);
const HEARTBEAT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// A single firehose event, reduced to the fields the core cares
/// about. The wire framing (CBOR-encoded repo commit events) is
/// decoded upstream of this type by whatever transport adapter is
/// compiled in; this crate's contract begins at "here is one event's
/// JSON-shaped envelope".
#[derive(Debug, serde::Deserialize)]
pub struct FirehoseEvent {
    pub did: Option<String>,
    pub repo: Option<String>,
}

impl FirehoseEvent {
    /// Prefer the event-level `did`, falling back to `repo`.
    pub fn extract_did(&self) -> Option<Did> {
        self.did
            .clone()
            .or_else(|| self.repo.clone())
            .map(Did::from)
    }
}

pub struct FirehoseIngestor {
    host: String,
    reconnect: ReconnectPolicy,
}

impl FirehoseIngestor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Run the ingestor until `shutdown` is cancelled, reconnecting
    /// with jittered backoff on every disconnect.
    pub async fn run(&self, schedule_tx: UnboundedSender<Did>, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            tracing::info!(host = %self.host, "firehose: connecting");
            match self.connect_and_run(&schedule_tx, shutdown.clone()).await {
                Ok(()) => {
                    tracing::info!("firehose: disconnected cleanly");
                    attempt = 0;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "firehose: error");
                    attempt += 1;
                }
            }
            if shutdown.is_cancelled() {
                return;
            }
            if self.reconnect.should_give_up(attempt) {
                tracing::error!(attempt, "firehose: giving up after repeated failures");
                return;
            }
            let delay = self.reconnect.delay_for_attempt(attempt);
            tracing::info!(delay_ms = delay.as_millis(), "firehose: reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn connect_and_run(
        &self,
        schedule_tx: &UnboundedSender<Did>,
        shutdown: CancellationToken,
    ) -> Result<(), String> {
        let (ws, _resp) = tokio_tungstenite::connect_async(&self.host)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!("firehose: connected");
        let (mut write, mut read) = ws.split();

        let last_seen = std::sync::Arc::new(tokio::sync::Mutex::new(Instant::now()));
        let heartbeat_shutdown = shutdown.clone();
        let heartbeat_last_seen = last_seen.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_PROBE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let elapsed = heartbeat_last_seen.lock().await.elapsed();
                        if elapsed > HEARTBEAT_TIMEOUT {
                            tracing::warn!(elapsed_secs = elapsed.as_secs(), "firehose: heartbeat timeout");
                            return;
                        }
                    }
                    _ = heartbeat_shutdown.cancelled() => return,
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    heartbeat_task.abort();
                    return Ok(());
                }
                _ = tokio::time::sleep(HEARTBEAT_PROBE_INTERVAL) => {
                    if heartbeat_task.is_finished() {
                        heartbeat_task.abort();
                        return Err("heartbeat timeout".to_string());
                    }
                }
                msg = read.next() => {
                    *last_seen.lock().await = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_bytes(), schedule_tx);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.handle_frame(&bytes, schedule_tx);
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            heartbeat_task.abort();
                            return Ok(());
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            heartbeat_task.abort();
                            return Err(e.to_string());
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, bytes: &[u8], schedule_tx: &UnboundedSender<Did>) {
        let event: FirehoseEvent = match serde_json::from_slice(bytes) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "firehose: dropping unparsable frame");
                return;
            }
        };
        if let Some(did) = event.extract_did() {
            if schedule_tx.send(did).is_err() {
                tracing::warn!("firehose: schedule queue receiver dropped");
            }
        } else {
            tracing::debug!("firehose: event carried no did or repo field");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_did_over_repo() {
        let e = FirehoseEvent {
            did: Some("did:plc:a".into()),
            repo: Some("did:plc:b".into()),
        };
        assert_eq!(e.extract_did().unwrap().to_string(), "did:plc:a");
    }

    #[test]
    fn falls_back_to_repo_when_did_absent() {
        let e = FirehoseEvent {
            did: None,
            repo: Some("did:plc:b".into()),
        };
        assert_eq!(e.extract_did().unwrap().to_string(), "did:plc:b");
    }

    #[test]
    fn no_did_or_repo_yields_none() {
        let e = FirehoseEvent {
            did: None,
            repo: None,
        };
        assert!(e.extract_did().is_none());
    }
}

//! Bounded background pipeline for security events.
//!
//! Audit emission must never block or fail the request that triggered it:
//! `emit` hands the event to a bounded channel and returns immediately. A
//! worker task drains the channel into the configured sink. When the queue
//! is full the event is dropped with a warning rather than stalling a login.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::db::models::SecurityEvent;
use crate::db::Db;
use crate::error::AppError;

pub const EVENT_LOGIN_FAILED: &str = "login_failed";
pub const EVENT_LOGIN_SUCCEEDED: &str = "login_succeeded";
pub const EVENT_ACCOUNT_REGISTERED: &str = "account_registered";
pub const EVENT_PASSWORD_CHANGED: &str = "password_changed";
pub const EVENT_PASSWORD_CHANGE_FAILED: &str = "password_change_failed";
pub const EVENT_AGENT_AUTH_FAILED: &str = "agent_auth_failed";
pub const EVENT_SESSIONS_REVOKED: &str = "sessions_revoked";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: SecurityEvent) -> Result<(), AppError>;
}

/// Appends events to the `security_event` table.
pub struct PgEventSink {
    db: Db,
}

impl PgEventSink {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn append(&self, event: SecurityEvent) -> Result<(), AppError> {
        self.db.insert_security_event(&event).await
    }
}

#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<SecurityEvent>,
}

impl EventQueue {
    /// Spawn the drain worker and return the queue handle. The worker exits
    /// once every sender is dropped and the channel is drained, which is
    /// what tests rely on to observe the full queue contents.
    pub fn start(sink: Arc<dyn EventSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SecurityEvent>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = sink.append(event).await {
                    warn!("failed to append security event: {}", err);
                }
            }
        });

        (Self { tx }, worker)
    }

    /// Non-blocking enqueue. A saturated queue drops the event.
    pub fn emit(&self, event: SecurityEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!("security event dropped: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectorSink {
        collected: Mutex<Vec<SecurityEvent>>,
    }

    #[async_trait]
    impl EventSink for CollectorSink {
        async fn append(&self, event: SecurityEvent) -> Result<(), AppError> {
            self.collected.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_drain_to_sink() {
        let sink = Arc::new(CollectorSink { collected: Mutex::new(Vec::new()) });
        let (queue, worker) = EventQueue::start(sink.clone(), 16);

        queue.emit(SecurityEvent::new(EVENT_LOGIN_FAILED, "a@example.com", None, "bad password"));
        queue.emit(SecurityEvent::new(EVENT_LOGIN_SUCCEEDED, "a@example.com", None, ""));

        // Dropping the last sender lets the worker drain and exit.
        drop(queue);
        worker.await.unwrap();

        let collected = sink.collected.lock().unwrap();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].event_type, EVENT_LOGIN_FAILED);
        assert_eq!(collected[1].event_type, EVENT_LOGIN_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        struct StuckSink;

        #[async_trait]
        impl EventSink for StuckSink {
            async fn append(&self, _event: SecurityEvent) -> Result<(), AppError> {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }

        let (queue, worker) = EventQueue::start(Arc::new(StuckSink), 1);

        // The worker takes the first event and parks on the sink; the second
        // fills the channel; the rest must drop without blocking this task.
        for i in 0..8 {
            queue.emit(SecurityEvent::new(EVENT_LOGIN_FAILED, format!("u{i}"), None, ""));
        }

        worker.abort();
    }
}

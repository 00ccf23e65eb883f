//! Best-effort notification dispatch.
//!
//! Messages are queued in memory and drained by one background worker.
//! Delivery failures are logged and dropped by design: a recipient who
//! blocked the bot, or a transient transport error, must never surface to
//! the request that triggered the message, and the request path never waits
//! on delivery.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const QUEUE_CAPACITY: usize = 256;

/// Delivery backend for outbound messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug)]
struct Outgoing {
    chat_id: i64,
    text: String,
}

/// Handle for queueing outbound messages. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Outgoing>,
}

impl Notifier {
    /// Spawn the background delivery worker and return the queue handle.
    pub fn spawn(sink: Arc<dyn MessageSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Outgoing>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.deliver(msg.chat_id, &msg.text).await {
                    debug!(chat_id = msg.chat_id, error = %e, "notification delivery failed, dropping");
                }
            }
        });

        Self { tx }
    }

    /// Queue a message for one recipient. Never blocks; a full queue drops
    /// the message.
    pub fn notify(&self, chat_id: i64, text: &str) {
        let msg = Outgoing {
            chat_id,
            text: text.to_string(),
        };
        if self.tx.try_send(msg).is_err() {
            debug!(chat_id, "notification queue full, dropping message");
        }
    }

    /// Queue a message for each recipient independently. One recipient's
    /// delivery failure never prevents attempts to the others.
    pub fn broadcast(&self, chat_ids: &[i64], text: &str) {
        for &chat_id in chat_ids {
            self.notify(chat_id, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sink that records every delivery attempt and fails for one chat id.
    struct RecordingSink {
        attempts: Mutex<Vec<i64>>,
        fail_for: Option<i64>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn deliver(&self, chat_id: i64, _text: &str) -> Result<()> {
            self.attempts.lock().unwrap().push(chat_id);
            if self.fail_for == Some(chat_id) {
                return Err(anyhow!("recipient unreachable"));
            }
            Ok(())
        }
    }

    async fn wait_for_attempts(sink: &RecordingSink, expected: usize) -> Vec<i64> {
        for _ in 0..100 {
            {
                let attempts = sink.attempts.lock().unwrap();
                if attempts.len() >= expected {
                    return attempts.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.attempts.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn broadcast_survives_one_failing_recipient() {
        let sink = Arc::new(RecordingSink {
            attempts: Mutex::new(Vec::new()),
            fail_for: Some(2),
        });
        let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

        notifier.broadcast(&[1, 2, 3], "hello");

        let attempts = wait_for_attempts(&sink, 3).await;
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn notify_delivers_text_to_sink() {
        let sink = Arc::new(RecordingSink {
            attempts: Mutex::new(Vec::new()),
            fail_for: None,
        });
        let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

        notifier.notify(42, "ping");

        let attempts = wait_for_attempts(&sink, 1).await;
        assert_eq!(attempts, vec![42]);
    }
}

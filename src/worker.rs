//! Bounded delivery queue between the webhook handler and the assistant.
//!
//! The handler only enqueues; `workers` tasks drain a channel of
//! `capacity` slots. When every slot is taken new deliveries are dropped
//! with a warning instead of piling up.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::app::Responder;
use crate::whatsapp::{process_payload, MessageSender, WebhookPayload};

#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<WebhookPayload>,
}

impl DeliveryQueue {
    /// Spawn the workers. They exit once every queue handle is dropped and
    /// the backlog is drained.
    pub fn start(
        workers: usize,
        capacity: usize,
        responder: Arc<dyn Responder>,
        sender: Arc<dyn MessageSender>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let responder = Arc::clone(&responder);
                let sender = Arc::clone(&sender);
                tokio::spawn(async move {
                    loop {
                        // The lock is released before processing starts.
                        let next = rx.lock().await.recv().await;
                        let Some(payload) = next else { break };
                        let sent =
                            process_payload(&payload, responder.as_ref(), sender.as_ref()).await;
                        tracing::debug!("worker {id}: delivery handled, {sent} replies sent");
                    }
                    tracing::debug!("worker {id}: queue closed");
                })
            })
            .collect();

        (Self { tx }, handles)
    }

    /// Enqueue a delivery without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, payload: WebhookPayload) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("delivery queue full; dropping webhook delivery");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("delivery queue closed; dropping webhook delivery");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::{parse_payload, SendError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Blocks every call until released.
    struct GatedResponder {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Responder for GatedResponder {
        async fn respond(&self, input: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(input.to_string())
        }
    }

    #[derive(Default)]
    struct CountingSender {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl MessageSender for CountingSender {
        async fn send_text(&self, _: &str, _: &str, _: &str) -> Result<(), SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn payload() -> WebhookPayload {
        let body = r#"{"entry":[{"changes":[{"value":{
            "metadata":{"phone_number_id":"P"},
            "messages":[{"from":"1","type":"text","text":{"body":"hi"}}]}}]}]}"#;
        parse_payload(body.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn drains_queue_and_stops_when_closed() {
        let gate = Arc::new(Notify::new());
        let responder = Arc::new(GatedResponder {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let sender = Arc::new(CountingSender::default());
        let (queue, handles) = DeliveryQueue::start(2, 8, responder.clone(), sender.clone());

        for _ in 0..3 {
            assert!(queue.submit(payload()));
        }
        drop(queue);

        // Release responders until all three deliveries are answered.
        while sender.sent.load(Ordering::SeqCst) < 3 {
            gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(responder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_queue_drops_delivery() {
        let gate = Arc::new(Notify::new());
        let responder = Arc::new(GatedResponder {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let sender = Arc::new(CountingSender::default());
        let (queue, _handles) = DeliveryQueue::start(1, 1, responder.clone(), sender);

        // First delivery occupies the single worker.
        assert!(queue.submit(payload()));
        while responder.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // Second fills the one queue slot, third is dropped.
        assert!(queue.submit(payload()));
        assert!(!queue.submit(payload()));
    }
}

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

use super::{
    DeadLetter, DeletionMessage, Delivery, QueueBackend, QueueError, QueueStats, RetryOutcome,
};
use crate::config::QueueConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    InFlight,
    Dead,
}

#[derive(Debug)]
struct Slot {
    id: Uuid,
    message: DeletionMessage,
    status: Status,
    attempts: u32,
    available_at: Instant,
    locked_until: Option<Instant>,
    last_error: Option<String>,
}

impl Slot {
    fn is_ready(&self, now: Instant) -> bool {
        match self.status {
            Status::Pending => self.available_at <= now,
            Status::InFlight => self.locked_until.map(|t| t <= now).unwrap_or(true),
            Status::Dead => false,
        }
    }
}

/// Process-local queue, selected with `QUEUE_BACKEND=memory`
///
/// Messages live only as long as the process.
pub struct InMemoryQueue {
    config: QueueConfig,
    slots: Mutex<Vec<Slot>>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Every message not yet acked or dead-lettered, in enqueue order
    pub async fn outstanding(&self) -> Vec<DeletionMessage> {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|slot| slot.status != Status::Dead)
            .map(|slot| slot.message.clone())
            .collect()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    async fn send(&self, message: &DeletionMessage) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        self.slots.lock().await.push(Slot {
            id,
            message: message.clone(),
            status: Status::Pending,
            attempts: 0,
            available_at: Instant::now(),
            locked_until: None,
            last_error: None,
        });
        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = Instant::now();
        let lease = self.config.visibility_timeout();
        let mut slots = self.slots.lock().await;

        let mut deliveries = Vec::new();
        for slot in slots.iter_mut().filter(|slot| slot.is_ready(now)) {
            if deliveries.len() >= max {
                break;
            }
            if slot.status == Status::InFlight {
                if slot.attempts >= self.config.max_attempts {
                    slot.status = Status::Dead;
                    slot.locked_until = None;
                    slot.last_error = Some(format!("lease expired after {} attempts", slot.attempts));
                    error!(
                        message_id = %slot.id,
                        kind = slot.message.kind(),
                        attempts = slot.attempts,
                        "Deletion message dead-lettered after its last lease expired"
                    );
                    continue;
                }
                warn!(message_id = %slot.id, attempts = slot.attempts, "Lease expired, redelivering");
            }
            slot.status = Status::InFlight;
            slot.locked_until = Some(now + lease);
            slot.attempts += 1;
            deliveries.push(Delivery {
                id: slot.id,
                message: slot.message.clone(),
                attempts: slot.attempts,
            });
        }

        Ok(deliveries)
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        // Acking twice is harmless.
        self.slots.lock().await.retain(|slot| slot.id != id);
        Ok(())
    }

    async fn retry(&self, id: Uuid, error_message: &str) -> Result<RetryOutcome, QueueError> {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .iter_mut()
            .find(|slot| slot.id == id)
            .ok_or(QueueError::UnknownMessage(id))?;

        slot.last_error = Some(error_message.to_string());
        slot.locked_until = None;

        if slot.attempts >= self.config.max_attempts {
            slot.status = Status::Dead;
            error!(
                message_id = %id,
                kind = slot.message.kind(),
                attempts = slot.attempts,
                error = %error_message,
                "Deletion message dead-lettered after max attempts"
            );
            return Ok(RetryOutcome::DeadLettered {
                attempts: slot.attempts,
            });
        }

        slot.status = Status::Pending;
        slot.available_at = Instant::now() + self.config.backoff_for(slot.attempts);
        warn!(
            message_id = %id,
            attempts = slot.attempts,
            max_attempts = self.config.max_attempts,
            error = %error_message,
            "Deletion message failed, will retry"
        );

        Ok(RetryOutcome::Scheduled {
            attempts: slot.attempts,
        })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self
            .slots
            .lock()
            .await
            .iter()
            .filter(|slot| slot.status == Status::Dead)
            .map(|slot| DeadLetter {
                id: slot.id,
                message: Some(slot.message.clone()),
                attempts: slot.attempts,
                last_error: slot.last_error.clone(),
            })
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let slots = self.slots.lock().await;
        let mut stats = QueueStats::default();
        for slot in slots.iter() {
            match slot.status {
                Status::Pending => stats.pending += 1,
                Status::InFlight => stats.in_flight += 1,
                Status::Dead => stats.dead += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imghost_common::types::ImagePaths;
    use std::time::Duration;

    fn message(n: u32) -> DeletionMessage {
        DeletionMessage::DeleteImage {
            image_id: Uuid::new_v4(),
            paths: ImagePaths::original_only(format!("original/{}.png", n)),
        }
    }

    fn queue(max_attempts: u32) -> InMemoryQueue {
        InMemoryQueue::new(QueueConfig {
            max_attempts,
            retry_backoff_secs: 5,
            visibility_timeout_secs: 30,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_claims_in_order() {
        let queue = queue(3);
        for n in 0..3 {
            queue.send(&message(n)).await.unwrap();
        }

        let first = queue.receive(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message.keys(), vec!["original/0.png"]);
        assert!(first.iter().all(|d| d.attempts == 1));

        let second = queue.receive(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message.keys(), vec!["original/2.png"]);

        assert!(queue.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_removes_message() {
        let queue = queue(3);
        queue.send(&message(1)).await.unwrap();
        let delivery = queue.receive(1).await.unwrap().remove(0);

        queue.ack(delivery.id).await.unwrap();
        queue.ack(delivery.id).await.unwrap();

        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backs_off_then_dead_letters() {
        let queue = queue(2);
        queue.send(&message(1)).await.unwrap();

        let first = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(
            queue.retry(first.id, "boom").await.unwrap(),
            RetryOutcome::Scheduled { attempts: 1 }
        );

        // Backoff of 5s hides it.
        assert!(queue.receive(1).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(5)).await;

        let second = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
        assert_eq!(
            queue.retry(second.id, "boom again").await.unwrap(),
            RetryOutcome::DeadLettered { attempts: 2 }
        );

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(queue.receive(1).await.unwrap().is_empty());

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom again"));
        assert_eq!(queue.stats().await.unwrap().dead, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered() {
        let queue = queue(5);
        queue.send(&message(1)).await.unwrap();

        let first = queue.receive(1).await.unwrap().remove(0);
        assert!(queue.receive(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_leases_stop_at_max_attempts() {
        let queue = queue(2);
        queue.send(&message(1)).await.unwrap();
        queue.send(&message(2)).await.unwrap();

        // Neither delivery is acked or retried; the leases just lapse.
        let first = queue.receive(1).await.unwrap().remove(0);
        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        let next = queue.receive(1).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_ne!(next[0].id, first.id);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(queue.receive(10).await.unwrap().iter().all(|d| d.id != first.id));

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, first.id);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("lease expired after 2 attempts"));
    }

    #[tokio::test]
    async fn test_retry_unknown_message() {
        let queue = queue(3);
        assert!(matches!(
            queue.retry(Uuid::new_v4(), "x").await,
            Err(QueueError::UnknownMessage(_))
        ));
    }
}

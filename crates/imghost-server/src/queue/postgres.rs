use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use super::{
    DeadLetter, DeletionMessage, Delivery, QueueBackend, QueueError, QueueStats, RetryOutcome,
};
use crate::config::QueueConfig;

/// Queue stored in the `deletion_queue` table
///
/// Receivers claim rows with `FOR UPDATE SKIP LOCKED`, so several server
/// processes can consume the same table without double-claiming.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    config: QueueConfig,
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct DeadRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    last_error: Option<String>,
}

impl PgQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    async fn bury(&self, id: Uuid, reason: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE deletion_queue
            SET status = 'dead', locked_until = NULL, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for PgQueue {
    #[instrument(skip(self, message), fields(kind = message.kind()))]
    async fn send(&self, message: &DeletionMessage) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(message)?;

        sqlx::query(
            r#"
            INSERT INTO deletion_queue (id, payload, status, attempts, max_attempts, available_at)
            VALUES ($1, $2, 'pending', 0, $3, NOW())
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(self.config.max_attempts as i32)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let buried: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
            UPDATE deletion_queue
            SET status = 'dead',
                locked_until = NULL,
                last_error = 'lease expired after ' || attempts || ' attempts',
                updated_at = NOW()
            WHERE status = 'in_flight' AND locked_until <= NOW() AND attempts >= max_attempts
            RETURNING id, attempts
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for (id, attempts) in buried {
            error!(message_id = %id, attempts, "Deletion message dead-lettered after its last lease expired");
        }

        let rows: Vec<ClaimedRow> = sqlx::query_as(
            r#"
            UPDATE deletion_queue
            SET status = 'in_flight',
                attempts = attempts + 1,
                locked_until = NOW() + make_interval(secs => $2),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM deletion_queue
                WHERE (status = 'pending' AND available_at <= NOW())
                   OR (status = 'in_flight' AND locked_until <= NOW() AND attempts < max_attempts)
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(max as i64)
        .bind(self.config.visibility_timeout().as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<DeletionMessage>(row.payload) {
                Ok(message) => deliveries.push(Delivery {
                    id: row.id,
                    message,
                    attempts: row.attempts.max(0) as u32,
                }),
                Err(e) => {
                    // Redelivery cannot fix a payload we cannot read.
                    error!(message_id = %row.id, error = %e, "Undecodable deletion message, dead-lettering");
                    self.bury(row.id, &format!("undecodable payload: {}", e)).await?;
                },
            }
        }

        Ok(deliveries)
    }

    #[instrument(skip(self))]
    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM deletion_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retry(&self, id: Uuid, error_message: &str) -> Result<RetryOutcome, QueueError> {
        let row: Option<(String, i32)> = sqlx::query_as(
            r#"
            UPDATE deletion_queue
            SET status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'pending' END,
                available_at = NOW()
                    + make_interval(secs => $3 * power(2, LEAST(GREATEST(attempts - 1, 0), 10))),
                locked_until = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status, attempts
            "#,
        )
        .bind(id)
        .bind(error_message)
        .bind(self.config.retry_backoff_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        let (status, attempts) = row.ok_or(QueueError::UnknownMessage(id))?;
        let attempts = attempts.max(0) as u32;

        if status == "dead" {
            error!(
                message_id = %id,
                attempts,
                error = %error_message,
                "Deletion message dead-lettered after max attempts"
            );
            Ok(RetryOutcome::DeadLettered { attempts })
        } else {
            warn!(
                message_id = %id,
                attempts,
                error = %error_message,
                "Deletion message failed, will retry"
            );
            Ok(RetryOutcome::Scheduled { attempts })
        }
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows: Vec<DeadRow> = sqlx::query_as(
            r#"
            SELECT id, payload, attempts, last_error
            FROM deletion_queue
            WHERE status = 'dead'
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetter {
                id: row.id,
                message: serde_json::from_value(row.payload).ok(),
                attempts: row.attempts.max(0) as u32,
                last_error: row.last_error,
            })
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, in_flight, dead): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'in_flight'),
                COUNT(*) FILTER (WHERE status = 'dead')
            FROM deletion_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: pending as u64,
            in_flight: in_flight as u64,
            dead: dead as u64,
        })
    }
}

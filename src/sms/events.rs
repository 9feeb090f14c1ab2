use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Audit row per delivery callback, including the ones that matched no
/// message. Answers "what did the provider tell us, and what did we do
/// with it" without digging through logs.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DeliveryEvent {
    pub id: Uuid,
    pub provider_message_id: String,
    pub reported_status: String,
    pub outcome: String,
    pub payload_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DeliveryEventsRepo {
    pool: PgPool,
}

impl DeliveryEventsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        provider_message_id: &str,
        reported_status: &str,
        outcome: &str,
        payload_json: serde_json::Value,
    ) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_events (provider_message_id, reported_status, outcome, payload_json)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(provider_message_id)
        .bind(reported_status)
        .bind(outcome)
        .bind(payload_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn list_recent(&self, limit: i64) -> anyhow::Result<Vec<DeliveryEvent>> {
        let limit = limit.clamp(1, 500);

        let rows = sqlx::query_as::<_, DeliveryEvent>(
            r#"
            SELECT * FROM delivery_events
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

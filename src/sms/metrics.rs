use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SmsMetrics {
    pub queued: i64,
    pub sending: i64,
    pub sent: i64,
    pub retrying: i64,
    pub failed: i64,
    pub delivered: i64,
    pub not_delivered: i64,
    pub cancelled: i64,

    // last 60s windows
    pub sent_last_60s: i64,
    pub delivered_last_60s: i64,
    pub failed_last_60s: i64,

    pub oldest_queued_age_secs: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub now_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: SmsMetrics,
}

#[derive(Clone)]
pub struct MetricsRepo {
    pool: PgPool,
}

impl MetricsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn snapshot(&self) -> anyhow::Result<SmsMetrics> {
        let metrics = sqlx::query_as::<_, SmsMetrics>(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE status = 'queued')        AS queued,
              COUNT(*) FILTER (WHERE status = 'sending')       AS sending,
              COUNT(*) FILTER (WHERE status = 'sent')          AS sent,
              COUNT(*) FILTER (WHERE status = 'retrying')      AS retrying,
              COUNT(*) FILTER (WHERE status = 'failed')        AS failed,
              COUNT(*) FILTER (WHERE status = 'delivered')     AS delivered,
              COUNT(*) FILTER (WHERE status = 'not_delivered') AS not_delivered,
              COUNT(*) FILTER (WHERE status = 'cancelled')     AS cancelled,
              COUNT(*) FILTER (
                WHERE status = 'sent'
                  AND updated_at >= now() - interval '60 seconds'
              ) AS sent_last_60s,
              COUNT(*) FILTER (
                WHERE status = 'delivered'
                  AND updated_at >= now() - interval '60 seconds'
              ) AS delivered_last_60s,
              COUNT(*) FILTER (
                WHERE status IN ('failed', 'not_delivered')
                  AND updated_at >= now() - interval '60 seconds'
              ) AS failed_last_60s,
              EXTRACT(EPOCH FROM (
                now() - MIN(created_at) FILTER (WHERE status = 'queued')
              ))::float8 AS oldest_queued_age_secs
            FROM sms_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(metrics)
    }
}

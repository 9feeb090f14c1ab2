use crate::sms::model::{NewSms, SmsMessage, SmsStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct SmsRepo {
    pool: PgPool,
}

impl SmsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Enqueue / reads
    // ----------------------------

    pub async fn enqueue(&self, msg: NewSms) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO sms_messages (to_number, body, status, max_retries)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&msg.to_number)
        .bind(&msg.body)
        .bind(SmsStatus::Queued.as_str())
        .bind(msg.max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<SmsMessage>> {
        let row = sqlx::query_as::<_, SmsMessage>("SELECT * FROM sms_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> anyhow::Result<Option<SmsMessage>> {
        let row = sqlx::query_as::<_, SmsMessage>(
            "SELECT * FROM sms_messages WHERE provider_message_id = $1",
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Cursor-paginated list, newest first. Cursor is (created_at, id).
    /// limit is clamped to [1, 500].
    pub async fn list(
        &self,
        status: Option<&str>,
        limit: i64,
        cursor_created_at: Option<DateTime<Utc>>,
        cursor_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<SmsMessage>> {
        let limit = limit.clamp(1, 500);

        let rows = match (status, cursor_created_at, cursor_id) {
            (Some(st), Some(ca), Some(cid)) => {
                sqlx::query_as::<_, SmsMessage>(
                    r#"
                    SELECT * FROM sms_messages
                    WHERE status = $1
                      AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(st)
                .bind(ca)
                .bind(cid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(st), _, _) => {
                sqlx::query_as::<_, SmsMessage>(
                    r#"
                    SELECT * FROM sms_messages
                    WHERE status = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(st)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(ca), Some(cid)) => {
                sqlx::query_as::<_, SmsMessage>(
                    r#"
                    SELECT * FROM sms_messages
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#,
                )
                .bind(ca)
                .bind(cid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, _, _) => {
                sqlx::query_as::<_, SmsMessage>(
                    r#"
                    SELECT * FROM sms_messages
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    // ----------------------------
    // Processor-side transitions
    // ----------------------------

    /// Everything due for a pass: queued + retrying, oldest attempt first.
    /// Ordering by COALESCE(last_attempt_at, created_at) keeps a message
    /// that keeps failing from pushing in front of never-tried ones.
    pub async fn due_batch(&self) -> anyhow::Result<Vec<SmsMessage>> {
        let rows = sqlx::query_as::<_, SmsMessage>(
            r#"
            SELECT * FROM sms_messages
            WHERE status IN ('queued', 'retrying')
            ORDER BY COALESCE(last_attempt_at, created_at) ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Conditional queued/retrying -> sending. Returns false when the row
    /// was moved by someone else in the meantime (e.g. cancelled); the
    /// caller must then skip the message.
    pub async fn mark_sending(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'sending',
                last_attempt_at = now(),
                updated_at = now()
            WHERE id = $1
              AND status IN ('queued', 'retrying')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// sending -> sent, recording the provider's id. The unique index on
    /// provider_message_id makes this the reconciliation join key.
    pub async fn mark_sent(&self, id: Uuid, provider_message_id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'sent',
                provider_message_id = $2,
                last_error = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// sending -> retrying | failed. retry_count is incremented exactly
    /// once per completed attempt and never reset, also across operator
    /// requeues. Returns the resulting status, or None when the row was
    /// not in 'sending' anymore.
    pub async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
    ) -> anyhow::Result<Option<SmsStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE sms_messages
            SET retry_count = retry_count + 1,
                status = CASE
                    WHEN retry_count + 1 >= max_retries THEN 'failed'
                    ELSE 'retrying'
                END,
                failed_at = CASE
                    WHEN retry_count + 1 >= max_retries THEN now()
                    ELSE failed_at
                END,
                last_error = $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'sending'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.as_deref().and_then(SmsStatus::parse))
    }

    /// Recovery sweep: a process that died mid-send leaves rows stuck in
    /// 'sending'. Once last_attempt_at is older than the staleness window
    /// they go back to 'retrying' (no retry_count increment; the attempt
    /// never completed).
    pub async fn recover_stale_sending(&self, stale_secs: i64) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'retrying',
                updated_at = now()
            WHERE status = 'sending'
              AND last_attempt_at IS NOT NULL
              AND last_attempt_at < now() - ($1::bigint * interval '1 second')
            "#,
        )
        .bind(stale_secs)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // Reconciler-side transitions
    // ----------------------------

    /// sent|retrying|failed -> delivered, keyed by the provider's id.
    /// Zero affected rows means duplicate, out-of-order or unmatched; the
    /// caller classifies.
    pub async fn mark_delivered(&self, provider_message_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'delivered',
                delivered_at = now(),
                failed_at = NULL,
                updated_at = now()
            WHERE provider_message_id = $1
              AND status IN ('sent', 'retrying', 'failed')
            "#,
        )
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    /// sent|retrying|failed -> not_delivered.
    pub async fn mark_not_delivered(&self, provider_message_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'not_delivered',
                failed_at = now(),
                updated_at = now()
            WHERE provider_message_id = $1
              AND status IN ('sent', 'retrying', 'failed')
            "#,
        )
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // Operator actions
    // ----------------------------

    /// failed -> queued. retry_count is deliberately preserved.
    pub async fn requeue_failed(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'queued',
                failed_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// queued|retrying -> cancelled. Rows that already reached the
    /// provider cannot be recalled.
    pub async fn cancel(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sms_messages
            SET status = 'cancelled',
                updated_at = now()
            WHERE id = $1
              AND status IN ('queued', 'retrying')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

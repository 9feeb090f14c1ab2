use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Lease name used by the queue processor. One row, whole-system mutual
/// exclusion for "am I allowed to start a pass".
pub const QUEUE_LOCK: &str = "sms_queue";

#[derive(Clone)]
pub struct LockRepo {
    pool: PgPool,
}

impl LockRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically take the named lease, or steal it if the previous
    /// holder's lease has expired (crashed holder). Returns false when a
    /// live holder exists.
    ///
    /// The whole acquire is a single conditional upsert so two racing
    /// callers can never both see success: the DO UPDATE only fires when
    /// the stored lease is expired, and RETURNING yields a row only when
    /// the insert or the update actually happened.
    pub async fn acquire(
        &self,
        name: &str,
        holder: &str,
        lease_secs: i64,
    ) -> anyhow::Result<bool> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO processing_locks (name, locked_by, acquired_at, expires_at)
            VALUES ($1, $2, now(), now() + ($3::bigint * interval '1 second'))
            ON CONFLICT (name) DO UPDATE
            SET locked_by = EXCLUDED.locked_by,
                acquired_at = now(),
                expires_at = EXCLUDED.expires_at
            WHERE processing_locks.expires_at <= now()
            RETURNING locked_by
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Release only our own lease. A holder whose lease was already
    /// stolen after expiry deletes nothing, which is the correct outcome.
    pub async fn release(&self, name: &str, holder: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM processing_locks WHERE name = $1 AND locked_by = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Operator escape hatch (smsctl unlock).
    pub async fn force_release(&self, name: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM processing_locks WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn current(
        &self,
        name: &str,
    ) -> anyhow::Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT locked_by, expires_at FROM processing_locks WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

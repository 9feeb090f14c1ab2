use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use smsflow::sms::provider::{SendOutcome, SmsProvider};
use smsflow::sms::{LockRepo, QueueProcessor, SmsRepo};

/// Connects to TEST_DATABASE_URL, migrates and truncates. Returns None
/// (and the test should return early) when no test database is
/// configured, so the suite is runnable on a bare checkout.
pub async fn try_setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database-backed test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            delivery_events,
            processing_locks,
            sms_messages
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

#[allow(dead_code)]
pub async fn insert_message(pool: &PgPool, to_number: &str, max_retries: i32) -> Uuid {
    insert_message_aged(pool, to_number, max_retries, 0).await
}

/// Insert a queued message with created_at pushed into the past, for
/// ordering assertions.
#[allow(dead_code)]
pub async fn insert_message_aged(
    pool: &PgPool,
    to_number: &str,
    max_retries: i32,
    age_secs: i64,
) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO sms_messages (to_number, body, status, max_retries, created_at)
        VALUES ($1, 'test body', 'queued', $2, now() - ($3::bigint * interval '1 second'))
        RETURNING id
        "#,
    )
    .bind(to_number)
    .bind(max_retries)
    .bind(age_secs)
    .fetch_one(pool)
    .await
    .expect("failed to insert message")
}

/// Insert a row in an arbitrary lifecycle state, for webhook and
/// recovery scenarios.
#[allow(dead_code)]
pub async fn insert_message_in_state(
    pool: &PgPool,
    to_number: &str,
    status: &str,
    provider_message_id: Option<&str>,
) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO sms_messages (to_number, body, status, max_retries, provider_message_id)
        VALUES ($1, 'test body', $2, 3, $3)
        RETURNING id
        "#,
    )
    .bind(to_number)
    .bind(status)
    .bind(provider_message_id)
    .fetch_one(pool)
    .await
    .expect("failed to insert message in state")
}

#[allow(dead_code)]
pub async fn get_status_and_retries(pool: &PgPool, id: Uuid) -> (String, i32) {
    sqlx::query_as::<_, (String, i32)>("SELECT status, retry_count FROM sms_messages WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("failed to read message row")
}

#[allow(dead_code)]
pub fn make_processor(pool: &PgPool, provider: Arc<dyn SmsProvider>) -> QueueProcessor {
    QueueProcessor::new(
        SmsRepo::new(pool.clone()),
        LockRepo::new(pool.clone()),
        provider,
        "test-worker".to_string(),
        30,
        120,
    )
}

// ----------------------------
// Provider test doubles
// ----------------------------

/// Accepts everything, records the order numbers were sent in.
#[allow(dead_code)]
pub struct RecordingProvider {
    pub sent_to: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent_to: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SmsProvider for RecordingProvider {
    async fn send(&self, to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        self.sent_to.lock().unwrap().push(to_number.to_string());
        Ok(SendOutcome::Accepted {
            provider_message_id: format!("pm-{}", Uuid::new_v4()),
        })
    }
}

/// Every call fails at the transport level.
#[allow(dead_code)]
pub struct FailingProvider;

#[async_trait]
impl SmsProvider for FailingProvider {
    async fn send(&self, _to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        anyhow::bail!("simulated connect timeout")
    }
}

/// Every call is a synchronous gateway rejection.
#[allow(dead_code)]
pub struct RejectingProvider;

#[async_trait]
impl SmsProvider for RejectingProvider {
    async fn send(&self, _to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        Ok(SendOutcome::Rejected {
            reason: "blocked recipient".to_string(),
        })
    }
}

/// Fails for one specific number, accepts the rest.
#[allow(dead_code)]
pub struct FailNumberProvider {
    pub bad_number: String,
}

#[async_trait]
impl SmsProvider for FailNumberProvider {
    async fn send(&self, to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        if to_number == self.bad_number {
            anyhow::bail!("simulated gateway outage for {to_number}")
        }
        Ok(SendOutcome::Accepted {
            provider_message_id: format!("pm-{}", Uuid::new_v4()),
        })
    }
}

/// Accepts after a delay, to hold the processing lock long enough for a
/// racing pass to observe contention. Counts calls.
#[allow(dead_code)]
pub struct SlowProvider {
    pub delay: Duration,
    pub calls: AtomicU64,
}

#[allow(dead_code)]
impl SlowProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl SmsProvider for SlowProvider {
    async fn send(&self, _to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(SendOutcome::Accepted {
            provider_message_id: format!("pm-{}", Uuid::new_v4()),
        })
    }
}

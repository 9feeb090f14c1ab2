use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use uuid::Uuid;

use smsflow::sms::events::DeliveryEventsRepo;
use smsflow::sms::lock::QUEUE_LOCK;
use smsflow::sms::{LockRepo, NewSms, SmsRepo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "smsctl <command>\n\
             Commands:\n\
             - reset\n\
             - seed <n>\n\
             - counts\n\
             - show <message_id>\n\
             - events [limit]\n\
             - unlock\n\
             \n\
             Uses DATABASE_URL or TEST_DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    let _ = dotenvy::dotenv();
    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .expect("DATABASE_URL or TEST_DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    match args[1].as_str() {
        "reset" => reset(&pool).await?,
        "seed" => {
            let n: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&pool, n).await?;
        }
        "counts" => show_counts(&pool).await?,
        "show" => {
            let id = args.get(2).expect("usage: smsctl show <message_id>");
            let message_id: Uuid = id.parse()?;
            show_message(&pool, message_id).await?;
        }
        "events" => {
            let limit: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(20);
            show_events(&pool, limit).await?;
        }
        "unlock" => unlock(&pool).await?,
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            delivery_events,
            processing_locks,
            sms_messages
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(pool: &PgPool, n: i64) -> anyhow::Result<()> {
    let repo = SmsRepo::new(pool.clone());

    for i in 0..n {
        let id = repo
            .enqueue(NewSms {
                to_number: format!("+3160000{:04}", i),
                body: format!("Your parcel pickup is scheduled (seed {i})."),
                max_retries: 3,
            })
            .await?;
        println!("+ enqueued message id={id}");
    }

    Ok(())
}

async fn show_counts(pool: &PgPool) -> anyhow::Result<()> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*)
        FROM sms_messages
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("no messages");
    }
    for (status, count) in rows {
        println!("{status:<14} {count}");
    }

    let lock = LockRepo::new(pool.clone()).current(QUEUE_LOCK).await?;
    match lock {
        Some((holder, expires_at)) => {
            println!("lock: held by {holder} until {expires_at}")
        }
        None => println!("lock: free"),
    }

    Ok(())
}

async fn show_message(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    let repo = SmsRepo::new(pool.clone());

    match repo.get(id).await? {
        Some(m) => {
            println!(
                "id={} to={} status={} retries={}/{} provider_message_id={:?}",
                m.id, m.to_number, m.status, m.retry_count, m.max_retries, m.provider_message_id
            );
            println!(
                "created={} last_attempt={:?} delivered={:?} failed={:?}",
                m.created_at, m.last_attempt_at, m.delivered_at, m.failed_at
            );
            if let Some(err) = m.last_error {
                println!("last_error: {err}");
            }
        }
        None => println!("message not found"),
    }

    Ok(())
}

async fn show_events(pool: &PgPool, limit: i64) -> anyhow::Result<()> {
    let events = DeliveryEventsRepo::new(pool.clone()).list_recent(limit).await?;

    for e in events {
        println!(
            "{} | {} | reported={} outcome={}",
            e.created_at.to_rfc3339(),
            e.provider_message_id,
            e.reported_status,
            e.outcome
        );
    }

    Ok(())
}

async fn unlock(pool: &PgPool) -> anyhow::Result<()> {
    let removed = LockRepo::new(pool.clone()).force_release(QUEUE_LOCK).await?;
    if removed {
        println!("lock released");
    } else {
        println!("lock was not held");
    }
    Ok(())
}

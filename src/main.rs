use std::sync::Arc;
use std::time::Duration;

use smsflow::api::{self, ApiState};
use smsflow::config::Config;
use smsflow::ratelimit::RateLimiter;
use smsflow::sms::events::DeliveryEventsRepo;
use smsflow::sms::metrics::MetricsRepo;
use smsflow::sms::provider::provider_from_config;
use smsflow::sms::{LockRepo, QueueProcessor, Reconciler, SmsRepo};
use smsflow::{db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cfg = Config::from_env()?;
    tracing::info!(
        worker_id = %cfg.worker_id,
        http_addr = %cfg.http_addr,
        interval_secs = cfg.process_interval_secs,
        "smsflow starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let sms = SmsRepo::new(pool.clone());
    let locks = LockRepo::new(pool.clone());
    let events = DeliveryEventsRepo::new(pool.clone());
    let metrics = MetricsRepo::new(pool.clone());
    let provider = provider_from_config(&cfg)?;

    let processor = Arc::new(QueueProcessor::new(
        sms.clone(),
        locks,
        provider,
        cfg.worker_id.clone(),
        cfg.lock_lease_secs,
        cfg.sending_stale_secs,
    ));

    let state = ApiState {
        sms: sms.clone(),
        events: events.clone(),
        metrics,
        reconciler: Reconciler::new(sms, events),
        processor: processor.clone(),
        limiter: Arc::new(RateLimiter::new()),
        cfg: Arc::new(cfg.clone()),
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr).await?;
    tracing::info!(addr = %cfg.http_addr, "http server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "http server exited");
        }
    });

    // Internal scheduler: the cron-like trigger. Lock contention inside
    // process_queue keeps concurrent instances from double-processing,
    // so every instance can run this loop.
    let scheduler = {
        let processor = processor.clone();
        let interval_secs = cfg.process_interval_secs;
        tokio::spawn(async move {
            if interval_secs == 0 {
                tracing::info!("scheduler disabled, passes run only via POST /queue/process");
                std::future::pending::<()>().await;
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let summary = processor.process_queue().await;
                if !summary.success {
                    tracing::error!(
                        error = summary.error.as_deref().unwrap_or("unknown"),
                        "scheduled pass failed"
                    );
                } else if summary.lock_acquired && summary.processed_count > 0 {
                    tracing::info!(processed = summary.processed_count, "scheduled pass done");
                }
            }
        })
    };

    tokio::select! {
        _ = server => tracing::error!("http server task ended"),
        _ = scheduler => tracing::error!("scheduler task ended"),
    }

    Ok(())
}

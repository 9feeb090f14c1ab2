#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub http_addr: String,
    pub api_token: Option<String>,
    pub webhook_secret: String,

    /// Internal scheduler cadence. 0 disables the loop; passes then only
    /// run via POST /queue/process.
    pub process_interval_secs: u64,
    pub lock_lease_secs: i64,
    pub sending_stale_secs: i64,

    pub max_retries: i32,
    pub max_body_chars: usize,

    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_timeout_secs: u64,

    pub enable_simulation: bool,
    pub migrate_on_startup: bool,

    pub trigger_max_per_window: u32,
    pub trigger_window_secs: i64,
    pub send_max_per_window: u32,
    pub send_window_secs: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("SMSFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "smsflow-1".to_string());

        let http_addr = env_or_fallback("SMSFLOW_HTTP_ADDR", "HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let api_token = env_or_fallback("SMSFLOW_API_TOKEN", "API_TOKEN");

        let webhook_secret = env_or_fallback("SMSFLOW_WEBHOOK_SECRET", "WEBHOOK_SECRET")
            .ok_or_else(|| anyhow::anyhow!("SMSFLOW_WEBHOOK_SECRET is missing"))?;

        let process_interval_secs =
            env_or_fallback("SMSFLOW_PROCESS_INTERVAL_SECS", "PROCESS_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30);

        let lock_lease_secs = env_or_fallback("SMSFLOW_LOCK_LEASE_SECS", "LOCK_LEASE_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let sending_stale_secs =
            env_or_fallback("SMSFLOW_SENDING_STALE_SECS", "SENDING_STALE_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(120);

        let max_retries = env_or_fallback("SMSFLOW_MAX_RETRIES", "MAX_RETRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let max_body_chars = env_or_fallback("SMSFLOW_MAX_BODY_CHARS", "MAX_BODY_CHARS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1600);

        let provider_base_url = env_or_fallback("SMSFLOW_PROVIDER_BASE_URL", "PROVIDER_BASE_URL");
        let provider_api_key = env_or_fallback("SMSFLOW_PROVIDER_API_KEY", "PROVIDER_API_KEY");

        let provider_timeout_secs =
            env_or_fallback("SMSFLOW_PROVIDER_TIMEOUT_SECS", "PROVIDER_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(15);

        let enable_simulation = env_bool("SMSFLOW_ENABLE_SIMULATION").unwrap_or(false);
        let migrate_on_startup = env_bool("SMSFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let trigger_max_per_window =
            env_or_fallback("SMSFLOW_TRIGGER_MAX_PER_WINDOW", "TRIGGER_MAX_PER_WINDOW")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10);

        let trigger_window_secs =
            env_or_fallback("SMSFLOW_TRIGGER_WINDOW_SECS", "TRIGGER_WINDOW_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

        let send_max_per_window =
            env_or_fallback("SMSFLOW_SEND_MAX_PER_WINDOW", "SEND_MAX_PER_WINDOW")
                .and_then(|s| s.parse().ok())
                .unwrap_or(8);

        let send_window_secs = env_or_fallback("SMSFLOW_SEND_WINDOW_SECS", "SEND_WINDOW_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        Ok(Self {
            database_url,
            worker_id,
            http_addr,
            api_token,
            webhook_secret,
            process_interval_secs,
            lock_lease_secs,
            sending_stale_secs,
            max_retries,
            max_body_chars,
            provider_base_url,
            provider_api_key,
            provider_timeout_secs,
            enable_simulation,
            migrate_on_startup,
            trigger_max_per_window,
            trigger_window_secs,
            send_max_per_window,
            send_window_secs,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;

/// Synchronous result of handing one message to the gateway. Acceptance
/// only means the provider took custody; actual delivery is confirmed
/// later through the status webhook.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Accepted { provider_message_id: String },
    Rejected { reason: String },
}

/// Seam between the queue processor and the outside world. `Err` is a
/// transport-level failure (timeout, DNS, 5xx); `Rejected` is the
/// gateway explicitly saying no. Both end up on the retry path.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, to_number: &str, body: &str) -> anyhow::Result<SendOutcome>;
}

#[derive(Serialize)]
struct GatewaySendRequest<'a> {
    to: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewaySendResponse {
    api_message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Production client: JSON POST to the gateway's /messages endpoint with
/// an optional bearer key.
pub struct HttpSmsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSmsProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SmsProvider for HttpSmsProvider {
    async fn send(&self, to_number: &str, body: &str) -> anyhow::Result<SendOutcome> {
        let url = format!("{}/messages", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .json(&GatewaySendRequest {
                to: to_number,
                body,
            });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let http_status = resp.status();

        if http_status.is_success() {
            let parsed: GatewaySendResponse = resp.json().await?;
            match parsed.api_message_id {
                Some(id) if !id.trim().is_empty() => Ok(SendOutcome::Accepted {
                    provider_message_id: id,
                }),
                _ => anyhow::bail!("gateway 2xx response without apiMessageId"),
            }
        } else if http_status.is_client_error() {
            // A 4xx is a definitive synchronous rejection, not a transport
            // fault: surface it as Rejected so the reason lands on the row.
            let reason = resp
                .json::<GatewaySendResponse>()
                .await
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("gateway rejected send ({http_status})"));
            Ok(SendOutcome::Rejected { reason })
        } else {
            anyhow::bail!("gateway error {http_status}")
        }
    }
}

/// Stand-in used when no provider URL is configured: accepts everything
/// and fabricates an id, so the pipeline (and the simulate endpoint) can
/// run end-to-end without a live gateway.
pub struct SandboxProvider;

#[async_trait]
impl SmsProvider for SandboxProvider {
    async fn send(&self, to_number: &str, _body: &str) -> anyhow::Result<SendOutcome> {
        let provider_message_id = format!("sandbox-{}", Uuid::new_v4());
        tracing::info!(to = %to_number, id = %provider_message_id, "sandbox send accepted");
        Ok(SendOutcome::Accepted {
            provider_message_id,
        })
    }
}

pub fn provider_from_config(cfg: &Config) -> anyhow::Result<Arc<dyn SmsProvider>> {
    match &cfg.provider_base_url {
        Some(url) => {
            let p = HttpSmsProvider::new(url, cfg.provider_api_key.clone(), cfg.provider_timeout_secs)?;
            Ok(Arc::new(p))
        }
        None => {
            tracing::warn!("no SMSFLOW_PROVIDER_BASE_URL configured, using sandbox provider");
            Ok(Arc::new(SandboxProvider))
        }
    }
}

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::sms::events::DeliveryEventsRepo;
use crate::sms::metrics::{MetricsRepo, MetricsResponse};
use crate::sms::model::NewSms;
use crate::sms::webhook::{parse_callback, CallbackPayload, ReportedStatus, ValidCallback};
use crate::sms::{QueueProcessor, Reconciler, SmsRepo};

pub mod models;

use models::{
    ErrorBody, ListMessagesQuery, ListMessagesResponse, OperatorActionResponse, ProcessResponse,
    SendMessageRequest, SendMessageResponse, SimulateRequest, SimulateResponse, WebhookAck,
};

#[derive(Clone)]
pub struct ApiState {
    pub sms: SmsRepo,
    pub events: DeliveryEventsRepo,
    pub metrics: MetricsRepo,
    pub reconciler: Reconciler,
    pub processor: Arc<QueueProcessor>,
    pub limiter: Arc<RateLimiter>,
    pub cfg: Arc<Config>,
}

pub fn router(state: ApiState) -> Router {
    let mut router = Router::new()
        // Queue trigger (admin, also hit by the internal scheduler's twin loop)
        .route("/queue/process", post(trigger_process))
        // Provider-facing: secret path segment instead of session auth
        .route("/webhooks/sms/:secret", post(sms_webhook))
        // Message administration
        .route("/messages", get(list_messages).post(send_message))
        .route("/messages/:id", get(get_message))
        .route("/messages/:id/requeue", post(requeue_message))
        .route("/messages/:id/cancel", post(cancel_message))
        // Delivery callback audit trail
        .route("/events", get(list_events))
        // Metrics + health
        .route("/metrics", get(metrics))
        .route("/metrics/prom", get(metrics_prom))
        .route("/health", get(health));

    // Test hook into the reconciler; only exists when explicitly enabled.
    if state.cfg.enable_simulation {
        router = router.route("/webhooks/simulate", post(simulate_callback));
    }

    router.with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn internal_err(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("internal error")),
    )
}

/// Bearer-token check for administrative endpoints. Returns the
/// principal used in rate-limit keys. With no token configured the
/// deployment is open (local/dev); production sets SMSFLOW_API_TOKEN.
fn authorize(cfg: &Config, headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(expected) = &cfg.api_token else {
        return Ok("anonymous".to_string());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok("admin".to_string()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("invalid or missing bearer token")),
        )),
    }
}

fn check_rate(
    limiter: &RateLimiter,
    key: &str,
    max_requests: u32,
    window_secs: i64,
) -> Result<(), ApiError> {
    let decision = limiter.check(
        key,
        &RateLimitConfig {
            max_requests,
            window: chrono::Duration::seconds(window_secs),
        },
    );

    if decision.allowed {
        Ok(())
    } else {
        tracing::warn!(key, "rate limit exceeded");
        Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody::new(
                decision
                    .error
                    .unwrap_or_else(|| "rate limit exceeded".to_string()),
            )),
        ))
    }
}

// ----------------------------
// Queue trigger
// ----------------------------

pub async fn trigger_process(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = authorize(&state.cfg, &headers)?;
    check_rate(
        &state.limiter,
        &format!("process_queue:{principal}"),
        state.cfg.trigger_max_per_window,
        state.cfg.trigger_window_secs,
    )?;

    let summary = state.processor.process_queue().await;

    let message = if !summary.success {
        summary
            .error
            .clone()
            .unwrap_or_else(|| "queue processing failed".to_string())
    } else if !summary.lock_acquired {
        "queue processing already in progress".to_string()
    } else {
        format!("processed {} message(s)", summary.processed_count)
    };

    let status = if summary.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((
        status,
        Json(ProcessResponse {
            success: summary.success,
            message,
            processed_count: summary.processed_count,
            lock_acquired: summary.lock_acquired,
        }),
    )
        .into_response())
}

// ----------------------------
// Webhooks
// ----------------------------

/// Provider status callback. Contract with the gateway: validation
/// failures are 400 (malformed payloads never self-correct), everything
/// else is 200 {received:true} even when internal processing fails.
/// Surfacing a 5xx here would only trigger a provider retry storm.
pub async fn sms_webhook(
    State(state): State<ApiState>,
    Path(secret): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if secret != state.cfg.webhook_secret {
        // Wrong secret looks like a missing route, on purpose.
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("not found")),
        )
            .into_response();
    }

    let payload: CallbackPayload = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new("Invalid payload")),
            )
                .into_response();
        }
    };

    let callback = match parse_callback(&payload) {
        Ok(cb) => cb,
        Err(e) => {
            tracing::warn!(error = e.message(), "rejected malformed delivery callback");
            return (StatusCode::BAD_REQUEST, Json(ErrorBody::new(e.message()))).into_response();
        }
    };

    if let Err(e) = state.reconciler.apply(&callback).await {
        tracing::error!(error = %e, "delivery callback processing failed, acknowledging anyway");
    }

    (StatusCode::OK, Json(WebhookAck { received: true })).into_response()
}

/// Synthesizes a delivery callback for a message, bypassing the live
/// gateway. Mounted only when simulation is enabled.
pub async fn simulate_callback(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<SimulateResponse>, ApiError> {
    authorize(&state.cfg, &headers)?;

    let msg = state
        .sms
        .get(req.message_id)
        .await
        .map_err(internal_err)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("message not found")),
        ))?;

    let Some(provider_message_id) = msg.provider_message_id else {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorBody::new(
                "message has no provider message id yet (not sent)",
            )),
        ));
    };

    let callback = ValidCallback {
        provider_message_id,
        status: if req.delivered {
            ReportedStatus::Delivered
        } else {
            ReportedStatus::NotDelivered
        },
    };

    let outcome = state
        .reconciler
        .apply(&callback)
        .await
        .map_err(internal_err)?;

    Ok(Json(SimulateResponse {
        received: true,
        outcome: outcome.as_str().to_string(),
    }))
}

// ----------------------------
// Messages
// ----------------------------

fn validate_phone(to_number: &str) -> Result<(), &'static str> {
    let n = to_number.trim();
    if n.is_empty() {
        return Err("to_number is required");
    }
    if n.len() > 20 {
        return Err("to_number is too long");
    }
    let digits = n.strip_prefix('+').unwrap_or(n);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("to_number must be digits with optional leading +");
    }
    Ok(())
}

pub async fn send_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let principal = authorize(&state.cfg, &headers)?;

    let to_number = req.to_number.trim().to_string();
    if let Err(msg) = validate_phone(&to_number) {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorBody::new(msg))));
    }
    if req.body.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("body is required")),
        ));
    }
    if req.body.chars().count() > state.cfg.max_body_chars {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("body is too long")),
        ));
    }

    // Per-recipient key: one noisy caseworker cannot starve everyone,
    // and the same number cannot be spammed within the window.
    check_rate(
        &state.limiter,
        &format!("send_sms:{principal}:{to_number}"),
        state.cfg.send_max_per_window,
        state.cfg.send_window_secs,
    )?;

    let message_id = state
        .sms
        .enqueue(NewSms {
            to_number,
            body: req.body,
            max_retries: state.cfg.max_retries,
        })
        .await
        .map_err(internal_err)?;

    Ok(Json(SendMessageResponse { message_id }))
}

pub async fn list_messages(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, ApiError> {
    authorize(&state.cfg, &headers)?;

    let items = state
        .sms
        .list(
            q.status.as_deref(),
            q.limit.unwrap_or(100),
            q.cursor_created_at,
            q.cursor_id,
        )
        .await
        .map_err(internal_err)?;

    let (next_cursor_created_at, next_cursor_id) = items
        .last()
        .map(|m| (Some(m.created_at), Some(m.id)))
        .unwrap_or((None, None));

    Ok(Json(ListMessagesResponse {
        items,
        next_cursor_created_at,
        next_cursor_id,
    }))
}

pub async fn get_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    authorize(&state.cfg, &headers)?;

    match state.sms.get(id).await.map_err(internal_err)? {
        Some(msg) => Ok(Json(msg).into_response()),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("message not found")),
        )),
    }
}

pub async fn requeue_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OperatorActionResponse>, ApiError> {
    authorize(&state.cfg, &headers)?;

    if state.sms.requeue_failed(id).await.map_err(internal_err)? {
        tracing::info!(id = %id, "operator requeued failed message");
        Ok(Json(OperatorActionResponse {
            message_id: id,
            status: "queued".to_string(),
        }))
    } else {
        Err((
            StatusCode::CONFLICT,
            Json(ErrorBody::new("only failed messages can be requeued")),
        ))
    }
}

pub async fn cancel_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OperatorActionResponse>, ApiError> {
    authorize(&state.cfg, &headers)?;

    if state.sms.cancel(id).await.map_err(internal_err)? {
        tracing::info!(id = %id, "operator cancelled message");
        Ok(Json(OperatorActionResponse {
            message_id: id,
            status: "cancelled".to_string(),
        }))
    } else {
        Err((
            StatusCode::CONFLICT,
            Json(ErrorBody::new(
                "only queued or retrying messages can be cancelled",
            )),
        ))
    }
}

// ----------------------------
// Delivery events
// ----------------------------

#[derive(Debug, serde::Deserialize)]
pub struct ListEventsQuery {
    pub limit: Option<i64>,
}

pub async fn list_events(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<ListEventsQuery>,
) -> Result<Json<Vec<crate::sms::events::DeliveryEvent>>, ApiError> {
    authorize(&state.cfg, &headers)?;

    let rows = state
        .events
        .list_recent(q.limit.unwrap_or(100))
        .await
        .map_err(internal_err)?;

    Ok(Json(rows))
}

// ----------------------------
// Metrics + health
// ----------------------------

pub async fn metrics(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<MetricsResponse>, ApiError> {
    authorize(&state.cfg, &headers)?;

    let metrics = state.metrics.snapshot().await.map_err(internal_err)?;
    Ok(Json(MetricsResponse {
        now_utc: chrono::Utc::now(),
        metrics,
    }))
}

pub async fn metrics_prom(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(&state.cfg, &headers) {
        return e.into_response();
    }

    // Minimal Prometheus text format (no extra crate needed).
    match state.metrics.snapshot().await {
        Ok(m) => {
            let body = format!(
                concat!(
                    "# HELP smsflow_queue_depth Messages waiting to be sent\n",
                    "# TYPE smsflow_queue_depth gauge\n",
                    "smsflow_queue_depth {}\n",
                    "# HELP smsflow_retrying Messages awaiting a retry pass\n",
                    "# TYPE smsflow_retrying gauge\n",
                    "smsflow_retrying {}\n",
                    "# HELP smsflow_failed Messages that exhausted retries\n",
                    "# TYPE smsflow_failed gauge\n",
                    "smsflow_failed {}\n",
                    "# HELP smsflow_sent_last_60s Messages accepted by the provider in last 60s\n",
                    "# TYPE smsflow_sent_last_60s gauge\n",
                    "smsflow_sent_last_60s {}\n",
                    "# HELP smsflow_delivered_last_60s Delivery confirmations in last 60s\n",
                    "# TYPE smsflow_delivered_last_60s gauge\n",
                    "smsflow_delivered_last_60s {}\n",
                    "# HELP smsflow_oldest_queued_age_secs Age of the oldest queued message\n",
                    "# TYPE smsflow_oldest_queued_age_secs gauge\n",
                    "smsflow_oldest_queued_age_secs {}\n"
                ),
                m.queued,
                m.retrying,
                m.failed,
                m.sent_last_60s,
                m.delivered_last_60s,
                m.oldest_queued_age_secs.unwrap_or(0.0)
            );

            (StatusCode::OK, body).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

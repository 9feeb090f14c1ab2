use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sms::model::SmsMessage;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// The webhook always acknowledges receipt, even when nothing changed.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub message: String,
    pub processed_count: u64,
    pub lock_acquired: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to_number: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub items: Vec<SmsMessage>,
    pub next_cursor_created_at: Option<DateTime<Utc>>,
    pub next_cursor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub message_id: Uuid,
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulateResponse {
    pub received: bool,
    pub outcome: String,
}

#[derive(Debug, Serialize)]
pub struct OperatorActionResponse {
    pub message_id: Uuid,
    pub status: String,
}

use serde::Deserialize;
use serde_json::json;

use crate::sms::events::DeliveryEventsRepo;
use crate::sms::model::SmsStatus;
use crate::sms::repo::SmsRepo;

/// Status callback as the gateway posts it. Unknown extra fields are
/// ignored; the two we validate are apiMessageId and status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(default)]
    pub api_message_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub callback_ref: Option<String>,
}

/// Delivery verdict as reported by the provider. "failed" and
/// "not delivered" are distinct wire values but collapse onto the same
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Delivered,
    Failed,
    NotDelivered,
}

impl ReportedStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(ReportedStatus::Delivered),
            "failed" => Some(ReportedStatus::Failed),
            "not delivered" => Some(ReportedStatus::NotDelivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Delivered => "delivered",
            ReportedStatus::Failed => "failed",
            ReportedStatus::NotDelivered => "not delivered",
        }
    }

    /// The sms_messages status this verdict maps onto.
    pub fn target_status(&self) -> SmsStatus {
        match self {
            ReportedStatus::Delivered => SmsStatus::Delivered,
            ReportedStatus::Failed | ReportedStatus::NotDelivered => SmsStatus::NotDelivered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidCallback {
    pub provider_message_id: String,
    pub status: ReportedStatus,
}

/// Malformed payloads get a 400: they will never self-correct on a
/// provider retry, so rejecting them outright is safe and stops noise.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackError {
    InvalidMessageId,
    InvalidStatus,
}

impl CallbackError {
    pub fn message(&self) -> &'static str {
        match self {
            CallbackError::InvalidMessageId => "Invalid apiMessageId",
            CallbackError::InvalidStatus => "Invalid status",
        }
    }
}

pub fn parse_callback(payload: &CallbackPayload) -> Result<ValidCallback, CallbackError> {
    let provider_message_id = payload
        .api_message_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CallbackError::InvalidMessageId)?;

    let status = payload
        .status
        .as_deref()
        .and_then(ReportedStatus::parse)
        .ok_or(CallbackError::InvalidStatus)?;

    Ok(ValidCallback {
        provider_message_id: provider_message_id.to_string(),
        status,
    })
}

/// What happened to a valid callback. Everything except `Applied` is a
/// no-op on sms_messages; all four are audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    Duplicate,
    OutOfOrder,
    Unmatched,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::OutOfOrder => "out_of_order",
            ReconcileOutcome::Unmatched => "unmatched",
        }
    }
}

/// Applies provider callbacks to the message store, idempotently.
///
/// The conditional update is restricted to sent|retrying|failed, so this
/// writer can never clobber the processor's queued/sending transitions:
/// the two sides touch disjoint transitions and the stale one observes
/// zero affected rows.
#[derive(Clone)]
pub struct Reconciler {
    sms: SmsRepo,
    events: DeliveryEventsRepo,
}

impl Reconciler {
    pub fn new(sms: SmsRepo, events: DeliveryEventsRepo) -> Self {
        Self { sms, events }
    }

    pub async fn apply(&self, cb: &ValidCallback) -> anyhow::Result<ReconcileOutcome> {
        let affected = match cb.status {
            ReportedStatus::Delivered => self.sms.mark_delivered(&cb.provider_message_id).await?,
            ReportedStatus::Failed | ReportedStatus::NotDelivered => {
                self.sms.mark_not_delivered(&cb.provider_message_id).await?
            }
        };

        let outcome = if affected == 1 {
            ReconcileOutcome::Applied
        } else {
            self.classify_noop(cb).await?
        };

        match outcome {
            ReconcileOutcome::Applied => {
                tracing::info!(
                    provider_message_id = %cb.provider_message_id,
                    status = cb.status.as_str(),
                    "delivery status applied"
                );
            }
            other => {
                // Duplicates and strays are expected provider behavior,
                // not faults. Low severity on purpose.
                tracing::debug!(
                    provider_message_id = %cb.provider_message_id,
                    status = cb.status.as_str(),
                    outcome = other.as_str(),
                    "delivery callback ignored"
                );
            }
        }

        self.events
            .record(
                &cb.provider_message_id,
                cb.status.as_str(),
                outcome.as_str(),
                json!({
                    "apiMessageId": cb.provider_message_id,
                    "status": cb.status.as_str(),
                }),
            )
            .await?;

        Ok(outcome)
    }

    /// Zero rows were affected: figure out why, for the audit trail.
    /// A row that is still queued/sending (callback raced ahead of the
    /// processor, or a provider-side id collision) is out-of-order and is
    /// never forced through a transition it has not earned.
    async fn classify_noop(&self, cb: &ValidCallback) -> anyhow::Result<ReconcileOutcome> {
        let row = self
            .sms
            .get_by_provider_message_id(&cb.provider_message_id)
            .await?;

        Ok(match row {
            None => ReconcileOutcome::Unmatched,
            Some(msg) if msg.status == cb.status.target_status().as_str() => {
                ReconcileOutcome::Duplicate
            }
            Some(_) => ReconcileOutcome::OutOfOrder,
        })
    }
}

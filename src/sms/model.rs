use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of one outbound SMS.
///
/// queued -> sending -> sent | retrying | failed
/// retrying -> sending
/// sent | retrying | failed -> delivered | not_delivered   (webhook)
/// queued | retrying -> cancelled                          (operator)
/// failed -> queued                                        (operator requeue)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsStatus {
    Queued,
    Sending,
    Sent,
    Retrying,
    Failed,
    Delivered,
    NotDelivered,
    Cancelled,
}

impl SmsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsStatus::Queued => "queued",
            SmsStatus::Sending => "sending",
            SmsStatus::Sent => "sent",
            SmsStatus::Retrying => "retrying",
            SmsStatus::Failed => "failed",
            SmsStatus::Delivered => "delivered",
            SmsStatus::NotDelivered => "not_delivered",
            SmsStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(SmsStatus::Queued),
            "sending" => Some(SmsStatus::Sending),
            "sent" => Some(SmsStatus::Sent),
            "retrying" => Some(SmsStatus::Retrying),
            "failed" => Some(SmsStatus::Failed),
            "delivered" => Some(SmsStatus::Delivered),
            "not_delivered" => Some(SmsStatus::NotDelivered),
            "cancelled" => Some(SmsStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are immutable once reached. `failed` is terminal
    /// only pending operator action (explicit requeue), so it is not
    /// listed here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SmsStatus::Delivered | SmsStatus::NotDelivered | SmsStatus::Cancelled
        )
    }
}

/// Where a message lands after a failed send attempt, given the retry
/// count AFTER incrementing.
pub fn status_after_failure(retry_count_after: i32, max_retries: i32) -> SmsStatus {
    if retry_count_after >= max_retries {
        SmsStatus::Failed
    } else {
        SmsStatus::Retrying
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SmsMessage {
    pub id: Uuid,
    pub to_number: String,
    pub body: String,
    pub status: String,

    pub retry_count: i32,
    pub max_retries: i32,

    pub provider_message_id: Option<String>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSms {
    pub to_number: String,
    pub body: String,
    pub max_retries: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            SmsStatus::Queued,
            SmsStatus::Sending,
            SmsStatus::Sent,
            SmsStatus::Retrying,
            SmsStatus::Failed,
            SmsStatus::Delivered,
            SmsStatus::NotDelivered,
            SmsStatus::Cancelled,
        ] {
            assert_eq!(SmsStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SmsStatus::parse("bogus"), None);
    }

    #[test]
    fn only_delivery_outcomes_and_cancel_are_terminal() {
        assert!(SmsStatus::Delivered.is_terminal());
        assert!(SmsStatus::NotDelivered.is_terminal());
        assert!(SmsStatus::Cancelled.is_terminal());

        assert!(!SmsStatus::Failed.is_terminal());
        assert!(!SmsStatus::Sent.is_terminal());
        assert!(!SmsStatus::Queued.is_terminal());
    }

    #[test]
    fn failure_retries_until_the_configured_ceiling() {
        assert_eq!(status_after_failure(1, 3), SmsStatus::Retrying);
        assert_eq!(status_after_failure(2, 3), SmsStatus::Retrying);
        assert_eq!(status_after_failure(3, 3), SmsStatus::Failed);
        // Requeued-after-failed messages can exceed the ceiling.
        assert_eq!(status_after_failure(4, 3), SmsStatus::Failed);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification delivery status.
///
/// `Sent` is terminal: a record never leaves it once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// Whether a record in this status may be moved to `next`.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        match self {
            DeliveryStatus::Sent => next == DeliveryStatus::Sent,
            DeliveryStatus::Pending | DeliveryStatus::Failed => true,
        }
    }
}

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Channel {
    #[sqlx(rename = "email")]
    #[serde(rename = "email")]
    Email,
    #[sqlx(rename = "sms")]
    #[serde(rename = "sms")]
    Sms,
    #[sqlx(rename = "in-app")]
    #[serde(rename = "in-app")]
    InApp,
}

/// A persisted notification.
///
/// Payload fields are immutable after creation; the delivery pipeline only
/// reads them and writes `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: i64,
    pub channel: Channel,
    pub message: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A creation request handed to the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i64,
    pub channel: Channel,
    pub message: String,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Sms => write!(f, "sms"),
            Channel::InApp => write!(f, "in-app"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_is_terminal() {
        assert!(DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Sent));
        assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Failed));
        assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Pending));
    }

    #[test]
    fn test_failed_can_be_retried() {
        assert!(DeliveryStatus::Failed.can_transition_to(DeliveryStatus::Sent));
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Failed));
    }

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::InApp).unwrap(), "\"in-app\"");
        assert_eq!(Channel::InApp.to_string(), "in-app");
        let parsed: Channel = serde_json::from_str("\"sms\"").unwrap();
        assert_eq!(parsed, Channel::Sms);
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}

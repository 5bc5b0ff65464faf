//! Delivery job carried on the queue.
//!
//! Wire shape: a mapping with a required string `id` and an optional integer
//! `retries`. Any other keys are kept and written back on re-publish.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::literal;

/// Why a payload could not be turned into a job. All of these are permanent.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("payload is neither JSON nor a literal mapping: {0}")]
    Syntax(String),

    #[error("payload is not a mapping")]
    NotAMapping,

    #[error("payload has no `id`")]
    MissingId,

    #[error("`id` must be a non-empty string")]
    InvalidId,

    #[error("`retries` must be a non-negative integer")]
    InvalidRetries,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    pub notification_id: String,
    /// Outer requeues this job has already been through.
    pub attempt_count: u32,
    extra: Map<String, Value>,
}

impl NotificationJob {
    pub fn new(notification_id: impl Into<String>) -> Self {
        Self {
            notification_id: notification_id.into(),
            attempt_count: 0,
            extra: Map::new(),
        }
    }

    /// Decode a queue payload. JSON is tried first, then the literal form.
    pub fn decode(payload: &[u8]) -> Result<Self, JobError> {
        let text = std::str::from_utf8(payload)?;
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(json_err) => literal::parse(text)
                .map_err(|lit_err| JobError::Syntax(format!("{}; {}", json_err, lit_err)))?,
        };

        let Value::Object(mut fields) = value else {
            return Err(JobError::NotAMapping);
        };

        let notification_id = match fields.remove("id") {
            None | Some(Value::Null) => return Err(JobError::MissingId),
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            Some(_) => return Err(JobError::InvalidId),
        };

        let attempt_count = match fields.remove("retries") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or(JobError::InvalidRetries)?,
            Some(_) => return Err(JobError::InvalidRetries),
        };

        Ok(Self {
            notification_id,
            attempt_count,
            extra: fields,
        })
    }

    /// Encode as JSON. `retries` is omitted on a first-time job.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut fields = self.extra.clone();
        fields.insert("id".to_string(), Value::String(self.notification_id.clone()));
        if self.attempt_count > 0 {
            fields.insert("retries".to_string(), Value::from(self.attempt_count));
        }
        serde_json::to_vec(&Value::Object(fields))
    }

    /// The job to publish when this one is requeued after a fault.
    pub fn requeued(&self) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Fields other than `id` and `retries`.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_minimal() {
        let job = NotificationJob::decode(br#"{"id": "abc123"}"#).unwrap();
        assert_eq!(job.notification_id, "abc123");
        assert_eq!(job.attempt_count, 0);
        assert!(job.extra().is_empty());
    }

    #[test]
    fn test_decode_python_literal_with_retries() {
        let job = NotificationJob::decode(b"{'id': '65f0c0ffee', 'retries': 2}").unwrap();
        assert_eq!(job.notification_id, "65f0c0ffee");
        assert_eq!(job.attempt_count, 2);
    }

    #[test]
    fn test_decode_keeps_extension_fields() {
        let job = NotificationJob::decode(br#"{"id": "x", "trace": "t-1"}"#).unwrap();
        assert_eq!(job.extra().get("trace"), Some(&json!("t-1")));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            NotificationJob::decode(br#"{"user": 1}"#),
            Err(JobError::MissingId)
        ));
        assert!(matches!(
            NotificationJob::decode(br#"{"id": ""}"#),
            Err(JobError::InvalidId)
        ));
        assert!(matches!(
            NotificationJob::decode(br#"{"id": 42}"#),
            Err(JobError::InvalidId)
        ));
        assert!(matches!(
            NotificationJob::decode(br#"{"id": "x", "retries": -1}"#),
            Err(JobError::InvalidRetries)
        ));
        assert!(matches!(
            NotificationJob::decode(br#"["id", "x"]"#),
            Err(JobError::NotAMapping)
        ));
        assert!(matches!(
            NotificationJob::decode(b"not a payload"),
            Err(JobError::Syntax(_))
        ));
        let deep = format!("{{'id': 'x', 'n': {}", "[".repeat(200_000));
        assert!(matches!(
            NotificationJob::decode(deep.as_bytes()),
            Err(JobError::Syntax(_))
        ));
        assert!(matches!(
            NotificationJob::decode(&[0xff, 0xfe]),
            Err(JobError::Encoding(_))
        ));
    }

    #[test]
    fn test_encode_first_attempt_has_no_retries() {
        let bytes = NotificationJob::new("abc").encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"id": "abc"}));
    }

    #[test]
    fn test_requeued_increments_and_preserves_fields() {
        let job = NotificationJob::decode(br#"{"id": "x", "trace": "t-1", "retries": 1}"#).unwrap();
        let next = job.requeued();
        assert_eq!(next.attempt_count, 2);

        let value: Value = serde_json::from_slice(&next.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"id": "x", "trace": "t-1", "retries": 2}));
    }
}

//! The JSON envelope every remote call answers with.
//!
//! The service is asked to report errors as HTTP 200 with an in-body error code, so success
//! or failure is decided by parsing this envelope rather than by the HTTP status alone.

use serde_json::Value;

use crate::OpError;

/// Error name recorded when the response body is not valid JSON.
pub const PARSE_FAILURE_NAME: &str = "Failed to parse response";

/// Envelope-level error codes produced locally (never by the service itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
    Success,
    /// The native HTTP call failed before a response body was available.
    ConnectionError,
    /// The response arrived but could not be parsed as JSON.
    PartialFailure,
}

impl ServiceErrorCode {
    #[must_use]
    pub const fn value(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::ConnectionError => 2,
            Self::PartialFailure => 1424,
        }
    }
}

/// Parsed (or synthesized) response envelope.
///
/// Field names follow the wire keys: `code`, `status`, `data`, `error`, `errorCode`,
/// `errorMessage`, `errorDetails`. Missing keys read as `0`, `""` or `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorEnvelope {
    pub http_code: i64,
    pub http_status: String,
    pub data: Value,
    pub error_name: String,
    pub error_code: i64,
    pub error_message: String,
    pub error_details: Value,
}

impl ErrorEnvelope {
    /// Build the envelope for a finished HTTP exchange.
    ///
    /// A body that parses as JSON populates the recognized fields. Anything else yields a
    /// synthesized partial-failure envelope carrying the raw HTTP status, the raw body, and the
    /// parser diagnostic as the message.
    #[must_use]
    pub fn from_response(http_status: u16, body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(json) => Self::from_json(&json),
            Err(e) => Self {
                http_code: i64::from(http_status),
                http_status: body.to_string(),
                data: Value::Null,
                error_name: PARSE_FAILURE_NAME.to_string(),
                error_code: ServiceErrorCode::PartialFailure.value(),
                error_message: e.to_string(),
                error_details: Value::Null,
            },
        }
    }

    #[must_use]
    pub fn from_json(json: &Value) -> Self {
        let int = |key: &str| json.get(key).and_then(Value::as_i64).unwrap_or(0);
        let text = |key: &str| {
            json.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let raw = |key: &str| json.get(key).cloned().unwrap_or(Value::Null);

        Self {
            http_code: int("code"),
            http_status: text("status"),
            data: raw("data"),
            error_name: text("error"),
            error_code: int("errorCode"),
            error_message: text("errorMessage"),
            error_details: raw("errorDetails"),
        }
    }

    /// Envelope for a call that never produced a response.
    #[must_use]
    pub fn connection_failure(message: impl Into<String>) -> Self {
        Self {
            error_name: "ConnectionError".to_string(),
            error_code: ServiceErrorCode::ConnectionError.value(),
            error_message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_parse_failure(&self) -> bool {
        self.error_code == ServiceErrorCode::PartialFailure.value()
            && self.error_name == PARSE_FAILURE_NAME
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.http_code == 200 && !self.is_parse_failure()
    }

    /// Classify a received envelope: `None` on success, otherwise the failure category.
    #[must_use]
    pub fn failure(&self) -> Option<OpError> {
        if self.is_parse_failure() {
            return Some(OpError::PartialFailure(self.error_message.clone()));
        }
        if self.http_code != 200 {
            return Some(OpError::Remote {
                http_code: self.http_code,
                error_code: self.error_code,
                name: self.error_name.clone(),
                message: self.error_message.clone(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorEnvelope, PARSE_FAILURE_NAME, ServiceErrorCode};
    use crate::OpError;
    use serde_json::json;

    #[test]
    fn success_body_populates_data() {
        let env = ErrorEnvelope::from_response(200, r#"{"code":200,"status":"OK","data":{"X":1}}"#);
        assert_eq!(env.http_code, 200);
        assert_eq!(env.http_status, "OK");
        assert_eq!(env.data, json!({"X": 1}));
        assert!(env.is_success());
        assert_eq!(env.failure(), None);
    }

    #[test]
    fn remote_error_fields_are_read() {
        let body = json!({
            "code": 400,
            "status": "BadRequest",
            "error": "InvalidParams",
            "errorCode": 1000,
            "errorMessage": "Invalid input parameters",
            "errorDetails": {"CustomId": ["required"]}
        })
        .to_string();
        let env = ErrorEnvelope::from_response(200, &body);
        assert_eq!(env.error_name, "InvalidParams");
        assert_eq!(env.error_code, 1000);
        assert_eq!(env.error_details, json!({"CustomId": ["required"]}));
        assert!(matches!(
            env.failure(),
            Some(OpError::Remote {
                http_code: 400,
                error_code: 1000,
                ..
            })
        ));
    }

    #[test]
    fn truncated_body_is_partial_failure_with_diagnostic() {
        let env = ErrorEnvelope::from_response(200, r#"{"code":200,"status":"O"#);
        assert_eq!(env.http_code, 200);
        assert_eq!(env.http_status, r#"{"code":200,"status":"O"#);
        assert_eq!(env.error_code, ServiceErrorCode::PartialFailure.value());
        assert_eq!(env.error_name, PARSE_FAILURE_NAME);
        assert!(env.error_message.contains("EOF"), "{}", env.error_message);
        assert!(!env.is_success());
        match env.failure() {
            Some(OpError::PartialFailure(msg)) => assert_eq!(msg, env.error_message),
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_fields_default() {
        let env = ErrorEnvelope::from_response(200, "{}");
        assert_eq!(env.http_code, 0);
        assert!(env.data.is_null());
        assert!(env.error_name.is_empty());
        assert!(env.failure().is_some());
    }

    #[test]
    fn connection_failure_is_not_a_parse_failure() {
        let env = ErrorEnvelope::connection_failure("connection refused");
        assert!(!env.is_parse_failure());
        assert_eq!(env.error_code, ServiceErrorCode::ConnectionError.value());
    }
}

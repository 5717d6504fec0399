//! Shared types for the backend contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure reported by a backend call
///
/// This is the `error` half of the backend's `{data, error}` responses.
/// `status` is the HTTP status when the failure came from the server and
/// `None` for transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Transport-level failure (no HTTP status)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Build from an error response body
    ///
    /// Understands the auth server shape (`msg`/`error_description`/
    /// `error_code`) and the REST shape (`message`/`code`); anything else
    /// keeps the raw body as the message.
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let field = |names: &[&str]| {
            parsed.as_ref().and_then(|v| {
                names
                    .iter()
                    .find_map(|n| v.get(*n).and_then(Value::as_str).map(str::to_string))
            })
        };

        let message = field(&["message", "msg", "error_description", "error"])
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.to_string()
                }
            });
        let code = field(&["code", "error_code"]).or_else(|| {
            // `error` doubles as a code when a description is present
            parsed
                .as_ref()
                .filter(|v| v.get("error_description").is_some())
                .and_then(|v| v.get("error").and_then(Value::as_str))
                .map(str::to_string)
        });

        Self {
            status: Some(status),
            code,
            message,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError {
            status: e.status().map(|s| s.as_u16()),
            code: None,
            message: e.to_string(),
        }
    }
}

/// Result of a backend call
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A read-state record as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRecord {
    /// Canonical URL (unique key)
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Columns selected for a [`ReadRecord`]
pub const RECORD_COLUMNS: &str = "url,title,domain,status,last_read_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rest_body() {
        let err = ApiError::from_body(
            404,
            r#"{"code":"PGRST202","message":"Could not find the function public.list_recent_reads","details":null,"hint":null}"#,
        );
        assert_eq!(err.status, Some(404));
        assert_eq!(err.code.as_deref(), Some("PGRST202"));
        assert!(err.message.starts_with("Could not find the function"));
    }

    #[test]
    fn test_from_auth_bodies() {
        let legacy = ApiError::from_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(legacy.message, "Invalid login credentials");
        assert_eq!(legacy.code.as_deref(), Some("invalid_grant"));

        let current = ApiError::from_body(
            400,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(current.message, "Invalid login credentials");
        assert_eq!(current.code.as_deref(), Some("invalid_credentials"));
    }

    #[test]
    fn test_from_plain_body() {
        let err = ApiError::from_body(502, "Bad Gateway");
        assert_eq!(err.message, "Bad Gateway");
        assert_eq!(err.code, None);

        assert_eq!(ApiError::from_body(500, "").message, "HTTP 500");
    }

    #[test]
    fn test_record_defaults() {
        let record: ReadRecord =
            serde_json::from_str(r#"{"url":"https://example.com/a"}"#).unwrap();
        assert_eq!(record.title, None);
        assert!(record.status.is_empty());
        assert!(record.last_read_at.is_none());
    }
}

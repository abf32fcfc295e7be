use serde::Serialize;
use thiserror::Error;

/// Error taxonomy kinds (§7) — not type names, used verbatim as the
/// `code` field of the error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    RateLimited,
    QuotaExceeded,
    UpstreamUnavailable,
    UpstreamTimeout,
    Timeout,
    Canceled,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::QuotaExceeded => 429,
            ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::Timeout => 504,
            ErrorKind::Canceled => 499,
            ErrorKind::Internal => 500,
        }
    }
}

/// Unified error type for the gateway. Each variant carries a human message
/// and optional field-level details (§7).
#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }
    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, message)
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// `{"error": {"code": "<kind>", "message": "<text>"}}` per §6.
    pub fn to_json_body(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.kind,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        serde_json::json!({ "error": error })
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::internal(e.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::not_found("x").status_code(), 404);
        assert_eq!(GatewayError::unauthorized("x").status_code(), 401);
        assert_eq!(GatewayError::forbidden("x").status_code(), 403);
        assert_eq!(GatewayError::conflict("x").status_code(), 409);
        assert_eq!(GatewayError::rate_limited("x").status_code(), 429);
        assert_eq!(GatewayError::quota_exceeded("x").status_code(), 429);
        assert_eq!(GatewayError::upstream_unavailable("x").status_code(), 502);
        assert_eq!(GatewayError::upstream_timeout("x").status_code(), 504);
        assert_eq!(GatewayError::internal("x").status_code(), 500);
    }

    #[test]
    fn json_body_shape() {
        let err = GatewayError::not_found("route r1 not found");
        let body = err.to_json_body();
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "route r1 not found");
    }

    #[test]
    fn json_body_carries_details_when_present() {
        let err = GatewayError::validation("bad field")
            .with_details(serde_json::json!({"field": "email"}));
        let body = err.to_json_body();
        assert_eq!(body["error"]["details"]["field"], "email");
    }
}

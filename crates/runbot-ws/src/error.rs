//! WebSocket error types.

use runbot_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Re-authorization failed: {0}")]
    Reauthorize(ApiError),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;

/// Normalize transport failures into the `{code, message}` shape.
///
/// Anything that means "the request may not have reached the server"
/// becomes `DisconnectError`.
impl From<WsError> for ApiError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Reauthorize(api) => api,
            WsError::Timeout(what) => ApiError::timeout(what),
            WsError::ParseError(msg) => ApiError::new("ResponseParseError", msg),
            WsError::Json(e) => ApiError::new("ResponseParseError", e.to_string()),
            other => ApiError::disconnect(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_become_disconnect() {
        let api: ApiError = WsError::NotConnected.into();
        assert!(api.is_disconnect());

        let api: ApiError = WsError::ConnectionClosed {
            code: 1006,
            reason: "gone".to_string(),
        }
        .into();
        assert!(api.is_disconnect());
    }

    #[test]
    fn test_timeout_keeps_its_code() {
        let api: ApiError = WsError::Timeout("buy".to_string()).into();
        assert_eq!(api.code, ApiError::TIMEOUT);
    }
}

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Missing or invalid credential, or an identity mismatch on join.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed client request payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Redis, Kafka or the unread-count service failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Bus message missing fields required by its event class.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(String),
}

impl RelayError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        RelayError::Unauthorized(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        RelayError::UpstreamUnavailable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        RelayError::MalformedEvent(msg.into())
    }

    /// Short machine-readable code used in metrics labels and error frames
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::StartServer(_) => "start_server",
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::Validation(_) => "validation",
            RelayError::UpstreamUnavailable(_) => "upstream_unavailable",
            RelayError::MalformedEvent(_) => "malformed_event",
            RelayError::UnknownConnection(_) => "unknown_connection",
        }
    }

    /// Message shown to a websocket client.
    ///
    /// Upstream failures are reported generically so store/bus details never leak
    /// to clients.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Unauthorized(msg) | RelayError::Validation(msg) => msg.clone(),
            RelayError::UnknownConnection(_) => "Connection is not registered".to_string(),
            _ => "Internal error, please retry".to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Unauthorized(_) => 401,
            RelayError::Validation(_) | RelayError::MalformedEvent(_) => 400,
            RelayError::UnknownConnection(_) => 404,
            RelayError::UpstreamUnavailable(_) => 503,
            RelayError::Config(_) | RelayError::StartServer(_) => 500,
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(RelayError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "status": "error",
            "code": self.code(),
            "message": self.client_message(),
        }))
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(e: redis::RedisError) -> Self {
        RelayError::UpstreamUnavailable(format!("redis: {}", e))
    }
}

impl From<rdkafka::error::KafkaError> for RelayError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        RelayError::UpstreamUnavailable(format!("kafka: {}", e))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::UpstreamUnavailable(format!("unread count service: {}", e))
    }
}

impl From<jsonwebtoken::errors::Error> for RelayError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        RelayError::Unauthorized(format!("invalid token: {}", e))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Validation(format!("invalid payload: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_hide_details_from_clients() {
        let err = RelayError::upstream("redis: connection refused (os error 111)");
        assert_eq!(err.client_message(), "Internal error, please retry");
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_unauthorized_message_is_forwarded() {
        let err = RelayError::unauthorized("Unauthorized to join this room");
        assert_eq!(err.client_message(), "Unauthorized to join this room");
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_serde_error_maps_to_validation() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: RelayError = parse.unwrap_err().into();
        assert!(matches!(err, RelayError::Validation(_)));
    }
}

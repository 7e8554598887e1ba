use thiserror::Error;

/// How the saga must dispose of a message after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying the identical message cannot succeed: acknowledge and drop.
    Permanent,
    /// Transient failure: requeue, bounded by the attempt ceiling.
    Retryable,
    /// Consumption must stop; the message stays unacknowledged.
    Fatal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed message: {0}")]
    ParseError(String),

    #[error("Item cannot be formatted: {0}")]
    FormatError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Portal rejected the bearer token")]
    Unauthorized,

    #[error("Portal returned HTTP {status}: {body}")]
    HttpClientError { status: u16, body: String },

    #[error("Portal returned HTTP {status}: {body}")]
    HttpServerError { status: u16, body: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Message bus error: {0}")]
    BusError(String),

    #[error("Target dataset unavailable: {0}")]
    DatasetUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl AppError {
    /// Classifies the error for ack/requeue/halt decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::ParseError(_)
            | AppError::FormatError(_)
            | AppError::HttpClientError { .. }
            | AppError::SerializationError(_) => ErrorClass::Permanent,

            AppError::NetworkError(e) if e.is_builder() => ErrorClass::Permanent,

            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::Unauthorized
            | AppError::HttpServerError { .. }
            | AppError::DatabaseError(_)
            | AppError::BusError(_)
            | AppError::Generic(_) => ErrorClass::Retryable,

            AppError::AuthError(_)
            | AppError::DatasetUnavailable(_)
            | AppError::ConfigError(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Maps a non-success HTTP status to the matching error variant.
    ///
    /// 401 becomes [`AppError::Unauthorized`] so callers can refresh the
    /// credential before counting the failure.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 => AppError::Unauthorized,
            400..=499 => AppError::HttpClientError {
                status,
                body: body.into(),
            },
            _ => AppError::HttpServerError {
                status,
                body: body.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert_eq!(
            AppError::ParseError("bad json".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            AppError::FormatError("no image".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(AppError::from_status(422, "").class(), ErrorClass::Permanent);
        assert_eq!(AppError::from_status(404, "").class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_retryable_errors() {
        assert_eq!(AppError::from_status(500, "").class(), ErrorClass::Retryable);
        assert_eq!(AppError::from_status(503, "").class(), ErrorClass::Retryable);
        assert_eq!(
            AppError::Timeout("login".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            AppError::BusError("publish".into()).class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_unauthorized_is_distinct_from_other_4xx() {
        assert!(matches!(AppError::from_status(401, ""), AppError::Unauthorized));
        assert!(matches!(
            AppError::from_status(403, "forbidden"),
            AppError::HttpClientError { status: 403, .. }
        ));
        assert_eq!(AppError::Unauthorized.class(), ErrorClass::Retryable);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AppError::AuthError("bad credentials".into()).is_fatal());
        assert!(AppError::DatasetUnavailable("create failed".into()).is_fatal());
        assert!(AppError::ConfigError("no dataset".into()).is_fatal());
        assert!(!AppError::Unauthorized.is_fatal());
    }

    #[test]
    fn test_status_error_message() {
        let err = AppError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "Portal returned HTTP 502: bad gateway");
    }
}

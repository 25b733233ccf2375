//! Gemini-specific error handling.

use marginalia_core::Error;

/// Gemini failure categories derived from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiErrorCode {
    AuthenticationError,
    QuotaExceeded,
    ModelNotFound,
    InvalidRequest,
    ServerError,
    Unknown,
}

impl GeminiErrorCode {
    pub fn from_response(status: u16, error_status: &str) -> Self {
        match (status, error_status) {
            (401 | 403, _) | (_, "PERMISSION_DENIED" | "UNAUTHENTICATED") => {
                Self::AuthenticationError
            }
            (429, _) | (_, "RESOURCE_EXHAUSTED") => Self::QuotaExceeded,
            (404, _) | (_, "NOT_FOUND") => Self::ModelNotFound,
            (400, _) => Self::InvalidRequest,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

/// Every provider failure surfaces as [`Error::Service`]; the code only
/// shapes the message.
pub fn to_core_error(code: GeminiErrorCode, message: &str) -> Error {
    let label = match code {
        GeminiErrorCode::AuthenticationError => "Authentication failed",
        GeminiErrorCode::QuotaExceeded => "Quota exceeded",
        GeminiErrorCode::ModelNotFound => "Model not found",
        GeminiErrorCode::InvalidRequest => "Invalid request",
        GeminiErrorCode::ServerError => "Server error",
        GeminiErrorCode::Unknown => return Error::Service(message.to_string()),
    };
    Error::Service(format!("{label}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_403() {
        assert_eq!(
            GeminiErrorCode::from_response(403, "PERMISSION_DENIED"),
            GeminiErrorCode::AuthenticationError
        );
    }

    #[test]
    fn test_error_code_from_429() {
        assert_eq!(
            GeminiErrorCode::from_response(429, "RESOURCE_EXHAUSTED"),
            GeminiErrorCode::QuotaExceeded
        );
    }

    #[test]
    fn test_error_code_from_status_string() {
        assert_eq!(
            GeminiErrorCode::from_response(400, "RESOURCE_EXHAUSTED"),
            GeminiErrorCode::QuotaExceeded
        );
    }

    #[test]
    fn test_error_code_from_503() {
        assert_eq!(
            GeminiErrorCode::from_response(503, "UNAVAILABLE"),
            GeminiErrorCode::ServerError
        );
    }

    #[test]
    fn test_error_code_unknown() {
        assert_eq!(
            GeminiErrorCode::from_response(418, ""),
            GeminiErrorCode::Unknown
        );
    }

    #[test]
    fn test_all_codes_map_to_service_error() {
        for code in [
            GeminiErrorCode::AuthenticationError,
            GeminiErrorCode::QuotaExceeded,
            GeminiErrorCode::ModelNotFound,
            GeminiErrorCode::InvalidRequest,
            GeminiErrorCode::ServerError,
            GeminiErrorCode::Unknown,
        ] {
            assert!(matches!(to_core_error(code, "boom"), Error::Service(_)));
        }
        let err = to_core_error(GeminiErrorCode::QuotaExceeded, "slow down");
        assert_eq!(err.to_string(), "Service error: Quota exceeded: slow down");
    }
}

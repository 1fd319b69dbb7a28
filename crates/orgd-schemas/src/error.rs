//! Domain error codes carried in `StatusReply.error`.
//!
//! Validation and lookup failures travel as structured codes on an otherwise
//! successful HTTP response, so clients can branch on them; only unexpected
//! failures surface as transport-level errors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    MissingTenantName,
    MissingUserEmail,
    MissingUserName,
    InvalidParent,
    DifferentParent,
    NotFound,
    NoChanges,
    ConstraintFailed,
    DatabaseUpdateFailed,
    DatabaseError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::MissingTenantName => "MISSING_TENANT_NAME",
            ErrorCode::MissingUserEmail => "MISSING_USER_EMAIL",
            ErrorCode::MissingUserName => "MISSING_USER_NAME",
            ErrorCode::InvalidParent => "INVALID_PARENT",
            ErrorCode::DifferentParent => "DIFFERENT_PARENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NoChanges => "NO_CHANGES",
            ErrorCode::ConstraintFailed => "CONSTRAINT_FAILED",
            ErrorCode::DatabaseUpdateFailed => "DATABASE_UPDATE_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(ErrorCode::Ok),
            "MISSING_TENANT_NAME" => Some(ErrorCode::MissingTenantName),
            "MISSING_USER_EMAIL" => Some(ErrorCode::MissingUserEmail),
            "MISSING_USER_NAME" => Some(ErrorCode::MissingUserName),
            "INVALID_PARENT" => Some(ErrorCode::InvalidParent),
            "DIFFERENT_PARENT" => Some(ErrorCode::DifferentParent),
            "NOT_FOUND" => Some(ErrorCode::NotFound),
            "NO_CHANGES" => Some(ErrorCode::NoChanges),
            "CONSTRAINT_FAILED" => Some(ErrorCode::ConstraintFailed),
            "DATABASE_UPDATE_FAILED" => Some(ErrorCode::DatabaseUpdateFailed),
            "DATABASE_ERROR" => Some(ErrorCode::DatabaseError),
            _ => None,
        }
    }
}

/// A failure the service reports as a structured code plus a human message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error with the code's name as the message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_parse_round_trip() {
        let all = [
            ErrorCode::Ok,
            ErrorCode::MissingTenantName,
            ErrorCode::MissingUserEmail,
            ErrorCode::MissingUserName,
            ErrorCode::InvalidParent,
            ErrorCode::DifferentParent,
            ErrorCode::NotFound,
            ErrorCode::NoChanges,
            ErrorCode::ConstraintFailed,
            ErrorCode::DatabaseUpdateFailed,
            ErrorCode::DatabaseError,
        ];
        for code in all {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NOT_A_CODE"), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&ErrorCode::DifferentParent).unwrap();
        assert_eq!(json, "\"DIFFERENT_PARENT\"");
        let back: ErrorCode = serde_json::from_str("\"NO_CHANGES\"").unwrap();
        assert_eq!(back, ErrorCode::NoChanges);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ServiceError::new(ErrorCode::NotFound, "node 42 not found");
        assert_eq!(err.to_string(), "NOT_FOUND: node 42 not found");
    }
}

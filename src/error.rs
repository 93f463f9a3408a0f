//! Error types for nexapro
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (validation, bad args, bad config, unknown id)
//! - 3: Blocked by policy (missing permission)
//! - 4: Operation failed (gateway unreachable, non-2xx, rejected envelope)

use thiserror::Error;

/// Exit codes for the nexapro CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for nexapro operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{kind} {id} has not been synced to the gateway yet")]
    Provisional { kind: &'static str, id: i64 },

    // Policy blocks (exit code 3)
    #[error("Permission denied: {role} lacks {permission}")]
    PermissionDenied { role: String, permission: String },

    // Operation failures (exit code 4)
    #[error("Gateway returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway rejected request: {0}")]
    Rejected(String),

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::Validation(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::NotFound { .. }
            | Error::Provisional { .. } => exit_codes::USER_ERROR,

            // Policy blocks
            Error::PermissionDenied { .. } => exit_codes::POLICY_BLOCKED,

            // Operation failures
            Error::Http { .. }
            | Error::Transport(_)
            | Error::Rejected(_)
            | Error::MalformedResponse(_)
            | Error::Unavailable(_)
            | Error::Cancelled
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// True for failures that happened talking to the gateway.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http { .. }
                | Error::Transport(_)
                | Error::Rejected(_)
                | Error::MalformedResponse(_)
                | Error::Unavailable(_)
        )
    }

    /// True when no HTTP response was received at all.
    pub fn is_offline(&self) -> bool {
        match self {
            Error::Transport(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }

    /// Structured details for JSON error output, when the variant has any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Http { status, .. } => Some(serde_json::json!({ "status": status })),
            Error::NotFound { kind, id } | Error::Provisional { kind, id } => {
                Some(serde_json::json!({ "kind": kind, "id": id }))
            }
            Error::PermissionDenied { role, permission } => {
                Some(serde_json::json!({ "role": role, "permission": permission }))
            }
            _ => None,
        }
    }
}

/// Result type alias for nexapro operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}

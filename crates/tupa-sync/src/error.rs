//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Data                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Schema                 │ │
//! │  │  InvalidUrl     │  │  AuthRejected   │  │  Validation             │ │
//! │  │  UnknownProvider│  │  Timeout        │  │  Serialization          │ │
//! │  └─────────────────┘  │  RequestRejected│  └─────────────────────────┘ │
//! │                       └─────────────────┘                              │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │      ERP        │                              │
//! │  │  (DbError)      │  │  JSON-RPC fault │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Handling Strategy
//! - Fatal for a run: connection, auth, unknown provider, configuration
//! - Retryable inside the ERP push: connection, timeout
//! - Everything else is recorded per batch / per record and the run continues

use std::time::Duration;

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine or provider configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// `pos_type` does not name a registered provider.
    #[error("Unknown provider: '{0}'")]
    UnknownProvider(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Remote unreachable, or answered with a server error.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected (HTTP 401/403, failed login).
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Request deadline exceeded.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Remote refused the request for a reason other than auth (HTTP 4xx).
    #[error("Request rejected with HTTP {status}: {message}")]
    RequestRejected { status: u16, message: String },

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Raw vendor data does not have the expected shape.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Business-rule violation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Storage / ERP Errors
    // =========================================================================
    /// Persistence call failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The ERP answered with a JSON-RPC fault.
    #[error("ERP error: {0}")]
    Erp(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tupa_db::DbError> for SyncError {
    fn from(err: tupa_db::DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<tupa_core::CoreError> for SyncError {
    fn from(err: tupa_core::CoreError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Classifies a reqwest transport error.
    ///
    /// ## Mapping
    /// ```text
    /// timeout            → Timeout(secs)
    /// connect / request  → ConnectionFailed
    /// body decode        → Schema
    /// other              → ConnectionFailed
    /// ```
    pub fn from_http(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(timeout.as_secs())
        } else if err.is_decode() {
            SyncError::Schema(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status.as_u16() {
            401 | 403 => SyncError::AuthRejected(message),
            408 | 429 | 500..=599 => {
                SyncError::ConnectionFailed(format!("HTTP {}: {}", status.as_u16(), message))
            }
            code => SyncError::RequestRejected {
                status: code,
                message,
            },
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true for transport failures that usually clear on their own.
    /// The ERP push retries every error regardless; this only tags logs.
    ///
    /// ## Transient Errors
    /// - Connection failures (network issues, 5xx, 429)
    /// - Timeouts
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::ConnectionFailed(_) | SyncError::Timeout(_))
    }

    /// Returns true if this error aborts a whole sync run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::AuthRejected(_)
                | SyncError::UnknownProvider(_)
        ) || self.is_config_error()
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Stable tag for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidConfig(_)
            | SyncError::InvalidUrl(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => "config",
            SyncError::UnknownProvider(_) => "unknown_provider",
            SyncError::ConnectionFailed(_) => "connection",
            SyncError::AuthRejected(_) => "auth",
            SyncError::Timeout(_) => "timeout",
            SyncError::RequestRejected { .. } => "rejected",
            SyncError::Schema(_) => "schema",
            SyncError::Validation(_) => "validation",
            SyncError::Serialization(_) => "serialization",
            SyncError::Storage(_) => "storage",
            SyncError::Erp(_) => "erp",
            SyncError::Internal(_) => "internal",
        }
    }
}

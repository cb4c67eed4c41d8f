//! Failure classification into a small, user-safe taxonomy.
//!
//! Adapters and the vault raise detailed errors internally. Before anything
//! crosses the gateway boundary it is mapped here to an [`ErrorKind`] with a
//! fixed message from the catalog. Catalog messages never contain driver
//! text, host names, user names or passwords.

use crate::error::{AdapterError, FailureSignal};
use serde::{Deserialize, Serialize};
use std::io;

/// Closed failure taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Validator denied the operation
    Rejected,
    /// Stored blob failed authentication or could not be decoded
    CredentialsCorrupt,
    /// Server actively refused the connection
    ConnectionRefused,
    /// Login was rejected
    AuthenticationFailed,
    /// Host name could not be resolved
    HostNotFound,
    /// Target database does not exist
    DatabaseNotFound,
    /// Connect or operation deadline expired
    Timeout,
    /// Backend kind unknown or not compiled in
    UnsupportedBackendKind,
    /// Descriptor is missing required fields
    InvalidDescriptor,
    /// No saved connection under the given id
    ConnectionNotFound,
    /// Anything not matched above
    Unknown,
}

impl ErrorKind {
    /// Fixed user-facing message for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Rejected => "Query contains forbidden operations.",
            Self::CredentialsCorrupt => "Stored connection details could not be decrypted.",
            Self::ConnectionRefused => {
                "Connection refused. Please check if the database server is running and accessible."
            }
            Self::AuthenticationFailed => "Authentication failed. Please check your credentials.",
            Self::HostNotFound => {
                "Host not found. Please check your connection string or host address."
            }
            Self::DatabaseNotFound => "Database not found. Please check the database name.",
            Self::Timeout => "Connection timed out. Please verify the host and port are correct.",
            Self::UnsupportedBackendKind => "Unsupported database type.",
            Self::InvalidDescriptor => "Please fill in all required fields.",
            Self::ConnectionNotFound => "Connection not found.",
            Self::Unknown => "An error occurred while connecting to the database.",
        }
    }

    /// Whether a calling layer may reasonably retry.
    ///
    /// The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionRefused)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A classified failure: stable kind plus a message safe to show users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Taxonomy entry
    pub kind: ErrorKind,
    /// User-safe message
    pub message: String,
}

impl ClassifiedError {
    /// Creates a classified error carrying the catalog message for `kind`.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
        }
    }

    /// `InvalidDescriptor` listing the field names that failed validation.
    pub fn invalid_fields(fields: &[&str]) -> Self {
        Self {
            kind: ErrorKind::InvalidDescriptor,
            message: format!(
                "{} Invalid fields: {}.",
                ErrorKind::InvalidDescriptor.user_message(),
                fields.join(", ")
            ),
        }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Engine error codes with a known meaning.
///
/// MySQL server error numbers, MongoDB command codes, and the symbolic codes
/// adapters attach for resolver and socket failures.
const CODE_TABLE: &[(&str, ErrorKind)] = &[
    ("1045", ErrorKind::AuthenticationFailed), // ER_ACCESS_DENIED_ERROR
    ("1044", ErrorKind::AuthenticationFailed), // ER_DBACCESS_DENIED_ERROR
    ("1698", ErrorKind::AuthenticationFailed), // ER_ACCESS_DENIED_NO_PASSWORD_ERROR
    ("1049", ErrorKind::DatabaseNotFound),     // ER_BAD_DB_ERROR
    ("18", ErrorKind::AuthenticationFailed),   // MongoDB AuthenticationFailed
    ("AuthenticationFailed", ErrorKind::AuthenticationFailed),
    ("ECONNREFUSED", ErrorKind::ConnectionRefused),
    ("ENOTFOUND", ErrorKind::HostNotFound),
    ("ETIMEDOUT", ErrorKind::Timeout),
];

/// Substrings matched against the lowercased error chain, in priority order.
const TEXT_TABLE: &[(&str, ErrorKind)] = &[
    ("access denied", ErrorKind::AuthenticationFailed),
    ("authentication failed", ErrorKind::AuthenticationFailed),
    ("bad auth", ErrorKind::AuthenticationFailed),
    ("unknown database", ErrorKind::DatabaseNotFound),
    ("econnrefused", ErrorKind::ConnectionRefused),
    ("connection refused", ErrorKind::ConnectionRefused),
    ("enotfound", ErrorKind::HostNotFound),
    ("failed to lookup address", ErrorKind::HostNotFound),
    ("name or service not known", ErrorKind::HostNotFound),
    ("no such host", ErrorKind::HostNotFound),
    ("nodename nor servname", ErrorKind::HostNotFound),
    ("etimedout", ErrorKind::Timeout),
    ("timed out", ErrorKind::Timeout),
    ("server selection timeout", ErrorKind::Timeout),
];

/// Maps a raw adapter failure to the taxonomy.
///
/// Engine codes win over socket kinds, which win over text matching. Anything
/// unmatched is `Unknown`.
pub fn classify(error: &AdapterError) -> ClassifiedError {
    let kind = match error {
        AdapterError::Timeout { .. } => ErrorKind::Timeout,
        AdapterError::InvalidTarget { .. } => ErrorKind::InvalidDescriptor,
        AdapterError::Fault { .. } => ErrorKind::Unknown,
        AdapterError::Connect { signal, .. } | AdapterError::Execute { signal, .. } => {
            kind_from_signal(signal)
                .or_else(|| kind_from_text(&error_chain_text(error)))
                .unwrap_or(ErrorKind::Unknown)
        }
    };
    ClassifiedError::new(kind)
}

fn kind_from_signal(signal: &FailureSignal) -> Option<ErrorKind> {
    let from_code = signal.code.as_deref().and_then(|code| {
        CODE_TABLE
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| *kind)
    });

    from_code.or(match signal.io_kind {
        Some(io::ErrorKind::ConnectionRefused) => Some(ErrorKind::ConnectionRefused),
        Some(io::ErrorKind::TimedOut) => Some(ErrorKind::Timeout),
        _ => None,
    })
}

fn kind_from_text(text: &str) -> Option<ErrorKind> {
    TEXT_TABLE
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Lowercased display text of the error and all of its sources.
fn error_chain_text(error: &AdapterError) -> String {
    let mut text = error.to_string().to_lowercase();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        text.push('\n');
        text.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }
    text
}

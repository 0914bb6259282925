//! Typed error definitions for dropback.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum DropbackError {
    #[error("Dropbox authentication failed: {0}. Run `dropback connect` to link an account.")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Could not apply {what} to {path}: {context}")]
    Metadata {
        path: PathBuf,
        what: &'static str,
        context: String,
    },

    #[error("Dropbox credentials not found (searched: {searched}). Run `dropback connect` first.")]
    CredentialsNotFound { searched: String },

    #[error("Invalid backup target '{0}': expected <name>:/<folder> (e.g. home:/documents)")]
    InvalidTarget(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl DropbackError {
    /// Stable numeric code emitted in structured logs.
    pub fn code(&self) -> u16 {
        match self {
            DropbackError::Authentication(_) => 10,
            DropbackError::NotFound(_) => 20,
            DropbackError::Transfer { .. } => 30,
            DropbackError::Metadata { .. } => 40,
            DropbackError::CredentialsNotFound { .. } => 50,
            DropbackError::InvalidTarget(_) => 60,
            DropbackError::Config(_) => 70,
            DropbackError::Interrupted => 130,
        }
    }

    /// Short machine-friendly kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            DropbackError::Authentication(_) => "authentication",
            DropbackError::NotFound(_) => "not_found",
            DropbackError::Transfer { .. } => "transfer",
            DropbackError::Metadata { .. } => "metadata",
            DropbackError::CredentialsNotFound { .. } => "credentials_not_found",
            DropbackError::InvalidTarget(_) => "invalid_target",
            DropbackError::Config(_) => "config",
            DropbackError::Interrupted => "interrupted",
        }
    }
}

impl From<RemoteError> for DropbackError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Auth(msg) => DropbackError::Authentication(msg),
            RemoteError::NotFound(path) => DropbackError::NotFound(format!("remote path {path}")),
            other => DropbackError::Transfer {
                path: other.path_hint().unwrap_or("<remote>").to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_auth_maps_to_authentication() {
        let e: DropbackError = RemoteError::Auth("expired_access_token".into()).into();
        assert!(matches!(e, DropbackError::Authentication(_)));
        assert_eq!(e.code(), 10);
    }

    #[test]
    fn remote_api_maps_to_transfer_with_path() {
        let e: DropbackError = RemoteError::Api {
            path: "/home/a.txt".into(),
            status: 500,
            summary: "internal".into(),
        }
        .into();
        match e {
            DropbackError::Transfer { path, .. } => assert_eq!(path, "/home/a.txt"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

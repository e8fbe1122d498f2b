//! Errors for the wallet session layer.

use thiserror::Error;

/// Permission storage failure. Never surfaced past the permission cache.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Malformed storage file: {0}")]
    Format(String),
}

/// Wallet provider failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    #[error("User rejected the connection request")]
    UserRejected,

    #[error("Wallet provider error: {0}")]
    Provider(String),
}

/// Identity service failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentityError {
    #[error("Invalid emergency access key")]
    InvalidKey,

    #[error("Identity request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Identity service unreachable: {0}")]
    Transport(String),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

/// Session controller failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("User rejected the connection request")]
    UserRejected,

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("No wallet connected")]
    NotConnected,

    #[error(transparent)]
    Wallet(WalletError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl From<WalletError> for SessionError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::UserRejected => SessionError::UserRejected,
            other => SessionError::Wallet(other),
        }
    }
}

//! Error types for the chain gateway and the contract accessor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to blockchain connectivity and RPC queries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("Failed to connect to chain RPC at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("No chain connection established")]
    NotConnected,

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Failed to decode chain response: {0}")]
    DecodeError(String),

    #[error("Transaction {hash} not confirmed after {polls} polls")]
    ConfirmationTimeout { hash: String, polls: u32 },
}

impl ChainError {
    /// Whether the error means the node itself is unreachable, as opposed to
    /// the node answering with an error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChainError::ConnectionFailed { .. } | ChainError::NotConnected
        )
    }
}

/// Errors surfaced by the attendance ledger, live or mocked.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Student already registered")]
    AlreadyRegistered,

    #[error("Student not registered")]
    NotRegistered,

    #[error("Already attended")]
    AlreadyAttended,

    #[error("Course not active")]
    CourseInactive,

    #[error("Not in attendance time range")]
    OutOfTimeWindow,

    #[error("Course {0} does not exist")]
    CourseNotFound(u64),

    #[error("Start time must be before end time")]
    InvalidTimeRange,

    #[error("Insufficient permission: {0}")]
    InsufficientPermission(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("No signer account configured for contract writes")]
    NoSigner,

    #[error("Contract backend unavailable")]
    Unavailable,

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

impl LedgerError {
    /// Domain rule violations are surfaced verbatim and never retried.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyRegistered
                | LedgerError::NotRegistered
                | LedgerError::AlreadyAttended
                | LedgerError::CourseInactive
                | LedgerError::OutOfTimeWindow
                | LedgerError::CourseNotFound(_)
                | LedgerError::InvalidTimeRange
                | LedgerError::Reverted(_)
        )
    }

    /// Message suitable for an end user.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::AlreadyRegistered => "This wallet address is already registered".to_string(),
            LedgerError::NotRegistered => {
                "Student is not registered, please complete registration first".to_string()
            }
            LedgerError::AlreadyAttended => "Attendance has already been recorded".to_string(),
            LedgerError::CourseInactive => {
                "Course has been deactivated, attendance is closed".to_string()
            }
            LedgerError::OutOfTimeWindow => {
                "Outside the attendance window, check the course schedule".to_string()
            }
            LedgerError::CourseNotFound(id) => format!("Course {} does not exist", id),
            LedgerError::InvalidTimeRange => "Start time must be before end time".to_string(),
            LedgerError::InsufficientPermission(_) => {
                "You do not have permission to perform this operation".to_string()
            }
            LedgerError::Reverted(reason) => format!("Transaction failed: {}", reason),
            LedgerError::NoSigner | LedgerError::Unavailable | LedgerError::Chain(_) => {
                "Smart contract unavailable, make sure the Ethereum node is running".to_string()
            }
        }
    }
}

/// Per-student failure reason inside a batch attendance partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceFailure {
    NotRegistered,
    AlreadyAttended,
    CourseInactive,
    OutOfTimeWindow,
    CourseNotFound,
}

impl AttendanceFailure {
    /// Classify a ledger error as a per-student failure, if it is one.
    pub fn from_ledger_error(err: &LedgerError) -> Option<Self> {
        match err {
            LedgerError::NotRegistered => Some(AttendanceFailure::NotRegistered),
            LedgerError::AlreadyAttended => Some(AttendanceFailure::AlreadyAttended),
            LedgerError::CourseInactive => Some(AttendanceFailure::CourseInactive),
            LedgerError::OutOfTimeWindow => Some(AttendanceFailure::OutOfTimeWindow),
            LedgerError::CourseNotFound(_) => Some(AttendanceFailure::CourseNotFound),
            _ => None,
        }
    }
}

/// Malformed wallet address.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid Ethereum address: {0}")]
pub struct AddressError(pub String);

//! Role and emergency-access errors.

use crate::chain::error::LedgerError;
use crate::roles::gate::Requirement;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("Invalid emergency access key")]
    InvalidKey,

    #[error("Insufficient permission: {required} role required")]
    InsufficientPermission { required: Requirement },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

//! Wallet role resolution.
//!
//! Maps an address to its effective role by querying the ledger's role
//! surface, issues emergency grants from shared keys, and gates HTTP
//! operations on the result through a short-lived cache.

pub mod error;
pub mod gate;
pub mod resolver;
pub mod types;

pub use error::AccessError;
pub use gate::{Requirement, RoleGate};
pub use resolver::{EmergencyKeys, RoleResolver};
pub use types::{Role, RoleGrant, RoleResolution};

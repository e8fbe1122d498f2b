//! Campus attendance backend.
//!
//! Wallet addresses identify students and staff. Roles and attendance live in
//! an on-chain contract, or in an in-process mock ledger when no contract is
//! reachable. The crate provides:
//!
//! - [`chain`]: JSON-RPC gateway, live and mock ledgers, and the accessor that
//!   switches between them
//! - [`roles`]: role resolution, emergency grants and the request gate
//! - [`session`]: the client-side wallet session and its permission cache
//! - [`api`]: the HTTP surface

pub mod api;
pub mod chain;
pub mod clock;
pub mod config;
pub mod roles;
pub mod session;

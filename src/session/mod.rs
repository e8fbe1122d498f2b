//! Wallet-driven sessions.
//!
//! A session follows the wallet's active account, keeps a time-boxed
//! permission cache per address, and reconciles cached grants with freshly
//! resolved roles.

pub mod cache;
pub mod controller;
pub mod error;
pub mod identity;
pub mod storage;
pub mod wallet;

pub use cache::{merge, SessionPermissionCache};
pub use controller::{ResolutionTicket, SessionIdentity, SessionState, WalletSessionController};
pub use error::{IdentityError, SessionError, StorageError, WalletError};
pub use identity::{HttpIdentityClient, IdentityService};
pub use storage::{FileStorage, MemoryStorage, PermissionStorage};
pub use wallet::{AccountSubscription, MemoryWallet, WalletProvider};

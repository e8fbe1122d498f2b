//! Attendance contract access.
//!
//! The contract is the system of record for registrations, courses and
//! attendance. This module reaches it over Ethereum JSON-RPC, or substitutes
//! an in-process mock ledger with the same rules when no node is usable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │ ChainGateway │────▶│ LiveLedger  │────▶│                  │
//! │  (reqwest)   │     │ (abi codec) │     │ ContractAccessor │──▶ Arc<dyn AttendanceLedger>
//! └──────────────┘     └─────────────┘     │  (5s mode poll)  │
//!                      ┌─────────────┐     │                  │
//!                      │ MockLedger  │────▶│                  │
//!                      │(repositories)│    └──────────────────┘
//!                      └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use attendance::chain::{AccessorConfig, ChainGateway, ContractAccessor, GatewayConfig, MockLedger};
//!
//! let gateway = Arc::new(ChainGateway::http(GatewayConfig::new("http://localhost:8545")));
//! gateway.connect().await.ok();
//! let mock = Arc::new(MockLedger::with_defaults(Arc::new(SystemClock)));
//! let accessor = ContractAccessor::for_contract(gateway, mock, config, clock);
//!
//! let ledger = accessor.current()?;
//! let tx = ledger.record_attendance(student, course_id).await?;
//! let receipt = tx.wait().await?;
//! ```

pub mod abi;
pub mod accessor;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod live;
pub mod mock;
pub mod repository;
pub mod types;

pub use accessor::{AccessorConfig, BackendMode, ContractAccessor, GuardedLedger, LedgerSource, StaticLedger};
pub use error::{AddressError, AttendanceFailure, ChainError, LedgerError};
pub use gateway::{ChainGateway, ConnectionStatus, GatewayConfig, HttpTransport, RpcTransport};
pub use ledger::{AttendanceLedger, BatchAttendance, CourseCreation, PendingTransaction};
pub use live::LiveLedger;
pub use mock::{MockLedger, MockRepositories, TestDataSummary, DEFAULT_OPERATOR};
pub use repository::{MemoryRepository, Repository};
pub use types::{
    Address, AttendanceRecord, BatchPartition, Course, FailedAttendance, StudentInfo,
    StudentRecord, TxReceipt,
};

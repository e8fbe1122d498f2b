//! The fixed contract surface shared by the live and mock backends.

use crate::chain::error::LedgerError;
use crate::chain::types::{Address, AttendanceRecord, BatchPartition, Course, StudentRecord, TxReceipt};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Resolves a submitted transaction into a receipt.
#[async_trait]
pub trait TxConfirmation: Send + Sync {
    async fn confirm(&self, hash: &str) -> Result<TxReceipt, LedgerError>;
}

/// Confirmation that is already final, used by the mock ledger.
pub struct Settled(pub TxReceipt);

#[async_trait]
impl TxConfirmation for Settled {
    async fn confirm(&self, _hash: &str) -> Result<TxReceipt, LedgerError> {
        Ok(self.0.clone())
    }
}

/// Descriptor of a state-changing call.
///
/// The effect is only durable once [`PendingTransaction::wait`] returns a
/// successful receipt, in mock mode as well as on chain.
pub struct PendingTransaction {
    hash: String,
    confirmation: Arc<dyn TxConfirmation>,
}

impl PendingTransaction {
    pub fn new(hash: String, confirmation: Arc<dyn TxConfirmation>) -> Self {
        Self { hash, confirmation }
    }

    pub fn settled(receipt: TxReceipt) -> Self {
        Self {
            hash: receipt.transaction_hash.clone(),
            confirmation: Arc::new(Settled(receipt)),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub async fn wait(self) -> Result<TxReceipt, LedgerError> {
        let receipt = self.confirmation.confirm(&self.hash).await?;
        if !receipt.success {
            return Err(LedgerError::Reverted(format!(
                "transaction {} failed on chain",
                receipt.transaction_hash
            )));
        }
        Ok(receipt)
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Result of `createCourse`.
#[derive(Debug)]
pub struct CourseCreation {
    pub course_id: u64,
    pub transaction: PendingTransaction,
}

/// Result of `batchRecordAttendance`.
///
/// `transaction` is `None` when no student in the batch was eligible.
#[derive(Debug)]
pub struct BatchAttendance {
    pub partition: BatchPartition,
    pub transaction: Option<PendingTransaction>,
}

/// Attendance contract surface.
///
/// Implemented by the in-process mock ledger and by the JSON-RPC backed live
/// ledger so the accessor can switch between them transparently.
#[async_trait]
pub trait AttendanceLedger: Send + Sync {
    async fn register_student(
        &self,
        student: Address,
        name: &str,
        student_id: &str,
    ) -> Result<PendingTransaction, LedgerError>;

    async fn get_student_info(&self, student: Address) -> Result<StudentRecord, LedgerError>;

    async fn get_student_count(&self) -> Result<u64, LedgerError>;

    async fn get_students(&self, start: u64, count: u64) -> Result<Vec<Address>, LedgerError>;

    async fn create_course(
        &self,
        name: &str,
        start_time: u64,
        end_time: u64,
    ) -> Result<CourseCreation, LedgerError>;

    /// Fails with `CourseNotFound` for ids that were never assigned.
    async fn get_course_info(&self, course_id: u64) -> Result<Course, LedgerError>;

    async fn get_course_count(&self) -> Result<u64, LedgerError>;

    async fn activate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError>;

    async fn deactivate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError>;

    async fn record_attendance(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<PendingTransaction, LedgerError>;

    async fn batch_record_attendance(
        &self,
        students: &[Address],
        course_id: u64,
    ) -> Result<BatchAttendance, LedgerError>;

    async fn check_attendance(&self, student: Address, course_id: u64) -> Result<bool, LedgerError>;

    async fn get_attendance_details(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<Option<AttendanceRecord>, LedgerError>;

    async fn is_admin(&self, who: Address) -> Result<bool, LedgerError>;

    async fn has_system_access(&self, who: Address) -> Result<bool, LedgerError>;

    async fn owner(&self) -> Result<Address, LedgerError>;
}

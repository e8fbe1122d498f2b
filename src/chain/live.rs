//! Live attendance ledger backed by the deployed contract.
//!
//! Reads go through `eth_call`; writes are submitted with `eth_sendTransaction`
//! from an unlocked signer account on the node and confirmed by polling
//! `eth_getTransactionReceipt`.

use crate::chain::abi::{self, decode_hex, Decoder, Token};
use crate::chain::error::{AttendanceFailure, ChainError, LedgerError};
use crate::chain::gateway::{parse_quantity, ChainGateway};
use crate::chain::ledger::{
    AttendanceLedger, BatchAttendance, CourseCreation, PendingTransaction, TxConfirmation,
};
use crate::chain::types::{
    Address, AttendanceRecord, BatchPartition, Course, FailedAttendance, StudentRecord, TxReceipt,
};
use crate::clock::Clock;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const REGISTER_STUDENT: &str = "registerStudent(address,string,string)";
const GET_STUDENT_INFO: &str = "getStudentInfo(address)";
const GET_STUDENT_COUNT: &str = "getStudentCount()";
const GET_STUDENTS: &str = "getStudents(uint256,uint256)";
const CREATE_COURSE: &str = "createCourse(string,uint256,uint256)";
const GET_COURSE_INFO: &str = "getCourseInfo(uint256)";
const GET_COURSE_COUNT: &str = "getCourseCount()";
const ACTIVATE_COURSE: &str = "activateCourse(uint256)";
const DEACTIVATE_COURSE: &str = "deactivateCourse(uint256)";
const MANUAL_ATTENDANCE: &str = "manualAttendance(address,uint256)";
const BATCH_RECORD_ATTENDANCE: &str = "batchRecordAttendance(address[],uint256)";
const CHECK_ATTENDANCE: &str = "checkAttendance(address,uint256)";
const GET_ATTENDANCE_DETAILS: &str = "getAttendanceDetails(address,uint256)";
const IS_ADMIN: &str = "isAdmin(address)";
const HAS_SYSTEM_ACCESS: &str = "hasSystemAccess(address)";
const OWNER: &str = "owner()";
const COURSE_CREATED_EVENT: &str = "CourseCreated(uint256,string,uint256,uint256)";

/// Map a contract revert reason onto a ledger error.
pub fn map_revert(reason: &str, course_id: Option<u64>) -> LedgerError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("already registered") {
        LedgerError::AlreadyRegistered
    } else if lower.contains("not registered") {
        LedgerError::NotRegistered
    } else if lower.contains("already attended") {
        LedgerError::AlreadyAttended
    } else if lower.contains("course not active") {
        LedgerError::CourseInactive
    } else if lower.contains("not in attendance time range") {
        LedgerError::OutOfTimeWindow
    } else if lower.contains("course does not exist") {
        LedgerError::CourseNotFound(course_id.unwrap_or_default())
    } else if lower.contains("start time must be before end time") {
        LedgerError::InvalidTimeRange
    } else if lower.contains("only owner") || lower.contains("only admin") {
        LedgerError::InsufficientPermission(reason.to_string())
    } else {
        LedgerError::Reverted(reason.to_string())
    }
}

fn map_chain_error(err: ChainError, course_id: Option<u64>) -> LedgerError {
    match abi::revert_reason(&err) {
        Some(reason) => map_revert(&reason, course_id),
        None => LedgerError::Chain(err),
    }
}

/// Polls the node for a transaction receipt.
pub struct ReceiptPoller {
    gateway: Arc<ChainGateway>,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReceiptPoller {
    /// Raw receipt JSON once the transaction is mined.
    async fn poll(&self, hash: &str) -> Result<Value, LedgerError> {
        for _ in 0..self.max_polls {
            let receipt = self
                .gateway
                .call("eth_getTransactionReceipt", json!([hash]))
                .await?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ChainError::ConfirmationTimeout {
            hash: hash.to_string(),
            polls: self.max_polls,
        }
        .into())
    }
}

fn parse_receipt(hash: &str, raw: &Value) -> Result<TxReceipt, ChainError> {
    let block_number = raw
        .get("blockNumber")
        .map(parse_quantity)
        .transpose()?
        .unwrap_or(0);
    let success = raw
        .get("status")
        .map(parse_quantity)
        .transpose()?
        .map(|status| status == 1)
        .unwrap_or(true);
    let transaction_hash = raw
        .get("transactionHash")
        .and_then(Value::as_str)
        .unwrap_or(hash)
        .to_string();

    Ok(TxReceipt {
        transaction_hash,
        block_number,
        success,
    })
}

#[async_trait]
impl TxConfirmation for ReceiptPoller {
    async fn confirm(&self, hash: &str) -> Result<TxReceipt, LedgerError> {
        let raw = self.poll(hash).await?;
        Ok(parse_receipt(hash, &raw)?)
    }
}

/// Course id from a `CourseCreated` log; the id is the first indexed topic.
fn course_id_from_logs(receipt: &Value) -> Option<u64> {
    let topic = format!("0x{}", hex::encode(abi::event_topic(COURSE_CREATED_EVENT)));
    receipt
        .get("logs")?
        .as_array()?
        .iter()
        .find(|log| {
            log.get("topics")
                .and_then(|t| t.get(0))
                .and_then(Value::as_str)
                .is_some_and(|t0| t0.eq_ignore_ascii_case(&topic))
        })
        .and_then(|log| log.get("topics")?.get(1))
        .and_then(|id| parse_quantity(id).ok())
}

/// Contract proxy over a connected [`ChainGateway`].
pub struct LiveLedger {
    gateway: Arc<ChainGateway>,

    /// Deployed attendance contract.
    contract: Address,

    /// Node-managed account used as `from` for writes. Writes fail without it.
    signer: Option<Address>,

    clock: Arc<dyn Clock>,

    /// Receipt polling cadence and attempt limit.
    poll_interval: Duration,
    max_polls: u32,
}

impl LiveLedger {
    pub fn new(
        gateway: Arc<ChainGateway>,
        contract: Address,
        signer: Option<Address>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            contract,
            signer,
            clock,
            poll_interval: Duration::from_millis(500),
            max_polls: 120,
        }
    }

    /// Override receipt polling cadence.
    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    fn poller(&self) -> Arc<ReceiptPoller> {
        Arc::new(ReceiptPoller {
            gateway: self.gateway.clone(),
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
        })
    }

    async fn read(
        &self,
        signature: &str,
        tokens: &[Token],
        course_id: Option<u64>,
    ) -> Result<Vec<u8>, LedgerError> {
        let data = abi::encode_call(signature, tokens);
        let params = json!([
            { "to": self.contract.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);

        let result = self
            .gateway
            .call("eth_call", params)
            .await
            .map_err(|e| map_chain_error(e, course_id))?;

        let raw = result
            .as_str()
            .ok_or_else(|| ChainError::DecodeError(format!("{} returned {}", signature, result)))?;
        Ok(decode_hex(raw)?)
    }

    async fn send(
        &self,
        signature: &str,
        tokens: &[Token],
        course_id: Option<u64>,
    ) -> Result<PendingTransaction, LedgerError> {
        let signer = self.signer.ok_or(LedgerError::NoSigner)?;
        let data = abi::encode_call(signature, tokens);
        let params = json!([{
            "from": signer.to_string(),
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }]);

        let result = self
            .gateway
            .call("eth_sendTransaction", params)
            .await
            .map_err(|e| map_chain_error(e, course_id))?;

        let hash = result
            .as_str()
            .ok_or_else(|| ChainError::DecodeError(format!("{} returned {}", signature, result)))?
            .to_string();

        debug!("Submitted {} as {}", signature, hash);
        Ok(PendingTransaction::new(hash, self.poller()))
    }

    /// Per-student eligibility before a batch is submitted, so the whole batch
    /// cannot revert on one bad entry.
    async fn precheck(
        &self,
        student: Address,
        course_id: u64,
        seen: &mut HashSet<Address>,
    ) -> Result<Option<AttendanceFailure>, LedgerError> {
        if !seen.insert(student) {
            return Ok(Some(AttendanceFailure::AlreadyAttended));
        }
        if !self.get_student_info(student).await?.is_registered {
            return Ok(Some(AttendanceFailure::NotRegistered));
        }
        if self.check_attendance(student, course_id).await? {
            return Ok(Some(AttendanceFailure::AlreadyAttended));
        }
        Ok(None)
    }
}

#[async_trait]
impl AttendanceLedger for LiveLedger {
    async fn register_student(
        &self,
        student: Address,
        name: &str,
        student_id: &str,
    ) -> Result<PendingTransaction, LedgerError> {
        info!("Registering student {} on chain", student.short());
        self.send(
            REGISTER_STUDENT,
            &[
                Token::Address(student),
                Token::String(name.to_string()),
                Token::String(student_id.to_string()),
            ],
            None,
        )
        .await
    }

    async fn get_student_info(&self, student: Address) -> Result<StudentRecord, LedgerError> {
        let data = self.read(GET_STUDENT_INFO, &[Token::Address(student)], None).await?;
        let decoder = Decoder::new(&data);
        Ok(StudentRecord {
            address: student,
            name: decoder.string(0)?,
            student_id: decoder.string(1)?,
            is_registered: decoder.bool(2)?,
        })
    }

    async fn get_student_count(&self) -> Result<u64, LedgerError> {
        let data = self.read(GET_STUDENT_COUNT, &[], None).await?;
        Ok(Decoder::new(&data).uint(0)?)
    }

    async fn get_students(&self, start: u64, count: u64) -> Result<Vec<Address>, LedgerError> {
        let data = self
            .read(GET_STUDENTS, &[Token::Uint(start), Token::Uint(count)], None)
            .await?;
        Ok(Decoder::new(&data).address_array(0)?)
    }

    async fn create_course(
        &self,
        name: &str,
        start_time: u64,
        end_time: u64,
    ) -> Result<CourseCreation, LedgerError> {
        if start_time >= end_time {
            return Err(LedgerError::InvalidTimeRange);
        }

        let pending = self
            .send(
                CREATE_COURSE,
                &[
                    Token::String(name.to_string()),
                    Token::Uint(start_time),
                    Token::Uint(end_time),
                ],
                None,
            )
            .await?;

        // The id is only known once mined, so creation confirms eagerly.
        let raw = self.poller().poll(pending.hash()).await?;
        let receipt = parse_receipt(pending.hash(), &raw)?;
        if !receipt.success {
            return Err(LedgerError::Reverted(format!(
                "createCourse transaction {} failed",
                receipt.transaction_hash
            )));
        }

        let course_id = match course_id_from_logs(&raw) {
            Some(id) => id,
            None => {
                warn!("CourseCreated event missing from receipt, using course count");
                self.get_course_count().await?
            }
        };

        info!("Created course {} ({}) on chain", course_id, name);
        Ok(CourseCreation {
            course_id,
            transaction: PendingTransaction::settled(receipt),
        })
    }

    async fn get_course_info(&self, course_id: u64) -> Result<Course, LedgerError> {
        let data = self
            .read(GET_COURSE_INFO, &[Token::Uint(course_id)], Some(course_id))
            .await?;
        let decoder = Decoder::new(&data);
        let course = Course {
            id: course_id,
            name: decoder.string(0)?,
            start_time: decoder.uint(1)?,
            end_time: decoder.uint(2)?,
            teacher: decoder.address(3)?,
            is_active: decoder.bool(4)?,
        };

        if course.teacher == Address::ZERO && course.end_time == 0 {
            return Err(LedgerError::CourseNotFound(course_id));
        }
        Ok(course)
    }

    async fn get_course_count(&self) -> Result<u64, LedgerError> {
        let data = self.read(GET_COURSE_COUNT, &[], None).await?;
        Ok(Decoder::new(&data).uint(0)?)
    }

    async fn activate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        self.send(ACTIVATE_COURSE, &[Token::Uint(course_id)], Some(course_id))
            .await
    }

    async fn deactivate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        self.send(DEACTIVATE_COURSE, &[Token::Uint(course_id)], Some(course_id))
            .await
    }

    async fn record_attendance(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<PendingTransaction, LedgerError> {
        self.send(
            MANUAL_ATTENDANCE,
            &[Token::Address(student), Token::Uint(course_id)],
            Some(course_id),
        )
        .await
    }

    async fn batch_record_attendance(
        &self,
        students: &[Address],
        course_id: u64,
    ) -> Result<BatchAttendance, LedgerError> {
        let mut partition = BatchPartition::default();

        let course_failure = match self.get_course_info(course_id).await {
            Ok(course) if !course.is_active => Some(AttendanceFailure::CourseInactive),
            Ok(course) if !course.accepts_attendance_at(self.clock.unix_seconds()) => {
                Some(AttendanceFailure::OutOfTimeWindow)
            }
            Ok(_) => None,
            Err(LedgerError::CourseNotFound(_)) => Some(AttendanceFailure::CourseNotFound),
            Err(e) => return Err(e),
        };

        if let Some(reason) = course_failure {
            partition.failed = students
                .iter()
                .map(|&student| FailedAttendance { student, reason })
                .collect();
            return Ok(BatchAttendance {
                partition,
                transaction: None,
            });
        }

        let mut seen = HashSet::new();
        for &student in students {
            match self.precheck(student, course_id, &mut seen).await? {
                Some(reason) => partition.failed.push(FailedAttendance { student, reason }),
                None => partition.successful.push(student),
            }
        }

        if partition.successful.is_empty() {
            return Ok(BatchAttendance {
                partition,
                transaction: None,
            });
        }

        let transaction = self
            .send(
                BATCH_RECORD_ATTENDANCE,
                &[
                    Token::AddressArray(partition.successful.clone()),
                    Token::Uint(course_id),
                ],
                Some(course_id),
            )
            .await?;

        Ok(BatchAttendance {
            partition,
            transaction: Some(transaction),
        })
    }

    async fn check_attendance(&self, student: Address, course_id: u64) -> Result<bool, LedgerError> {
        let data = self
            .read(
                CHECK_ATTENDANCE,
                &[Token::Address(student), Token::Uint(course_id)],
                Some(course_id),
            )
            .await?;
        Ok(Decoder::new(&data).bool(0)?)
    }

    async fn get_attendance_details(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        let data = self
            .read(
                GET_ATTENDANCE_DETAILS,
                &[Token::Address(student), Token::Uint(course_id)],
                Some(course_id),
            )
            .await?;
        let decoder = Decoder::new(&data);
        if !decoder.bool(0)? {
            return Ok(None);
        }
        Ok(Some(AttendanceRecord {
            student_address: student,
            course_id,
            timestamp: decoder.uint(1)?,
        }))
    }

    async fn is_admin(&self, who: Address) -> Result<bool, LedgerError> {
        let data = self.read(IS_ADMIN, &[Token::Address(who)], None).await?;
        Ok(Decoder::new(&data).bool(0)?)
    }

    async fn has_system_access(&self, who: Address) -> Result<bool, LedgerError> {
        let data = self.read(HAS_SYSTEM_ACCESS, &[Token::Address(who)], None).await?;
        Ok(Decoder::new(&data).bool(0)?)
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        let data = self.read(OWNER, &[], None).await?;
        Ok(Decoder::new(&data).address(0)?)
    }
}

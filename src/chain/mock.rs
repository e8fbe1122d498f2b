//! In-process mock ledger used when no live contract is reachable.
//!
//! Mirrors the contract's rules (registration uniqueness, sequential course
//! ids, one attendance per student and course, active/time-window checks) on
//! top of injected repositories, and hands back settled transaction
//! descriptors so callers await confirmation exactly as they would on chain.

use crate::chain::error::{AttendanceFailure, LedgerError};
use crate::chain::ledger::{AttendanceLedger, BatchAttendance, CourseCreation, PendingTransaction};
use crate::chain::repository::{MemoryRepository, Repository};
use crate::chain::types::{
    Address, AttendanceRecord, BatchPartition, Course, FailedAttendance, StudentRecord, TxReceipt,
};
use crate::clock::Clock;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Well-known development account; owner, admin and system operator of the mock ledger.
pub const DEFAULT_OPERATOR: Address = Address::from_bytes([
    0x70, 0x99, 0x79, 0x70, 0xc5, 0x18, 0x12, 0xdc, 0x3a, 0x01, 0x0c, 0x7d, 0x01, 0xb5, 0x0e, 0x0d,
    0x17, 0xdc, 0x79, 0xc8,
]);

const DEFAULT_STUDENTS: [([u8; 20], &str, &str); 3] = [
    ([0x11; 20], "Zhang San", "2023001"),
    ([0x22; 20], "Li Si", "2023002"),
    ([0x33; 20], "Wang Wu", "2023003"),
];

const MAX_TEST_STUDENTS: usize = 50;
const MAX_TEST_COURSES: usize = 10;
const TEST_COURSE_NAMES: [&str; 5] = [
    "Math Tutoring",
    "Physics Lab",
    "English Listening",
    "Programming Practice",
    "Chemistry Lab",
];

/// Registration record plus its insertion sequence, so listing keeps
/// registration order the way the contract's student array does.
#[derive(Debug, Clone)]
pub struct StudentEntry {
    pub record: StudentRecord,
    pub seq: u64,
}

/// Repositories backing the mock ledger, one per entity.
#[derive(Clone)]
pub struct MockRepositories {
    pub students: Arc<dyn Repository<Address, StudentEntry>>,
    pub courses: Arc<dyn Repository<u64, Course>>,
    pub attendance: Arc<dyn Repository<(Address, u64), AttendanceRecord>>,
}

impl MockRepositories {
    pub fn in_memory() -> Self {
        Self {
            students: Arc::new(MemoryRepository::new()),
            courses: Arc::new(MemoryRepository::new()),
            attendance: Arc::new(MemoryRepository::new()),
        }
    }
}

struct RoleTable {
    owner: Address,
    admins: HashSet<Address>,
    system: HashSet<Address>,
}

struct TxCounters {
    nonce: u64,
    block_number: u64,
}

/// Summary returned by [`MockLedger::seed_test_data`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDataSummary {
    pub students: usize,
    pub courses: usize,
    pub attendances: usize,
    pub sample_students: Vec<StudentRecord>,
    pub sample_courses: Vec<Course>,
}

pub struct MockLedger {
    /// Students, courses and attendance records.
    repos: MockRepositories,

    /// Owner, admin and system membership.
    roles: RwLock<RoleTable>,

    /// Time source for attendance windows.
    clock: Arc<dyn Clock>,

    /// Serializes multi-step mutations so uniqueness checks are atomic.
    writer: Mutex<TxCounters>,
}

impl MockLedger {
    /// Empty ledger owned by [`DEFAULT_OPERATOR`].
    pub fn new(repos: MockRepositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repos,
            roles: RwLock::new(RoleTable {
                owner: DEFAULT_OPERATOR,
                admins: HashSet::new(),
                system: HashSet::new(),
            }),
            clock,
            writer: Mutex::new(TxCounters {
                nonce: 0,
                block_number: 1,
            }),
        }
    }

    /// In-memory ledger with the default operator roles and seed students.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        let ledger = Self::new(MockRepositories::in_memory(), clock);
        ledger.seed_defaults();
        ledger
    }

    fn seed_defaults(&self) {
        {
            let mut roles = self.roles.write();
            roles.owner = DEFAULT_OPERATOR;
            roles.admins.insert(DEFAULT_OPERATOR);
            roles.system.insert(DEFAULT_OPERATOR);
        }

        for (bytes, name, student_id) in DEFAULT_STUDENTS {
            let address = Address::from_bytes(bytes);
            if self.repos.students.get(&address).is_none() {
                self.insert_student(address, name, student_id);
            }
        }

        info!(
            "Mock ledger seeded, students: {}",
            self.repos.students.len()
        );
    }

    /// Drop all records and restore the default seed.
    pub async fn reset(&self) {
        let mut counters = self.writer.lock().await;
        self.repos.students.clear();
        self.repos.courses.clear();
        self.repos.attendance.clear();
        {
            let mut roles = self.roles.write();
            roles.admins.clear();
            roles.system.clear();
        }
        counters.nonce = 0;
        counters.block_number = 1;
        self.seed_defaults();
        info!("Mock ledger reset");
    }

    pub fn grant_admin(&self, who: Address) {
        self.roles.write().admins.insert(who);
    }

    fn insert_student(&self, address: Address, name: &str, student_id: &str) {
        let seq = self.repos.students.len() as u64;
        self.repos.students.put(
            address,
            StudentEntry {
                record: StudentRecord {
                    address,
                    name: name.to_string(),
                    student_id: student_id.to_string(),
                    is_registered: true,
                },
                seq,
            },
        );
    }

    fn settle(counters: &mut TxCounters, label: &str) -> PendingTransaction {
        counters.nonce += 1;
        counters.block_number += 1;

        let mut hasher = Sha256::new();
        hasher.update(b"mock-ledger");
        hasher.update(counters.nonce.to_le_bytes());
        hasher.update(label.as_bytes());
        PendingTransaction::settled(TxReceipt {
            transaction_hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number: counters.block_number,
            success: true,
        })
    }

    fn course(&self, course_id: u64) -> Result<Course, LedgerError> {
        self.repos
            .courses
            .get(&course_id)
            .ok_or(LedgerError::CourseNotFound(course_id))
    }

    /// Contract checks for a single attendance, in the contract's order.
    fn check_attendable(&self, student: Address, course_id: u64, now: u64) -> Result<(), LedgerError> {
        let registered = self
            .repos
            .students
            .get(&student)
            .map(|entry| entry.record.is_registered)
            .unwrap_or(false);
        if !registered {
            return Err(LedgerError::NotRegistered);
        }

        let course = self.course(course_id)?;
        if !course.is_active {
            return Err(LedgerError::CourseInactive);
        }
        if !course.accepts_attendance_at(now) {
            return Err(LedgerError::OutOfTimeWindow);
        }
        if self.repos.attendance.get(&(student, course_id)).is_some() {
            return Err(LedgerError::AlreadyAttended);
        }
        Ok(())
    }

    fn set_course_active(&self, course_id: u64, active: bool) -> Result<(), LedgerError> {
        let mut course = self.course(course_id)?;
        course.is_active = active;
        self.repos.courses.put(course_id, course);
        Ok(())
    }

    /// Populate the ledger with randomly addressed students, upcoming courses
    /// and roughly 80% attendance coverage.
    pub async fn seed_test_data(&self, count: usize, teacher: Address) -> TestDataSummary {
        let _counters = self.writer.lock().await;
        let now = self.clock.unix_seconds();

        let student_total = count.min(MAX_TEST_STUDENTS);
        let course_total = count.div_ceil(5).min(MAX_TEST_COURSES);

        let mut students = Vec::with_capacity(student_total);
        for i in 1..=student_total {
            let mut bytes = [0u8; 20];
            OsRng.fill_bytes(&mut bytes);
            let address = Address::from_bytes(bytes);
            let name = format!("Test Student {}", i);
            let student_id = format!("TEST2023{:03}", i);
            self.insert_student(address, &name, &student_id);
            students.push(StudentRecord {
                address,
                name,
                student_id,
                is_registered: true,
            });
        }

        let mut courses = Vec::with_capacity(course_total);
        for i in 1..=course_total as u64 {
            let id = self.repos.courses.len() as u64 + 1;
            let start_time = now + i * 86_400;
            let course = Course {
                id,
                name: format!("{} {}", TEST_COURSE_NAMES[i as usize % TEST_COURSE_NAMES.len()], i),
                start_time,
                end_time: start_time + 7_200,
                teacher,
                is_active: true,
            };
            self.repos.courses.put(id, course.clone());
            courses.push(course);
        }

        let mut attendances = 0;
        for student in &students {
            for course in &courses {
                if OsRng.next_u32() % 100 < 80 {
                    self.repos.attendance.put(
                        (student.address, course.id),
                        AttendanceRecord {
                            student_address: student.address,
                            course_id: course.id,
                            timestamp: course.start_time + (OsRng.next_u32() % 3_600) as u64,
                        },
                    );
                    attendances += 1;
                }
            }
        }

        info!(
            "Generated test data: {} students, {} courses, {} attendance records",
            students.len(),
            courses.len(),
            attendances
        );

        TestDataSummary {
            students: students.len(),
            courses: courses.len(),
            attendances,
            sample_students: students.iter().take(3).cloned().collect(),
            sample_courses: courses.iter().take(3).cloned().collect(),
        }
    }
}

#[async_trait]
impl AttendanceLedger for MockLedger {
    async fn register_student(
        &self,
        student: Address,
        name: &str,
        student_id: &str,
    ) -> Result<PendingTransaction, LedgerError> {
        let mut counters = self.writer.lock().await;
        if self.repos.students.get(&student).is_some() {
            debug!("Mock register rejected, {} already registered", student.short());
            return Err(LedgerError::AlreadyRegistered);
        }

        self.insert_student(student, name, student_id);
        info!("Mock registered student {} ({})", student.short(), student_id);
        Ok(Self::settle(&mut counters, "registerStudent"))
    }

    async fn get_student_info(&self, student: Address) -> Result<StudentRecord, LedgerError> {
        Ok(self
            .repos
            .students
            .get(&student)
            .map(|entry| entry.record)
            .unwrap_or_else(|| StudentRecord::unregistered(student)))
    }

    async fn get_student_count(&self) -> Result<u64, LedgerError> {
        Ok(self.repos.students.len() as u64)
    }

    async fn get_students(&self, start: u64, count: u64) -> Result<Vec<Address>, LedgerError> {
        let mut entries = self.repos.students.list();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries
            .into_iter()
            .skip(start as usize)
            .take(count as usize)
            .map(|entry| entry.record.address)
            .collect())
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

        let mut counters = self.writer.lock().await;
        let course_id = self.repos.courses.len() as u64 + 1;
        let teacher = self.roles.read().owner;
        self.repos.courses.put(
            course_id,
            Course {
                id: course_id,
                name: name.to_string(),
                start_time,
                end_time,
                teacher,
                is_active: true,
            },
        );

        info!("Mock created course {} ({})", course_id, name);
        Ok(CourseCreation {
            course_id,
            transaction: Self::settle(&mut counters, "createCourse"),
        })
    }

    async fn get_course_info(&self, course_id: u64) -> Result<Course, LedgerError> {
        self.course(course_id)
    }

    async fn get_course_count(&self) -> Result<u64, LedgerError> {
        Ok(self.repos.courses.len() as u64)
    }

    async fn activate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        let mut counters = self.writer.lock().await;
        self.set_course_active(course_id, true)?;
        info!("Mock activated course {}", course_id);
        Ok(Self::settle(&mut counters, "activateCourse"))
    }

    async fn deactivate_course(&self, course_id: u64) -> Result<PendingTransaction, LedgerError> {
        let mut counters = self.writer.lock().await;
        self.set_course_active(course_id, false)?;
        info!("Mock deactivated course {}", course_id);
        Ok(Self::settle(&mut counters, "deactivateCourse"))
    }

    async fn record_attendance(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<PendingTransaction, LedgerError> {
        let mut counters = self.writer.lock().await;
        let now = self.clock.unix_seconds();
        self.check_attendable(student, course_id, now)?;

        self.repos.attendance.put(
            (student, course_id),
            AttendanceRecord {
                student_address: student,
                course_id,
                timestamp: now,
            },
        );

        info!("Mock attendance: {} in course {}", student.short(), course_id);
        Ok(Self::settle(&mut counters, "recordAttendance"))
    }

    async fn batch_record_attendance(
        &self,
        students: &[Address],
        course_id: u64,
    ) -> Result<BatchAttendance, LedgerError> {
        let mut counters = self.writer.lock().await;
        let now = self.clock.unix_seconds();
        let mut partition = BatchPartition::default();

        for &student in students {
            match self.check_attendable(student, course_id, now) {
                Ok(()) => {
                    self.repos.attendance.put(
                        (student, course_id),
                        AttendanceRecord {
                            student_address: student,
                            course_id,
                            timestamp: now,
                        },
                    );
                    partition.successful.push(student);
                }
                Err(err) => match AttendanceFailure::from_ledger_error(&err) {
                    Some(reason) => partition.failed.push(FailedAttendance { student, reason }),
                    None => return Err(err),
                },
            }
        }

        info!(
            "Mock batch attendance for course {}: {} recorded, {} failed",
            course_id,
            partition.successful.len(),
            partition.failed.len()
        );

        let transaction = (!partition.successful.is_empty())
            .then(|| Self::settle(&mut counters, "batchRecordAttendance"));
        Ok(BatchAttendance {
            partition,
            transaction,
        })
    }

    async fn check_attendance(&self, student: Address, course_id: u64) -> Result<bool, LedgerError> {
        Ok(self.repos.attendance.get(&(student, course_id)).is_some())
    }

    async fn get_attendance_details(
        &self,
        student: Address,
        course_id: u64,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        Ok(self.repos.attendance.get(&(student, course_id)))
    }

    async fn is_admin(&self, who: Address) -> Result<bool, LedgerError> {
        let roles = self.roles.read();
        Ok(roles.owner == who || roles.admins.contains(&who))
    }

    async fn has_system_access(&self, who: Address) -> Result<bool, LedgerError> {
        Ok(self.roles.read().system.contains(&who))
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        Ok(self.roles.read().owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000;

    fn ledger() -> (MockLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        (MockLedger::with_defaults(clock.clone()), clock)
    }

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    async fn open_course(ledger: &MockLedger) -> u64 {
        let now = NOW as u64;
        ledger
            .create_course("Distributed Systems", now - 3_600, now + 3_600)
            .await
            .unwrap()
            .course_id
    }

    #[tokio::test]
    async fn test_register_twice_is_rejected_and_record_unchanged() {
        let (ledger, _) = ledger();
        let student = addr(0xaa);

        let tx = ledger.register_student(student, "Alice", "S1").await.unwrap();
        assert!(tx.wait().await.unwrap().success);

        let second = ledger.register_student(student, "Mallory", "S2").await;
        assert_eq!(second.unwrap_err(), LedgerError::AlreadyRegistered);

        let record = ledger.get_student_info(student).await.unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(record.student_id, "S1");
    }

    #[tokio::test]
    async fn test_seed_students_are_registered_in_order() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.get_student_count().await.unwrap(), 3);
        let students = ledger.get_students(0, 10).await.unwrap();
        assert_eq!(students, vec![addr(0x11), addr(0x22), addr(0x33)]);
        assert_eq!(ledger.get_students(1, 1).await.unwrap(), vec![addr(0x22)]);
    }

    #[tokio::test]
    async fn test_course_ids_are_sequential_from_one() {
        let (ledger, _) = ledger();
        let first = open_course(&ledger).await;
        let second = open_course(&ledger).await;
        assert_eq!((first, second), (1, 2));
        assert_eq!(ledger.get_course_count().await.unwrap(), 2);
        assert_eq!(
            ledger.get_course_info(9).await.unwrap_err(),
            LedgerError::CourseNotFound(9)
        );
    }

    #[tokio::test]
    async fn test_create_course_rejects_inverted_window() {
        let (ledger, _) = ledger();
        let result = ledger.create_course("Backwards", 200, 100).await;
        assert_eq!(result.unwrap_err(), LedgerError::InvalidTimeRange);
    }

    #[tokio::test]
    async fn test_second_attendance_fails_already_attended() {
        let (ledger, _) = ledger();
        let course = open_course(&ledger).await;

        ledger.record_attendance(addr(0x11), course).await.unwrap();
        let again = ledger.record_attendance(addr(0x11), course).await;
        assert_eq!(again.unwrap_err(), LedgerError::AlreadyAttended);
        assert!(ledger.check_attendance(addr(0x11), course).await.unwrap());
    }

    #[tokio::test]
    async fn test_attendance_rule_violations() {
        let (ledger, clock) = ledger();
        let course = open_course(&ledger).await;

        assert_eq!(
            ledger.record_attendance(addr(0x99), course).await.unwrap_err(),
            LedgerError::NotRegistered
        );

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(
            ledger.record_attendance(addr(0x11), course).await.unwrap_err(),
            LedgerError::OutOfTimeWindow
        );

        ledger.deactivate_course(course).await.unwrap();
        assert_eq!(
            ledger.record_attendance(addr(0x22), course).await.unwrap_err(),
            LedgerError::CourseInactive
        );
    }

    #[tokio::test]
    async fn test_reactivated_course_accepts_attendance() {
        let (ledger, _) = ledger();
        let course = open_course(&ledger).await;

        ledger.deactivate_course(course).await.unwrap();
        assert!(!ledger.get_course_info(course).await.unwrap().is_active);

        let tx = ledger.activate_course(course).await.unwrap();
        assert!(tx.wait().await.unwrap().success);
        assert!(ledger.get_course_info(course).await.unwrap().is_active);
        ledger.record_attendance(addr(0x11), course).await.unwrap();

        assert_eq!(
            ledger.activate_course(42).await.unwrap_err(),
            LedgerError::CourseNotFound(42)
        );
    }

    #[tokio::test]
    async fn test_batch_partitions_per_student() {
        let (ledger, _) = ledger();
        let course = open_course(&ledger).await;
        let unregistered = addr(0xa1);
        let valid = addr(0x22);

        let batch = ledger
            .batch_record_attendance(&[unregistered, valid], course)
            .await
            .unwrap();

        assert_eq!(batch.partition.successful, vec![valid]);
        assert_eq!(
            batch.partition.failed,
            vec![FailedAttendance {
                student: unregistered,
                reason: AttendanceFailure::NotRegistered,
            }]
        );
        assert!(batch.transaction.is_some());
        assert!(ledger.check_attendance(valid, course).await.unwrap());
        assert!(!ledger.check_attendance(unregistered, course).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_with_no_eligible_students_has_no_transaction() {
        let (ledger, _) = ledger();
        let course = open_course(&ledger).await;
        let batch = ledger
            .batch_record_attendance(&[addr(0xb1), addr(0xb2)], course)
            .await
            .unwrap();
        assert!(batch.partition.successful.is_empty());
        assert_eq!(batch.partition.failed.len(), 2);
        assert!(batch.transaction.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_inside_batch_fails_second_time() {
        let (ledger, _) = ledger();
        let course = open_course(&ledger).await;
        let batch = ledger
            .batch_record_attendance(&[addr(0x11), addr(0x11)], course)
            .await
            .unwrap();
        assert_eq!(batch.partition.successful, vec![addr(0x11)]);
        assert_eq!(batch.partition.failed[0].reason, AttendanceFailure::AlreadyAttended);
    }

    #[tokio::test]
    async fn test_default_roles() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.owner().await.unwrap(), DEFAULT_OPERATOR);
        assert!(ledger.is_admin(DEFAULT_OPERATOR).await.unwrap());
        assert!(ledger.has_system_access(DEFAULT_OPERATOR).await.unwrap());
        assert!(!ledger.is_admin(addr(0x11)).await.unwrap());

        ledger.grant_admin(addr(0x11));
        assert!(ledger.is_admin(addr(0x11)).await.unwrap());
        assert!(!ledger.has_system_access(addr(0x11)).await.unwrap());
    }

    #[tokio::test]
    async fn test_transaction_hashes_are_distinct() {
        let (ledger, _) = ledger();
        let a = ledger.register_student(addr(0xc1), "A", "1").await.unwrap();
        let b = ledger.register_student(addr(0xc2), "B", "2").await.unwrap();
        assert_ne!(a.hash(), b.hash());
        assert!(a.hash().starts_with("0x"));
    }

    #[tokio::test]
    async fn test_seed_test_data_caps_counts() {
        let (ledger, _) = ledger();
        let summary = ledger.seed_test_data(200, DEFAULT_OPERATOR).await;
        assert_eq!(summary.students, 50);
        assert_eq!(summary.courses, 10);
        assert!(summary.attendances <= 500);
        assert_eq!(summary.sample_students.len(), 3);
        assert_eq!(ledger.get_student_count().await.unwrap(), 53);

        ledger.reset().await;
        assert_eq!(ledger.get_student_count().await.unwrap(), 3);
        assert_eq!(ledger.get_course_count().await.unwrap(), 0);
    }
}

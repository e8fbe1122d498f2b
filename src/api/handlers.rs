//! Route handlers for users, students, courses, attendance and chain status.

use crate::api::auth::{caller_address, require_role};
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::chain::accessor::BackendMode;
use crate::chain::error::LedgerError;
use crate::chain::gateway::ConnectionStatus;
use crate::chain::ledger::AttendanceLedger;
use crate::chain::mock::TestDataSummary;
use crate::chain::types::{Address, Course, FailedAttendance, StudentRecord};
use crate::roles::gate::Requirement;
use crate::roles::types::{Role, RoleResolution};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_TEST_DATA_COUNT: usize = 10;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUserRequest {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckUserResponse {
    pub success: bool,
    #[serde(flatten)]
    pub resolution: RoleResolution,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub wallet_address: Option<String>,
    pub name: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserResponse {
    pub success: bool,
    pub message: String,
    pub user_info: StudentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyAccessRequest {
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAccessResponse {
    pub success: bool,
    pub message: String,
    pub role: Option<Role>,
    pub is_admin: bool,
    pub is_system: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDataRequest {
    pub wallet_address: Option<String>,
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TestDataResponse {
    pub success: bool,
    pub message: String,
    pub data: TestDataSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentRequest {
    pub student_address: Option<String>,
    pub name: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentResponse {
    pub success: bool,
    pub message: String,
    pub student: StudentRecord,
    pub transaction_hash: String,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub success: bool,
    pub student: StudentRecord,
}

#[derive(Debug, Serialize)]
pub struct StudentListResponse {
    pub success: bool,
    pub students: Vec<StudentRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingStudentsResponse {
    pub success: bool,
    pub course_id: u64,
    pub course_name: String,
    pub students: Vec<StudentRecord>,
    pub total: usize,
}

/// Body of admin-gated calls that carry nothing but the caller.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerRequest {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseRequest {
    pub wallet_address: Option<String>,
    pub name: Option<String>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseResponse {
    pub success: bool,
    pub message: String,
    pub course_id: u64,
    pub transaction_hash: String,
}

#[derive(Debug, Serialize)]
pub struct CourseResponse {
    pub success: bool,
    pub course: Course,
}

#[derive(Debug, Serialize)]
pub struct CourseListResponse {
    pub success: bool,
    pub courses: Vec<Course>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub success: bool,
    pub message: String,
    pub transaction_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRequest {
    pub wallet_address: Option<String>,
    pub course_id: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceResponse {
    pub success: bool,
    pub message: String,
    pub student_address: Address,
    pub course_id: u64,
    pub transaction_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAttendanceRequest {
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub students: Vec<String>,
    pub course_id: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAttendanceResponse {
    pub success: bool,
    pub message: String,
    pub course_id: u64,
    pub successful: Vec<Address>,
    pub failed: Vec<FailedAttendance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStatusResponse {
    pub success: bool,
    pub student_address: Address,
    pub course_id: u64,
    pub attended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumStatusResponse {
    pub success: bool,
    pub mode: BackendMode,
    pub fallback_mode: bool,
    pub contract_address: Option<Address>,
    pub block_number: u64,
    #[serde(flatten)]
    pub connection: ConnectionStatus,
}

// ==================== Helpers ====================

fn ledger(state: &AppState) -> Result<Arc<dyn AttendanceLedger>, ApiError> {
    Ok(state.accessor.current()?)
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Ok(raw.parse()?)
}

/// Trimmed, non-empty text field.
fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required field: {}", field)))
}

/// Every registered student, in registration order.
async fn registered_students(
    ledger: &dyn AttendanceLedger,
) -> Result<Vec<StudentRecord>, ApiError> {
    let count = ledger.get_student_count().await?;
    let addresses = ledger.get_students(0, count).await?;

    let mut students = Vec::with_capacity(addresses.len());
    for address in addresses {
        match ledger.get_student_info(address).await {
            Ok(record) if record.is_registered => students.push(record),
            Ok(_) => {}
            Err(e) => warn!("Skipping student {}: {}", address.short(), e),
        }
    }
    Ok(students)
}

// ==================== Users ====================

pub async fn check_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckUserRequest>,
) -> Result<Json<CheckUserResponse>, ApiError> {
    let raw = payload
        .wallet_address
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Wallet address required".to_string()))?;
    let address = parse_address(&raw)?;

    let resolution = state.gate.resolver().resolve_role(address).await?;
    Ok(Json(CheckUserResponse {
        success: true,
        resolution,
    }))
}

pub async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<Response, ApiError> {
    let address = parse_address(&required(payload.wallet_address, "walletAddress")?)?;
    let name = required(payload.name, "name")?;
    let student_id = required(payload.student_id, "studentId")?;

    let ledger = ledger(&state)?;
    let existing = ledger.get_student_info(address).await?;
    if existing.is_registered {
        warn!("Registration refused, {} already registered", address.short());
        let body = RegisterUserResponse {
            success: false,
            message: LedgerError::AlreadyRegistered.user_message(),
            user_info: existing,
            transaction_hash: None,
        };
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let receipt = ledger
        .register_student(address, &name, &student_id)
        .await?
        .wait()
        .await?;
    state.gate.invalidate(address).await;
    info!("Registered {} as student {}", address.short(), student_id);

    let body = RegisterUserResponse {
        success: true,
        message: "Registration successful".to_string(),
        user_info: StudentRecord {
            address,
            name,
            student_id,
            is_registered: true,
        },
        transaction_hash: Some(receipt.transaction_hash),
    };
    Ok(Json(body).into_response())
}

pub async fn emergency_access(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(payload): Json<EmergencyAccessRequest>,
) -> Result<Json<EmergencyAccessResponse>, ApiError> {
    let address = parse_address(&address)?;
    let key = payload
        .key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Access key required".to_string()))?;

    let grant = state.gate.resolver().grant_emergency_access(address, &key)?;
    Ok(Json(EmergencyAccessResponse {
        success: true,
        message: "Emergency access granted".to_string(),
        role: grant.role,
        is_admin: grant.is_admin,
        is_system: grant.is_system,
    }))
}

pub async fn generate_test_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TestDataRequest>,
) -> Result<Json<TestDataResponse>, ApiError> {
    if !state.development {
        return Err(ApiError::Forbidden(
            "Test data generation is only available in development mode".to_string(),
        ));
    }
    let caller = require_role(
        &state,
        &headers,
        payload.wallet_address.as_deref(),
        Requirement::System,
    )
    .await?;

    if state.accessor.mode() != BackendMode::Mock {
        return Err(ApiError::BadRequest(
            "Test data can only be generated while the mock ledger is active".to_string(),
        ));
    }

    let count = payload.count.unwrap_or(DEFAULT_TEST_DATA_COUNT);
    if count == 0 {
        return Err(ApiError::BadRequest("count must be positive".to_string()));
    }

    let summary = state.accessor.mock().seed_test_data(count, caller).await;
    info!(
        "Generated {} students, {} courses, {} attendance records",
        summary.students, summary.courses, summary.attendances
    );

    Ok(Json(TestDataResponse {
        success: true,
        message: format!(
            "Generated {} students and {} courses",
            summary.students, summary.courses
        ),
        data: summary,
    }))
}

// ==================== Students ====================

pub async fn register_student(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterStudentRequest>,
) -> Result<Response, ApiError> {
    let address = parse_address(&required(payload.student_address, "studentAddress")?)?;
    let name = required(payload.name, "name")?;
    let student_id = required(payload.student_id, "studentId")?;

    let ledger = ledger(&state)?;
    if ledger.get_student_info(address).await?.is_registered {
        return Err(LedgerError::AlreadyRegistered.into());
    }

    let receipt = ledger
        .register_student(address, &name, &student_id)
        .await?
        .wait()
        .await?;
    state.gate.invalidate(address).await;
    info!("Registered student {} ({})", student_id, address.short());

    let body = RegisterStudentResponse {
        success: true,
        message: "Student registered".to_string(),
        student: StudentRecord {
            address,
            name,
            student_id,
            is_registered: true,
        },
        transaction_hash: receipt.transaction_hash,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_student(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<StudentResponse>, ApiError> {
    let address = parse_address(&address)?;
    let record = ledger(&state)?.get_student_info(address).await?;
    if !record.is_registered {
        return Err(ApiError::NotFound("Student not registered".to_string()));
    }
    Ok(Json(StudentResponse {
        success: true,
        student: record,
    }))
}

pub async fn list_students(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StudentListResponse>, ApiError> {
    require_role(&state, &headers, None, Requirement::Admin).await?;

    let students = registered_students(ledger(&state)?.as_ref()).await?;
    Ok(Json(StudentListResponse {
        success: true,
        total: students.len(),
        students,
    }))
}

pub async fn remaining_students(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(course_id): Path<u64>,
) -> Result<Json<RemainingStudentsResponse>, ApiError> {
    require_role(&state, &headers, None, Requirement::Admin).await?;

    let ledger = ledger(&state)?;
    let course = ledger.get_course_info(course_id).await?;

    let mut remaining = Vec::new();
    for student in registered_students(ledger.as_ref()).await? {
        if !ledger.check_attendance(student.address, course_id).await? {
            remaining.push(student);
        }
    }

    Ok(Json(RemainingStudentsResponse {
        success: true,
        course_id,
        course_name: course.name,
        total: remaining.len(),
        students: remaining,
    }))
}

// ==================== Courses ====================

pub async fn create_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<Response, ApiError> {
    let caller = require_role(
        &state,
        &headers,
        payload.wallet_address.as_deref(),
        Requirement::Admin,
    )
    .await?;

    let name = required(payload.name, "name")?;
    let (start_time, end_time) = match (payload.start_time, payload.end_time) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err(ApiError::BadRequest(
                "Missing required field: startTime/endTime".to_string(),
            ))
        }
    };
    if start_time >= end_time {
        return Err(LedgerError::InvalidTimeRange.into());
    }

    let creation = ledger(&state)?
        .create_course(&name, start_time, end_time)
        .await?;
    let course_id = creation.course_id;
    let receipt = creation.transaction.wait().await?;
    info!("Course {} '{}' created by {}", course_id, name, caller.short());

    let body = CreateCourseResponse {
        success: true,
        message: "Course created".to_string(),
        course_id,
        transaction_hash: receipt.transaction_hash,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_courses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CourseListResponse>, ApiError> {
    let ledger = ledger(&state)?;
    let count = ledger.get_course_count().await?;

    let mut courses = Vec::new();
    for course_id in 1..=count {
        match ledger.get_course_info(course_id).await {
            Ok(course) => courses.push(course),
            Err(e) => warn!("Skipping course {}: {}", course_id, e),
        }
    }

    Ok(Json(CourseListResponse {
        success: true,
        total: courses.len(),
        courses,
    }))
}

pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<u64>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course = ledger(&state)?.get_course_info(course_id).await?;
    Ok(Json(CourseResponse {
        success: true,
        course,
    }))
}

pub async fn deactivate_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(course_id): Path<u64>,
    payload: Option<Json<CallerRequest>>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let caller = require_role(
        &state,
        &headers,
        payload.wallet_address.as_deref(),
        Requirement::Admin,
    )
    .await?;

    let ledger = ledger(&state)?;
    ledger.get_course_info(course_id).await?;
    let receipt = ledger.deactivate_course(course_id).await?.wait().await?;
    info!("Course {} deactivated by {}", course_id, caller.short());

    Ok(Json(TransactionResponse {
        success: true,
        message: format!("Course {} deactivated", course_id),
        transaction_hash: receipt.transaction_hash,
    }))
}

// ==================== Attendance ====================

pub async fn record_attendance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AttendanceRequest>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let student = caller_address(
        &headers,
        payload.wallet_address.as_deref(),
        state.development,
    )?;
    let course_id = payload
        .course_id
        .ok_or_else(|| ApiError::BadRequest("Missing required field: courseId".to_string()))?;

    let receipt = ledger(&state)?
        .record_attendance(student, course_id)
        .await?
        .wait()
        .await?;
    info!("Attendance recorded for {} in course {}", student.short(), course_id);

    Ok(Json(AttendanceResponse {
        success: true,
        message: "Attendance recorded".to_string(),
        student_address: student,
        course_id,
        transaction_hash: receipt.transaction_hash,
    }))
}

pub async fn batch_attendance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<BatchAttendanceRequest>,
) -> Result<Json<BatchAttendanceResponse>, ApiError> {
    require_role(
        &state,
        &headers,
        payload.wallet_address.as_deref(),
        Requirement::Admin,
    )
    .await?;

    let course_id = payload
        .course_id
        .ok_or_else(|| ApiError::BadRequest("Missing required field: courseId".to_string()))?;
    if payload.students.is_empty() {
        return Err(ApiError::BadRequest("Student list is empty".to_string()));
    }
    let students = payload
        .students
        .iter()
        .map(|raw| parse_address(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let batch = ledger(&state)?
        .batch_record_attendance(&students, course_id)
        .await?;
    let transaction_hash = match batch.transaction {
        Some(pending) => Some(pending.wait().await?.transaction_hash),
        None => None,
    };

    let partition = batch.partition;
    if partition.is_partial() {
        warn!(
            "Batch attendance for course {}: {} recorded, {} failed",
            course_id,
            partition.successful.len(),
            partition.failed.len()
        );
    } else {
        info!(
            "Batch attendance for course {}: {} recorded",
            course_id,
            partition.successful.len()
        );
    }

    Ok(Json(BatchAttendanceResponse {
        success: true,
        message: format!(
            "Recorded attendance for {} of {} students",
            partition.successful.len(),
            students.len()
        ),
        course_id,
        successful: partition.successful,
        failed: partition.failed,
        transaction_hash,
    }))
}

pub async fn get_attendance(
    State(state): State<Arc<AppState>>,
    Path((student, course_id)): Path<(String, u64)>,
) -> Result<Json<AttendanceStatusResponse>, ApiError> {
    let student = parse_address(&student)?;
    let record = ledger(&state)?
        .get_attendance_details(student, course_id)
        .await?;

    Ok(Json(AttendanceStatusResponse {
        success: true,
        student_address: student,
        course_id,
        attended: record.is_some(),
        timestamp: record.map(|r| r.timestamp),
    }))
}

// ==================== Chain Status ====================

pub async fn ethereum_status(State(state): State<Arc<AppState>>) -> Json<EthereumStatusResponse> {
    let connection = state.accessor.gateway().status();
    let mode = state.accessor.mode();

    Json(EthereumStatusResponse {
        success: true,
        mode,
        fallback_mode: mode == BackendMode::Mock,
        contract_address: state.contract_address,
        block_number: connection.current_block,
        connection,
    })
}

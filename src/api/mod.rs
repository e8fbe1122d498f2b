//! HTTP API over the attendance ledger.
//!
//! Every response is JSON with a `success` flag. Failures carry a `message`
//! and an HTTP status derived from [`ApiError`].

pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use crate::chain::accessor::ContractAccessor;
use crate::chain::types::Address;
use crate::roles::gate::RoleGate;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for the API handlers.
pub struct AppState {
    /// Ledger selection shared with the mode watcher.
    pub accessor: Arc<ContractAccessor>,

    /// Role checks for privileged routes.
    pub gate: Arc<RoleGate>,

    /// Configured contract, reported by the status endpoint.
    pub contract_address: Option<Address>,

    /// Development mode relaxes caller identification and role gating.
    pub development: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/users/check", post(handlers::check_user))
        .route("/api/users/register", post(handlers::register_user))
        .route(
            "/api/users/generate-test-data",
            post(handlers::generate_test_data),
        )
        .route(
            "/api/users/:address/emergency-access",
            post(handlers::emergency_access),
        )
        .route("/api/students", get(handlers::list_students))
        .route("/api/students/register", post(handlers::register_student))
        .route(
            "/api/students/remaining/:course_id",
            get(handlers::remaining_students),
        )
        .route("/api/students/:address", get(handlers::get_student))
        .route(
            "/api/courses",
            get(handlers::list_courses).post(handlers::create_course),
        )
        .route("/api/courses/:course_id", get(handlers::get_course))
        .route(
            "/api/courses/:course_id/deactivate",
            post(handlers::deactivate_course),
        )
        .route("/api/attendance", post(handlers::record_attendance))
        .route("/api/attendance/batch", post(handlers::batch_attendance))
        .route(
            "/api/attendance/:student/:course_id",
            get(handlers::get_attendance),
        )
        .route("/api/ethereum/status", get(handlers::ethereum_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

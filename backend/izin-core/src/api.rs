// src/api.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::model::{date_key, AttendanceRecord, LeaveRequest, Student};
use crate::recorder::{LeaveRecorder, RecordError};
use crate::roster::{RosterCache, RosterError};
use crate::validator::{LeaveFields, ValidationError, Validator};

const DEFAULT_SUGGEST_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("A submission for student {student_id} on {date} is already in progress")]
    InFlight { student_id: String, date: NaiveDate },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, code, message) = match &self {
            AppError::Validation(e) => {
                info!("Rejected submission: {}", e);
                let code = match e {
                    ValidationError::MissingField(_) => "missing_field",
                    ValidationError::InvalidDate(_) => "invalid_date",
                    ValidationError::DateInPast { .. } => "date_in_past",
                    ValidationError::DeadlinePassed { .. } => "deadline_passed",
                };
                (StatusCode::UNPROCESSABLE_ENTITY, code, e.to_string())
            }
            AppError::Roster(RosterError::Unavailable(source)) => {
                error!("Roster unavailable: {:?}", source);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "roster_unavailable",
                    "Could not load the student list. Please try again later.".to_string(),
                )
            }
            AppError::Roster(RosterError::NotLoaded) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "roster_not_loaded",
                "The student list is not available yet. Please try again later.".to_string(),
            ),
            AppError::Record(e) => {
                error!("Error occurred: {:?}", e);
                if e.is_partial() {
                    (
                        StatusCode::BAD_GATEWAY,
                        "attendance_sync_failed",
                        "The leave notice was saved, but updating attendance failed. Please submit again."
                            .to_string(),
                    )
                } else {
                    (
                        StatusCode::BAD_GATEWAY,
                        "store_unavailable",
                        "Failed to send data. Please try again.".to_string(),
                    )
                }
            }
            AppError::InFlight { .. } => {
                warn!("{}", self);
                (StatusCode::CONFLICT, "submission_in_progress", self.to_string())
            }
        };

        (
            status_code,
            Json(ErrorBody {
                error: code,
                message,
            }),
        )
            .into_response()
    }
}

// --- Duplicate submission guard ---

/// Keys of submissions currently being recorded by this process.
#[derive(Default)]
pub struct InFlight {
    keys: Mutex<HashSet<(NaiveDate, String)>>,
}

pub struct InFlightGuard {
    owner: Arc<InFlight>,
    key: (NaiveDate, String),
}

impl InFlight {
    pub fn try_claim(self: &Arc<Self>, date: NaiveDate, student_id: &str) -> Option<InFlightGuard> {
        let key = (date, student_id.to_string());
        let mut keys = self.keys.lock().unwrap_or_else(|p| p.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            owner: self.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self.owner.keys.lock().unwrap_or_else(|p| p.into_inner());
        keys.remove(&self.key);
    }
}

// --- State & routes ---

#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<RosterCache>,
    pub validator: Validator,
    pub recorder: Arc<LeaveRecorder>,
    pub clock: Arc<dyn Clock>,
    pub in_flight: Arc<InFlight>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/students", get(handle_list_students))
        .route("/api/students/suggest", get(handle_suggest_students))
        .route("/api/students/reload", post(handle_reload_students))
        .route("/api/leave", post(handle_submit_leave))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_list_students(
    State(state): State<AppState>,
) -> Result<Json<Vec<Student>>, AppError> {
    let roster = state.roster.snapshot().await?;
    Ok(Json(roster.students().to_vec()))
}

#[derive(Debug, Deserialize)]
struct SuggestParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

async fn handle_suggest_students(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<Vec<Student>>, AppError> {
    let roster = state.roster.snapshot().await?;
    let limit = params.limit.unwrap_or(DEFAULT_SUGGEST_LIMIT);
    Ok(Json(
        roster
            .suggest(&params.q, limit)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

async fn handle_reload_students(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    info!("Handling roster reload request...");
    let roster = state.roster.refresh().await?;
    info!("Roster reloaded: {} students keyed by {:?}", roster.len(), roster.key());
    Ok(Json(serde_json::json!({
        "status": "ok",
        "students": roster.len(),
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: &'static str,
    pub message: String,
    pub date: String,
    pub student_id: String,
    pub leave: LeaveRequest,
    pub attendance: AttendanceRecord,
}

async fn handle_submit_leave(
    State(state): State<AppState>,
    Json(fields): Json<LeaveFields>,
) -> Result<Json<SubmitResponse>, AppError> {
    let now_local = state.clock.now().naive_local();
    // Date rules do not need the roster and win over its absence.
    state.validator.check_date(&fields.date, now_local)?;
    let roster = state.roster.snapshot().await?;
    let leave = state.validator.validate(&fields, &roster, now_local)?;

    let _guard = state
        .in_flight
        .try_claim(leave.date, &leave.student_id)
        .ok_or_else(|| AppError::InFlight {
            student_id: leave.student_id.clone(),
            date: leave.date,
        })?;

    let recorded = state.recorder.record(&leave).await?;
    Ok(Json(SubmitResponse {
        status: "ok",
        message: "Leave notice recorded and attendance updated".to_string(),
        date: date_key(leave.date),
        student_id: leave.student_id,
        leave: recorded.leave,
        attendance: recorded.attendance,
    }))
}

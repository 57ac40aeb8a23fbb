// src/web/timesheets.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult, AppState};
use crate::employee::EmployeeId;
use crate::error::ValidationError;
use crate::session::Session;
use crate::timesheet::{
    week_start, ReviewFilter, Reviewer, TimesheetAudit, TimesheetEntry, TimesheetInput,
};

#[derive(Debug, Default, Deserialize)]
pub struct WeekQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct WeekView {
    pub employee_id: EmployeeId,
    pub week_start: NaiveDate,
    pub entries: Vec<TimesheetEntry>,
}

/// Review remarks. The body is optional; approving needs no remarks.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub remarks: Option<String>,
}

fn session_employee(session: &Session) -> Result<EmployeeId, AppError> {
    session.employee_id.ok_or(AppError::NoEmployee)
}

fn reviewer_of(session: &Session) -> Reviewer {
    Reviewer {
        employee_id: session.employee_id,
        role: session.role,
    }
}

// --- Own entries ---

pub async fn week(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<WeekQuery>,
) -> AppResult<Json<WeekView>> {
    let employee_id = session_employee(&session)?;
    let date = query.date.unwrap_or_else(|| state.clock.today());
    Ok(Json(WeekView {
        employee_id,
        week_start: week_start(date),
        entries: state.timesheets.week(employee_id, date)?,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<TimesheetInput>,
) -> AppResult<impl IntoResponse> {
    let employee_id = session_employee(&session)?;
    let entry = state.timesheets.create(employee_id, input)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(input): Json<TimesheetInput>,
) -> AppResult<Json<TimesheetEntry>> {
    let employee_id = session_employee(&session)?;
    Ok(Json(state.timesheets.update(id, employee_id, input)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let employee_id = session_employee(&session)?;
    state.timesheets.delete(id, employee_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> AppResult<Json<TimesheetEntry>> {
    let employee_id = session_employee(&session)?;
    Ok(Json(state.timesheets.submit(id, employee_id, session.role)?))
}

/// Visible to the owner and to anyone allowed to review the entry.
pub async fn audits(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<TimesheetAudit>>> {
    let entry = state
        .timesheets
        .get(id)?
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", id))?;
    let reviewer = reviewer_of(&session);
    let is_owner = session.employee_id == Some(entry.employee_id);
    if !is_owner && !state.store.read(|t| crate::timesheet::can_review(t, &reviewer, &entry))? {
        return Err(ValidationError::NotOwner {
            entry_id: id,
            action: "view the audit trail of",
        }
        .into());
    }
    Ok(Json(state.timesheets.audits(id)?))
}

// --- Approvals ---

pub async fn review_queue(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(filter): Query<ReviewFilter>,
) -> AppResult<Json<Vec<TimesheetEntry>>> {
    Ok(Json(state.timesheets.review_queue(&reviewer_of(&session), &filter)?))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    input: Option<Json<ReviewInput>>,
) -> AppResult<Json<TimesheetEntry>> {
    let remarks = input.and_then(|Json(input)| input.remarks);
    Ok(Json(state.timesheets.approve(id, &reviewer_of(&session), remarks)?))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    input: Option<Json<ReviewInput>>,
) -> AppResult<Json<TimesheetEntry>> {
    let remarks = input.and_then(|Json(input)| input.remarks);
    Ok(Json(state.timesheets.reject(id, &reviewer_of(&session), remarks)?))
}

// src/web/projects.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{AppResult, AppState};
use crate::error::ValidationError;
use crate::project::{MemberInput, Project, ProjectFilter, ProjectInput, ProjectMember};
use crate::task::{ProgressInput, ProjectTask, TaskInput};

// --- Projects ---

pub async fn list_projects(
    State(state): State<AppState>,
    Query(filter): Query<ProjectFilter>,
) -> AppResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.search(&filter)?))
}

pub async fn get_project(State(state): State<AppState>, Path(code): Path<String>) -> AppResult<Json<Project>> {
    let project = state
        .projects
        .get(&code)?
        .ok_or_else(|| ValidationError::not_found("Project", &code))?;
    Ok(Json(project))
}

pub async fn add_project(
    State(state): State<AppState>,
    Json(input): Json<ProjectInput>,
) -> AppResult<impl IntoResponse> {
    let project = state.projects.add(input)?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<ProjectInput>,
) -> AppResult<Json<Project>> {
    Ok(Json(state.projects.update(&code, input)?))
}

pub async fn delete_project(State(state): State<AppState>, Path(code): Path<String>) -> AppResult<StatusCode> {
    state.projects.delete(&code)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Members ---

pub async fn list_members(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<Vec<ProjectMember>>> {
    if state.projects.get(&code)?.is_none() {
        return Err(ValidationError::not_found("Project", &code).into());
    }
    Ok(Json(state.projects.members(&code)?))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<MemberInput>,
) -> AppResult<impl IntoResponse> {
    let member = state.projects.add_member(&code, input)?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_member(
    State(state): State<AppState>,
    Path((code, member_id)): Path<(String, i64)>,
    Json(input): Json<MemberInput>,
) -> AppResult<Json<ProjectMember>> {
    Ok(Json(state.projects.update_member(&code, member_id, input)?))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((code, member_id)): Path<(String, i64)>,
) -> AppResult<StatusCode> {
    state.projects.remove_member(&code, member_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Tasks ---

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<Vec<ProjectTask>>> {
    if state.projects.get(&code)?.is_none() {
        return Err(ValidationError::not_found("Project", &code).into());
    }
    Ok(Json(state.tasks.list(&code)?))
}

pub async fn add_task(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<TaskInput>,
) -> AppResult<impl IntoResponse> {
    let task = state.tasks.add(&code, input)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<ProjectTask>> {
    let task = state
        .tasks
        .get(id)?
        .ok_or_else(|| ValidationError::not_found("Task", id))?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<TaskInput>,
) -> AppResult<Json<ProjectTask>> {
    Ok(Json(state.tasks.update(id, input)?))
}

pub async fn update_task_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ProgressInput>,
) -> AppResult<Json<ProjectTask>> {
    Ok(Json(state.tasks.update_progress(id, input.progress)?))
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<StatusCode> {
    state.tasks.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// src/web/directory.rs
// Organizations, employees, code sets and login accounts.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{AppResult, AppState};
use crate::codes::{CodeInput, CodeItem};
use crate::employee::{Employee, EmployeeDetail, EmployeeFilter, EmployeeId, EmployeeInput, EmployeeRole, RoleInput};
use crate::error::ValidationError;
use crate::organization::{Organization, OrganizationInput, OrganizationNode};
use crate::users::{UserInput, UserView};

// --- Organizations ---

pub async fn list_organizations(State(state): State<AppState>) -> AppResult<Json<Vec<Organization>>> {
    Ok(Json(state.organizations.list()?))
}

pub async fn organization_tree(State(state): State<AppState>) -> AppResult<Json<Vec<OrganizationNode>>> {
    Ok(Json(state.organizations.tree()?))
}

pub async fn get_organization(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> AppResult<Json<Organization>> {
    let org = state
        .organizations
        .get(&org_id)?
        .ok_or_else(|| ValidationError::not_found("Organization", &org_id))?;
    Ok(Json(org))
}

pub async fn add_organization(
    State(state): State<AppState>,
    Json(input): Json<OrganizationInput>,
) -> AppResult<impl IntoResponse> {
    let org = state.organizations.add(input)?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn update_organization(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(input): Json<OrganizationInput>,
) -> AppResult<Json<Organization>> {
    Ok(Json(state.organizations.update(&org_id, input)?))
}

pub async fn delete_organization(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> AppResult<StatusCode> {
    state.organizations.delete(&org_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Employees ---

pub async fn list_employees(
    State(state): State<AppState>,
    Query(filter): Query<EmployeeFilter>,
) -> AppResult<Json<Vec<Employee>>> {
    Ok(Json(state.employees.search(&filter)?))
}

pub async fn get_employee(
    State(state): State<AppState>,
    Path(id): Path<EmployeeId>,
) -> AppResult<Json<EmployeeDetail>> {
    let detail = state
        .employees
        .get(id)?
        .ok_or_else(|| ValidationError::not_found("Employee", id))?;
    Ok(Json(detail))
}

pub async fn add_employee(
    State(state): State<AppState>,
    Json(input): Json<EmployeeInput>,
) -> AppResult<impl IntoResponse> {
    let employee = state.employees.add(input)?;
    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path(id): Path<EmployeeId>,
    Json(input): Json<EmployeeInput>,
) -> AppResult<Json<Employee>> {
    Ok(Json(state.employees.update(id, input)?))
}

pub async fn delete_employee(State(state): State<AppState>, Path(id): Path<EmployeeId>) -> AppResult<StatusCode> {
    state.employees.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_role(
    State(state): State<AppState>,
    Path(id): Path<EmployeeId>,
    Json(input): Json<RoleInput>,
) -> AppResult<impl IntoResponse> {
    let role: EmployeeRole = state.employees.add_role(id, input)?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn set_primary_role(
    State(state): State<AppState>,
    Path((id, role_id)): Path<(EmployeeId, i64)>,
) -> AppResult<Json<Vec<EmployeeRole>>> {
    state.employees.set_primary_role(id, role_id)?;
    Ok(Json(state.employees.roles(id)?))
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path((id, role_id)): Path<(EmployeeId, i64)>,
) -> AppResult<StatusCode> {
    state.employees.remove_role(id, role_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Code sets ---

pub async fn list_code_sets(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(state.codes.code_sets()?))
}

pub async fn list_codes(State(state): State<AppState>, Path(set): Path<String>) -> AppResult<Json<Vec<CodeItem>>> {
    Ok(Json(state.codes.codes(&set)?))
}

pub async fn add_code(
    State(state): State<AppState>,
    Path(set): Path<String>,
    Json(input): Json<CodeInput>,
) -> AppResult<impl IntoResponse> {
    let item = state.codes.add_code(&set, input)?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_code(
    State(state): State<AppState>,
    Path((set, code)): Path<(String, String)>,
    Json(input): Json<CodeInput>,
) -> AppResult<Json<CodeItem>> {
    Ok(Json(state.codes.update_code(&set, &code, input)?))
}

pub async fn delete_code(
    State(state): State<AppState>,
    Path((set, code)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    if state.codes.delete_code(&set, &code)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ValidationError::not_found("Code", format!("{}/{}", set, code)).into())
    }
}

// --- Users ---

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<UserView>>> {
    Ok(Json(state.users.list()?))
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<UserView>> {
    let user = state
        .users
        .get(id)?
        .ok_or_else(|| ValidationError::not_found("User", id))?;
    Ok(Json(user))
}

pub async fn add_user(
    State(state): State<AppState>,
    Json(input): Json<UserInput>,
) -> AppResult<impl IntoResponse> {
    let user = state.users.add(input)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UserInput>,
) -> AppResult<Json<UserView>> {
    Ok(Json(state.users.update(id, input)?))
}

pub async fn delete_user(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<StatusCode> {
    state.users.delete(id)?;
    state.sessions.remove_user(id);
    Ok(StatusCode::NO_CONTENT)
}

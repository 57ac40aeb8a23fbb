// src/web/mod.rs
use axum::{
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::codes::CodeService;
use crate::employee::EmployeeService;
use crate::error::{ImportError, KpiError, ServiceError, StoreError, ValidationError};
use crate::kpi::{KpiEngine, StoreKpiData};
use crate::organization::OrganizationService;
use crate::project::ProjectService;
use crate::session::{AuthError, SessionStore};
use crate::store::Store;
use crate::task::TaskService;
use crate::timesheet::TimesheetService;
use crate::users::UserService;

pub mod auth;
pub mod directory;
pub mod kpi;
pub mod pages;
pub mod projects;
pub mod timesheets;
pub mod views;

// --- Application State ---

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub clock: Clock,
    pub sessions: SessionStore,
    pub codes: CodeService,
    pub organizations: OrganizationService,
    pub employees: EmployeeService,
    pub projects: ProjectService,
    pub tasks: TaskService,
    pub timesheets: TimesheetService,
    pub users: UserService,
    pub kpi: KpiEngine,
    /// Cancelled on shutdown; long-running jobs take a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Store, clock: Clock, session_ttl_minutes: i64) -> Self {
        let kpi_data = Arc::new(StoreKpiData::new(store.clone(), clock.clone()));
        Self {
            sessions: SessionStore::new(clock.clone(), session_ttl_minutes),
            codes: CodeService::new(store.clone()),
            organizations: OrganizationService::new(store.clone(), clock.clone()),
            employees: EmployeeService::new(store.clone(), clock.clone()),
            projects: ProjectService::new(store.clone()),
            tasks: TaskService::new(store.clone()),
            timesheets: TimesheetService::new(store.clone(), clock.clone()),
            users: UserService::new(store.clone()),
            kpi: KpiEngine::new(kpi_data.clone(), kpi_data),
            shutdown: CancellationToken::new(),
            store,
            clock,
        }
    }
}

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Kpi(#[from] KpiError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("This account is not linked to an employee")]
    NoEmployee,
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Service(ServiceError::Validation(err))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Service(ServiceError::Store(err))
    }
}

fn validation_status(err: &ValidationError) -> StatusCode {
    match err {
        ValidationError::NotFound { .. } => StatusCode::NOT_FOUND,
        ValidationError::Duplicate { .. } => StatusCode::CONFLICT,
        ValidationError::NotOwner { .. } | ValidationError::NotReviewer { .. } => StatusCode::FORBIDDEN,
        ValidationError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_message) = match &self {
            AppError::Auth(AuthError::Unauthenticated) => {
                warn!("Unauthenticated request, redirecting to login");
                return Redirect::to("/auth/login").into_response();
            }
            AppError::Auth(err @ AuthError::Forbidden { .. }) => {
                warn!("Forbidden: {}", err);
                (StatusCode::FORBIDDEN, err.to_string())
            }
            AppError::Service(ServiceError::Validation(err)) => {
                warn!("Validation failed: {}", err);
                (validation_status(err), err.to_string())
            }
            AppError::Kpi(err @ KpiError::InvalidPeriod { .. }) => {
                warn!("{}", err);
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            AppError::NoEmployee => {
                warn!("{}", self);
                (StatusCode::FORBIDDEN, self.to_string())
            }
            AppError::Service(ServiceError::Store(_)) | AppError::Kpi(_) | AppError::Import(_) => {
                error!("Error occurred: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error. Check logs.".to_string(),
                )
            }
        };

        (
            status_code,
            Html(format!("<h1>Error</h1><p>{}</p>", views::escape(&error_message))),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

// --- Router ---

pub fn router(state: AppState) -> Router {
    let admin_only = middleware::from_fn(auth::require_admin);

    let admin_routes = Router::new()
        .route("/api/users", get(directory::list_users).post(directory::add_user))
        .route(
            "/api/users/{id}",
            get(directory::get_user)
                .put(directory::update_user)
                .delete(directory::delete_user),
        )
        .route("/kpi-admin", get(kpi::kpi_admin_page))
        .route("/kpi-admin/recalculate", post(kpi::recalculate))
        .route("/api/kpi/scores", get(kpi::list_scores))
        .route("/api/kpi/masters", get(kpi::list_masters))
        .route_layer(admin_only.clone());

    let reviewer_routes = Router::new()
        .route("/api/approvals", get(timesheets::review_queue))
        .route("/api/approvals/{id}/approve", post(timesheets::approve))
        .route("/api/approvals/{id}/reject", post(timesheets::reject))
        .route_layer(middleware::from_fn(auth::require_reviewer));

    let session_routes = Router::new()
        .route("/", get(pages::home))
        .route("/dashboard/{role}", get(pages::dashboard))
        .route("/organizations/browser", get(pages::organization_browser))
        // Organizations
        .route(
            "/api/organizations",
            get(directory::list_organizations).post(directory::add_organization),
        )
        .route("/api/organizations/tree", get(directory::organization_tree))
        .route(
            "/api/organizations/{id}",
            get(directory::get_organization)
                .put(directory::update_organization)
                .delete(directory::delete_organization),
        )
        // Employees
        .route(
            "/api/employees",
            get(directory::list_employees).post(directory::add_employee),
        )
        .route(
            "/api/employees/{id}",
            get(directory::get_employee)
                .put(directory::update_employee)
                .delete(directory::delete_employee),
        )
        .route("/api/employees/{id}/roles", post(directory::add_role))
        .route(
            "/api/employees/{id}/roles/{role_id}",
            axum::routing::delete(directory::remove_role),
        )
        .route(
            "/api/employees/{id}/roles/{role_id}/primary",
            put(directory::set_primary_role),
        )
        // Codes: reads for everyone, writes for admins
        .route("/api/codes", get(directory::list_code_sets))
        .route(
            "/api/codes/{set}",
            get(directory::list_codes).merge(post(directory::add_code).route_layer(admin_only.clone())),
        )
        .route(
            "/api/codes/{set}/{code}",
            put(directory::update_code)
                .delete(directory::delete_code)
                .route_layer(admin_only),
        )
        // Projects, members and tasks
        .route("/api/projects", get(projects::list_projects).post(projects::add_project))
        .route(
            "/api/projects/{code}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/api/projects/{code}/members",
            get(projects::list_members).post(projects::add_member),
        )
        .route(
            "/api/projects/{code}/members/{member_id}",
            put(projects::update_member).delete(projects::remove_member),
        )
        .route(
            "/api/projects/{code}/tasks",
            get(projects::list_tasks).post(projects::add_task),
        )
        .route(
            "/api/tasks/{id}",
            get(projects::get_task)
                .put(projects::update_task)
                .delete(projects::delete_task),
        )
        .route("/api/tasks/{id}/progress", put(projects::update_task_progress))
        // Timesheets of the session employee
        .route(
            "/api/timesheets",
            get(timesheets::week).post(timesheets::create),
        )
        .route(
            "/api/timesheets/{id}",
            put(timesheets::update).delete(timesheets::delete),
        )
        .route("/api/timesheets/{id}/submit", post(timesheets::submit))
        .route("/api/timesheets/{id}/audits", get(timesheets::audits))
        .merge(admin_routes)
        .merge(reviewer_routes)
        .route_layer(middleware::from_fn(auth::require_session));

    let public_routes = Router::new()
        .route("/auth/login", get(auth::login_page).post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/status", get(pages::status));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth::load_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

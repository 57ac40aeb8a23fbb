// src/error.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

// --- Validation Errors ---

/// Expected business-rule failures. These are reported back to the user, never logged as faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: &'static str },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{start_field} ({start}) must not be later than {end_field} ({end})")]
    DateOrder {
        start_field: &'static str,
        end_field: &'static str,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Code '{code}' is not defined in code set {code_set}")]
    UnknownCode { code_set: String, code: String },

    #[error("Organization {org_id} cannot be placed under {parent_id}: the parent chain would loop")]
    ParentCycle { org_id: String, parent_id: String },

    #[error("Organization {org_id} still has child organizations")]
    HasChildren { org_id: String },

    #[error("{entity} {key} is still referenced by {referenced_by}")]
    InUse {
        entity: &'static str,
        key: String,
        referenced_by: &'static str,
    },

    #[error("Employee {employee_id} cannot be their own manager")]
    SelfManager { employee_id: i64 },

    #[error("Work date {date} is in the future")]
    FutureWorkDate { date: NaiveDate },

    #[error("Hours and overtime cannot both be zero")]
    ZeroHours,

    #[error("Daily total for employee {employee_id} on {date} would be {total}h (limit 24h)")]
    DailyLimitExceeded {
        employee_id: i64,
        date: NaiveDate,
        total: Decimal,
    },

    #[error("Employee {employee_id} is not a member of project {project_code}")]
    NotProjectMember {
        employee_id: i64,
        project_code: String,
    },

    #[error("Task {task_id} does not belong to project {project_code}")]
    TaskNotInProject { task_id: i64, project_code: String },

    #[error("Cannot {action} timesheet entry {entry_id} while it is {status}")]
    InvalidTransition {
        entry_id: i64,
        status: String,
        action: &'static str,
    },

    #[error("Only the owner may {action} timesheet entry {entry_id}")]
    NotOwner { entry_id: i64, action: &'static str },

    #[error("Employee {reviewer_id} may not review timesheet entry {entry_id}")]
    NotReviewer { entry_id: i64, reviewer_id: i64 },

    #[error("Remarks are required when rejecting a timesheet entry")]
    RemarksRequired,

    #[error("Invalid email or password")]
    InvalidCredentials,
}

impl ValidationError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        ValidationError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, key: impl ToString) -> Self {
        ValidationError::Duplicate {
            entity,
            key: key.to_string(),
        }
    }
}

// --- Store Errors ---

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

// Helper to create context-aware IO errors
pub(crate) fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> StoreError {
    StoreError::Io {
        source,
        context: context.into(),
    }
}

// --- Service Errors ---

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// --- KPI Errors ---

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("Invalid KPI period {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("KPI recalculation for {year}-{month:02} was cancelled")]
    Cancelled { year: i32, month: u32 },

    #[error("KPI store error: {0}")]
    Store(#[from] StoreError),
}

// --- Import Errors ---

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Import file not found: {0:?}")]
    FileNotFound(std::path::PathBuf),

    #[error("Unsupported import format '{extension}' for {path:?} (expected .xlsx, .xls or .csv)")]
    UnsupportedFormat {
        path: std::path::PathBuf,
        extension: String,
    },

    #[error("Spreadsheet error in {path:?}: {message}")]
    Spreadsheet {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Import store error: {0}")]
    Store(#[from] StoreError),

    #[error("Import cancelled after {rows_done} rows")]
    Cancelled { rows_done: usize },
}

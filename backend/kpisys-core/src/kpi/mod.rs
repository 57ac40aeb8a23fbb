// src/kpi/mod.rs
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::employee::EmployeeId;
use crate::error::KpiError;
use crate::project::Project;
use crate::timesheet::TimesheetEntry;

pub mod engine;
pub mod store;

pub use engine::{KpiEngine, RecalcSummary};
pub use store::StoreKpiData;

// --- KPI codes ---
pub mod kpi_code {
    pub const SPI: &str = "SPI";
    pub const CPI: &str = "CPI";
    pub const HEALTH: &str = "Health";
    pub const CONTRIBUTION: &str = "Contribution";
    pub const OUTPUT_PER_HOUR: &str = "OutputPerHour";
    pub const COLLABORATION: &str = "Collaboration";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiMaster {
    pub id: i64,
    pub kpi_code: String,
    pub kpi_name: String,
    pub formula: Option<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiScore {
    pub id: i64,
    pub emp_id: EmployeeId,
    pub project_code: Option<String>,
    pub kpi_code: String,
    pub score_date: NaiveDate,
    pub score: Decimal,
    pub created_at: NaiveDateTime,
}

/// A computed score before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRow {
    pub emp_id: EmployeeId,
    pub project_code: Option<String>,
    pub kpi_code: &'static str,
    pub score_date: NaiveDate,
    pub score: Decimal,
}

/// Where the engine reads its inputs from.
#[async_trait]
pub trait KpiInputs: Send + Sync {
    /// Approved entries with a work date in `from..=to`.
    async fn approved_entries(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<TimesheetEntry>, KpiError>;

    async fn projects(&self) -> Result<Vec<Project>, KpiError>;
}

/// Where KPI masters and scores live.
#[async_trait]
pub trait KpiDataStore: Send + Sync {
    async fn masters(&self) -> Result<Vec<KpiMaster>, KpiError>;

    /// Scores dated in the month, ordered by employee, project, kpi code.
    async fn scores_by_month(&self, year: i32, month: u32) -> Result<Vec<KpiScore>, KpiError>;

    /// Replaces any score with the same (employee, project, kpi code, date) key.
    /// Returns the number of rows written.
    async fn upsert_scores(&self, rows: Vec<ScoreRow>) -> Result<usize, KpiError>;

    /// Deletes every score dated in the month. Returns the number removed.
    async fn clear_month(&self, year: i32, month: u32) -> Result<usize, KpiError>;
}

// src/kpi/store.rs
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tracing::debug;

use super::{KpiDataStore, KpiInputs, KpiMaster, KpiScore, ScoreRow};
use crate::clock::Clock;
use crate::error::{KpiError, StoreError};
use crate::project::Project;
use crate::store::{fold_key, next_id, Store};
use crate::timesheet::{TimesheetEntry, TimesheetStatus};

/// KPI inputs and score storage backed by the shared `Store`.
#[derive(Clone)]
pub struct StoreKpiData {
    store: Store,
    clock: Clock,
}

impl StoreKpiData {
    pub fn new(store: Store, clock: Clock) -> Self {
        Self { store, clock }
    }
}

fn in_month(date: NaiveDate, year: i32, month: u32) -> bool {
    date.year() == year && date.month() == month
}

#[async_trait]
impl KpiInputs for StoreKpiData {
    async fn approved_entries(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<TimesheetEntry>, KpiError> {
        Ok(self.store.read(|t| {
            t.timesheets
                .values()
                .filter(|e| e.status == TimesheetStatus::Approved)
                .filter(|e| e.work_date >= from && e.work_date <= to)
                .cloned()
                .collect()
        })?)
    }

    async fn projects(&self) -> Result<Vec<Project>, KpiError> {
        Ok(self.store.read(|t| t.projects.values().cloned().collect())?)
    }
}

#[async_trait]
impl KpiDataStore for StoreKpiData {
    async fn masters(&self) -> Result<Vec<KpiMaster>, KpiError> {
        Ok(self.store.read(|t| t.kpi_masters.values().cloned().collect())?)
    }

    async fn scores_by_month(&self, year: i32, month: u32) -> Result<Vec<KpiScore>, KpiError> {
        let mut scores: Vec<KpiScore> = self.store.read(|t| {
            t.kpi_scores
                .values()
                .filter(|s| in_month(s.score_date, year, month))
                .cloned()
                .collect()
        })?;
        scores.sort_by(|a, b| {
            a.emp_id
                .cmp(&b.emp_id)
                .then_with(|| a.project_code.cmp(&b.project_code))
                .then_with(|| a.kpi_code.cmp(&b.kpi_code))
        });
        Ok(scores)
    }

    async fn upsert_scores(&self, rows: Vec<ScoreRow>) -> Result<usize, KpiError> {
        let now = self.clock.now();
        let written = self.store.write(|t| -> Result<usize, StoreError> {
            for row in &rows {
                let project_key = row.project_code.as_deref().map(fold_key).unwrap_or_default();
                let kpi_key = fold_key(row.kpi_code);
                t.kpi_scores.retain(|_, s| {
                    !(s.emp_id == row.emp_id
                        && s.project_code.as_deref().map(fold_key).unwrap_or_default() == project_key
                        && fold_key(&s.kpi_code) == kpi_key
                        && s.score_date == row.score_date)
                });
                let score = KpiScore {
                    id: next_id(&mut t.counters.kpi_score),
                    emp_id: row.emp_id,
                    project_code: row.project_code.clone(),
                    kpi_code: row.kpi_code.to_string(),
                    score_date: row.score_date,
                    score: row.score,
                    created_at: now,
                };
                t.kpi_scores.insert(score.id, score);
            }
            Ok(rows.len())
        })?;
        debug!("Upserted {} KPI scores", written);
        Ok(written)
    }

    async fn clear_month(&self, year: i32, month: u32) -> Result<usize, KpiError> {
        Ok(self.store.write(|t| -> Result<usize, StoreError> {
            let before = t.kpi_scores.len();
            t.kpi_scores.retain(|_, s| !in_month(s.score_date, year, month));
            Ok(before - t.kpi_scores.len())
        })?)
    }
}

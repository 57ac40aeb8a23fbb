// src/kpi/engine.rs
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{kpi_code, KpiDataStore, KpiInputs, ScoreRow};
use crate::employee::EmployeeId;
use crate::error::KpiError;
use crate::project::Project;
use crate::store::fold_key;
use crate::timesheet::TimesheetEntry;

const HOURS_PER_WORKING_DAY: Decimal = dec!(8);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecalcSummary {
    pub year: i32,
    pub month: u32,
    pub approved_entries: usize,
    pub projects_scored: usize,
    pub projects_skipped: usize,
    pub employees_scored: usize,
    pub rows_written: usize,
    pub rows_cleared: usize,
}

/// First and last day of a calendar month.
pub fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), KpiError> {
    let invalid = || KpiError::InvalidPeriod { year, month };
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(invalid)?;
    Ok((first, next_first - Duration::days(1)))
}

/// Weekdays in `from..=to`. No holiday calendar.
pub fn working_days(from: NaiveDate, to: NaiveDate) -> u32 {
    from.iter_days()
        .take_while(|day| *day <= to)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as u32
}

/// Maps a ratio onto 0..=100 with two decimals.
pub fn to_score(ratio: Decimal) -> Decimal {
    if ratio <= Decimal::ZERO {
        Decimal::ZERO
    } else if ratio >= Decimal::ONE {
        dec!(100)
    } else {
        (ratio * dec!(100)).round_dp(2)
    }
}

/// Schedule, cost and health scores of one project for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectScores {
    pub spi: Decimal,
    pub cpi: Decimal,
    pub health: Decimal,
}

pub fn project_scores(
    project: &Project,
    actual_hours: Decimal,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> ProjectScores {
    let project_start = project.start_date.unwrap_or(period_start);
    let project_end = project.end_date.unwrap_or(period_end).max(project_start);

    let total_days = Decimal::from(((project_end - project_start).num_days() + 1).max(1));
    let elapsed_days = Decimal::from(((project_end.min(period_end) - project_start).num_days() + 1).max(0));
    let elapsed_ratio = (elapsed_days / total_days).clamp(Decimal::ZERO, Decimal::ONE);

    let planned_hours = project.budget_hours * elapsed_ratio;
    let spi = to_score(actual_hours / planned_hours.max(Decimal::ONE));

    let hourly_cost = if project.budget_hours > Decimal::ZERO && project.budget_cost > Decimal::ZERO {
        project.budget_cost / project.budget_hours
    } else {
        Decimal::ONE
    };
    let earned_value = project.budget_cost * elapsed_ratio;
    let actual_cost = actual_hours * hourly_cost;
    let cpi = to_score(earned_value / actual_cost.max(Decimal::ONE));

    // Provisional: plain mean of SPI and CPI until a weighting is agreed.
    let health = ((spi + cpi) / dec!(2)).round_dp(2);

    ProjectScores { spi, cpi, health }
}

/// 30 for one project, +20 per extra project, capped at 100 from four projects on.
pub fn collaboration_score(project_count: usize) -> Decimal {
    let ratio = match project_count {
        0 | 1 => dec!(0.3),
        n if n >= 4 => Decimal::ONE,
        n => dec!(0.3) + Decimal::from(n - 1) * dec!(0.2),
    };
    to_score(ratio)
}

// --- Engine ---

#[derive(Clone)]
pub struct KpiEngine {
    inputs: Arc<dyn KpiInputs>,
    data: Arc<dyn KpiDataStore>,
}

impl KpiEngine {
    pub fn new(inputs: Arc<dyn KpiInputs>, data: Arc<dyn KpiDataStore>) -> Self {
        Self { inputs, data }
    }

    pub fn data(&self) -> &Arc<dyn KpiDataStore> {
        &self.data
    }

    /// Recomputes every score of the month from approved timesheets.
    ///
    /// Scores are written per project and per employee as they are computed, so a
    /// cancelled or failed run keeps whatever it already wrote. A month with no
    /// approved entries has its scores cleared.
    pub async fn recalculate_monthly(
        &self,
        year: i32,
        month: u32,
        cancel: &CancellationToken,
    ) -> Result<RecalcSummary, KpiError> {
        let (period_start, period_end) = month_range(year, month)?;
        let entries = self.inputs.approved_entries(period_start, period_end).await?;
        let mut summary = RecalcSummary {
            year,
            month,
            approved_entries: entries.len(),
            ..Default::default()
        };

        if entries.is_empty() {
            summary.rows_cleared = self.data.clear_month(year, month).await?;
            info!(
                "No approved timesheets for {}-{:02}; cleared {} KPI scores",
                year, month, summary.rows_cleared
            );
            return Ok(summary);
        }

        let projects: HashMap<String, Project> = self
            .inputs
            .projects()
            .await?
            .into_iter()
            .map(|p| (fold_key(&p.code), p))
            .collect();

        // Group by folded project code; BTreeMap keeps the run order stable.
        let mut by_project: BTreeMap<String, Vec<&TimesheetEntry>> = BTreeMap::new();
        let mut by_employee: BTreeMap<EmployeeId, Vec<&TimesheetEntry>> = BTreeMap::new();
        for entry in &entries {
            by_project.entry(fold_key(&entry.project_code)).or_default().push(entry);
            by_employee.entry(entry.employee_id).or_default().push(entry);
        }
        let project_totals: HashMap<&str, Decimal> = by_project
            .iter()
            .map(|(code, rows)| (code.as_str(), rows.iter().map(|e| e.total_hours()).sum()))
            .collect();

        for (code_key, rows) in &by_project {
            self.check_cancelled(cancel, year, month)?;
            let Some(project) = projects.get(code_key) else {
                debug!("Skipping KPI for unknown project '{}'", code_key);
                summary.projects_skipped += 1;
                continue;
            };

            let actual_hours = project_totals.get(code_key.as_str()).copied().unwrap_or_default();
            let scores = project_scores(project, actual_hours, period_start, period_end);
            debug!(
                "Project {}: {}h actual, SPI {} CPI {} Health {}",
                project.code, actual_hours, scores.spi, scores.cpi, scores.health
            );

            let members: BTreeSet<EmployeeId> = rows.iter().map(|e| e.employee_id).collect();
            let mut batch = Vec::with_capacity(members.len() * 3);
            for emp_id in members {
                for (code, score) in [
                    (kpi_code::SPI, scores.spi),
                    (kpi_code::CPI, scores.cpi),
                    (kpi_code::HEALTH, scores.health),
                ] {
                    batch.push(ScoreRow {
                        emp_id,
                        project_code: Some(project.code.clone()),
                        kpi_code: code,
                        score_date: period_end,
                        score,
                    });
                }
            }
            summary.rows_written += self.data.upsert_scores(batch).await?;
            summary.projects_scored += 1;
            tokio::task::yield_now().await;
        }

        let expected_hours = Decimal::from(working_days(period_start, period_end)) * HOURS_PER_WORKING_DAY;
        for (emp_id, rows) in &by_employee {
            self.check_cancelled(cancel, year, month)?;
            let total_hours: Decimal = rows.iter().map(|e| e.total_hours()).sum();
            let output = to_score(total_hours / expected_hours.max(Decimal::ONE));

            let mut hours_per_project: BTreeMap<String, Decimal> = BTreeMap::new();
            for entry in rows {
                *hours_per_project.entry(fold_key(&entry.project_code)).or_default() += entry.total_hours();
            }
            let shares: Vec<Decimal> = hours_per_project
                .iter()
                .map(|(code, hours)| {
                    let project_total = project_totals.get(code.as_str()).copied().unwrap_or_default();
                    if project_total > Decimal::ZERO {
                        *hours / project_total.max(Decimal::ONE)
                    } else {
                        Decimal::ZERO
                    }
                })
                .collect();
            let average_share = if shares.is_empty() {
                Decimal::ZERO
            } else {
                shares.iter().copied().sum::<Decimal>() / Decimal::from(shares.len())
            };
            // Provisional: doubled average share of project hours.
            let contribution = to_score(average_share * dec!(2));
            let collaboration = collaboration_score(hours_per_project.len());

            debug!(
                "Employee {}: {}h of {}h expected, output {} contribution {} collaboration {}",
                emp_id, total_hours, expected_hours, output, contribution, collaboration
            );

            let batch = [
                (kpi_code::OUTPUT_PER_HOUR, output),
                (kpi_code::CONTRIBUTION, contribution),
                (kpi_code::COLLABORATION, collaboration),
            ]
            .into_iter()
            .map(|(code, score)| ScoreRow {
                emp_id: *emp_id,
                project_code: None,
                kpi_code: code,
                score_date: period_end,
                score,
            })
            .collect();
            summary.rows_written += self.data.upsert_scores(batch).await?;
            summary.employees_scored += 1;
            tokio::task::yield_now().await;
        }

        info!(
            "KPI recalculation {}-{:02}: {} entries, {} projects ({} skipped), {} employees, {} rows",
            year,
            month,
            summary.approved_entries,
            summary.projects_scored,
            summary.projects_skipped,
            summary.employees_scored,
            summary.rows_written
        );
        Ok(summary)
    }

    fn check_cancelled(&self, cancel: &CancellationToken, year: i32, month: u32) -> Result<(), KpiError> {
        if cancel.is_cancelled() {
            info!("KPI recalculation {}-{:02} cancelled", year, month);
            return Err(KpiError::Cancelled { year, month });
        }
        Ok(())
    }
}

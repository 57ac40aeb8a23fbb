// src/timesheet.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::employee::EmployeeId;
use crate::error::{ServiceResult, ValidationError};
use crate::session::Role;
use crate::store::{clean, fold_key, is_blank, next_id, Store, Tables};

pub const DAILY_HOUR_LIMIT: Decimal = dec!(24);
pub const DEFAULT_REVIEW_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimesheetStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl fmt::Display for TimesheetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimesheetStatus::Draft => "Draft",
            TimesheetStatus::Submitted => "Submitted",
            TimesheetStatus::Approved => "Approved",
            TimesheetStatus::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Submit,
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesheetEntry {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub project_code: String,
    pub task_id: Option<i64>,
    pub work_date: NaiveDate,
    pub hours: Decimal,
    pub overtime_hours: Decimal,
    pub notes: Option<String>,
    pub status: TimesheetStatus,
    pub submitted_at: Option<NaiveDateTime>,
    pub approved_by: Option<EmployeeId>,
    pub approved_at: Option<NaiveDateTime>,
    pub approval_remarks: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

impl TimesheetEntry {
    pub fn total_hours(&self) -> Decimal {
        self.hours + self.overtime_hours
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesheetAudit {
    pub id: i64,
    pub timesheet_id: i64,
    pub action: AuditAction,
    pub performed_by: Option<EmployeeId>,
    pub performer_role: Role,
    pub performed_at: NaiveDateTime,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimesheetInput {
    pub project_code: String,
    #[serde(default)]
    pub task_id: Option<i64>,
    pub work_date: NaiveDate,
    #[serde(default)]
    pub hours: Decimal,
    #[serde(default)]
    pub overtime_hours: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Who is acting on a review: the linked employee (if any) and the session role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reviewer {
    pub employee_id: Option<EmployeeId>,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewFilter {
    pub project_code: Option<String>,
    pub employee_id: Option<EmployeeId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

// --- Validation ---

fn check_hours(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > DAILY_HOUR_LIMIT {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            min: "0".to_string(),
            max: DAILY_HOUR_LIMIT.to_string(),
        });
    }
    Ok(())
}

/// Checks an entry for `employee_id`. `existing_id` excludes the entry being edited
/// from the duplicate and daily-total checks. Returns the canonical project code.
fn validate_entry(
    t: &Tables,
    employee_id: EmployeeId,
    input: &TimesheetInput,
    existing_id: Option<i64>,
    today: NaiveDate,
) -> Result<String, ValidationError> {
    if input.work_date > today {
        return Err(ValidationError::FutureWorkDate { date: input.work_date });
    }
    check_hours("hours", input.hours)?;
    check_hours("overtimeHours", input.overtime_hours)?;
    if input.hours.is_zero() && input.overtime_hours.is_zero() {
        return Err(ValidationError::ZeroHours);
    }
    if is_blank(&input.project_code) {
        return Err(ValidationError::Required { field: "projectCode" });
    }

    let project_code = t
        .project_by_code(&input.project_code)
        .map(|p| p.code.clone())
        .ok_or_else(|| ValidationError::not_found("Project", input.project_code.trim()))?;
    if !t.is_project_member(&project_code, employee_id) {
        return Err(ValidationError::NotProjectMember {
            employee_id,
            project_code,
        });
    }
    if let Some(task_id) = input.task_id {
        let task = t
            .tasks
            .get(&task_id)
            .ok_or_else(|| ValidationError::not_found("Task", task_id))?;
        if fold_key(&task.project_code) != fold_key(&project_code) {
            return Err(ValidationError::TaskNotInProject {
                task_id,
                project_code,
            });
        }
    }

    let same_day = t
        .timesheets
        .values()
        .filter(|e| Some(e.id) != existing_id)
        .filter(|e| e.employee_id == employee_id && e.work_date == input.work_date);

    let project_key = fold_key(&project_code);
    let mut day_total = input.hours + input.overtime_hours;
    for other in same_day {
        if fold_key(&other.project_code) == project_key && other.task_id == input.task_id {
            return Err(ValidationError::duplicate(
                "Timesheet entry",
                format!("{}/{}/{}", employee_id, input.work_date, project_code),
            ));
        }
        day_total += other.total_hours();
    }
    if day_total > DAILY_HOUR_LIMIT {
        return Err(ValidationError::DailyLimitExceeded {
            employee_id,
            date: input.work_date,
            total: day_total,
        });
    }
    Ok(project_code)
}

fn owned_entry<'a>(
    t: &'a Tables,
    entry_id: i64,
    employee_id: EmployeeId,
    action: &'static str,
) -> Result<&'a TimesheetEntry, ValidationError> {
    let entry = t
        .timesheets
        .get(&entry_id)
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", entry_id))?;
    if entry.employee_id != employee_id {
        return Err(ValidationError::NotOwner { entry_id, action });
    }
    Ok(entry)
}

fn require_status(
    entry: &TimesheetEntry,
    allowed: &[TimesheetStatus],
    action: &'static str,
) -> Result<(), ValidationError> {
    if allowed.contains(&entry.status) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTransition {
            entry_id: entry.id,
            status: entry.status.to_string(),
            action,
        })
    }
}

fn record_audit(
    t: &mut Tables,
    entry_id: i64,
    action: AuditAction,
    performed_by: Option<EmployeeId>,
    performer_role: Role,
    remarks: Option<String>,
    now: NaiveDateTime,
) {
    let audit = TimesheetAudit {
        id: next_id(&mut t.counters.timesheet_audit),
        timesheet_id: entry_id,
        action,
        performed_by,
        performer_role,
        performed_at: now,
        remarks,
    };
    t.timesheet_audits.insert(audit.id, audit);
}

/// Whether `reviewer` may act on `entry`: never on their own entries, Admin on all,
/// a Manager on direct reports, a PM on projects they manage.
pub fn can_review(t: &Tables, reviewer: &Reviewer, entry: &TimesheetEntry) -> bool {
    if reviewer.employee_id == Some(entry.employee_id) {
        return false;
    }
    match reviewer.role {
        Role::Admin => true,
        Role::Manager => {
            reviewer.employee_id.is_some()
                && t.employees
                    .get(&entry.employee_id)
                    .map_or(false, |e| e.manager_id == reviewer.employee_id)
        }
        Role::Pm => {
            reviewer.employee_id.is_some()
                && t.project_by_code(&entry.project_code)
                    .map_or(false, |p| p.pm_id == reviewer.employee_id)
        }
        Role::Employee => false,
    }
}

// --- Table rules ---

pub(crate) fn insert_entry(
    t: &mut Tables,
    employee_id: EmployeeId,
    input: TimesheetInput,
    now: NaiveDateTime,
) -> Result<TimesheetEntry, ValidationError> {
    if !t.employees.contains_key(&employee_id) {
        return Err(ValidationError::not_found("Employee", employee_id));
    }
    let project_code = validate_entry(t, employee_id, &input, None, now.date())?;
    let entry = TimesheetEntry {
        id: next_id(&mut t.counters.timesheet),
        employee_id,
        project_code,
        task_id: input.task_id,
        work_date: input.work_date,
        hours: input.hours,
        overtime_hours: input.overtime_hours,
        notes: clean(input.notes),
        status: TimesheetStatus::Draft,
        submitted_at: None,
        approved_by: None,
        approved_at: None,
        approval_remarks: None,
        created_at: now,
        updated_at: None,
    };
    t.timesheets.insert(entry.id, entry.clone());
    Ok(entry)
}

/// Edits a Draft or Rejected entry. A Rejected entry goes back to Draft.
pub(crate) fn update_entry(
    t: &mut Tables,
    entry_id: i64,
    employee_id: EmployeeId,
    input: TimesheetInput,
    now: NaiveDateTime,
) -> Result<TimesheetEntry, ValidationError> {
    let existing = owned_entry(t, entry_id, employee_id, "edit")?.clone();
    require_status(&existing, &[TimesheetStatus::Draft, TimesheetStatus::Rejected], "edit")?;
    let project_code = validate_entry(t, employee_id, &input, Some(entry_id), now.date())?;
    let updated = TimesheetEntry {
        project_code,
        task_id: input.task_id,
        work_date: input.work_date,
        hours: input.hours,
        overtime_hours: input.overtime_hours,
        notes: clean(input.notes),
        status: TimesheetStatus::Draft,
        updated_at: Some(now),
        ..existing
    };
    t.timesheets.insert(entry_id, updated.clone());
    Ok(updated)
}

pub(crate) fn delete_entry(t: &mut Tables, entry_id: i64, employee_id: EmployeeId) -> Result<TimesheetEntry, ValidationError> {
    let existing = owned_entry(t, entry_id, employee_id, "delete")?;
    require_status(existing, &[TimesheetStatus::Draft, TimesheetStatus::Rejected], "delete")?;
    t.timesheet_audits.retain(|_, a| a.timesheet_id != entry_id);
    t.timesheets
        .remove(&entry_id)
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", entry_id))
}

pub(crate) fn submit_entry(
    t: &mut Tables,
    entry_id: i64,
    employee_id: EmployeeId,
    role: Role,
    now: NaiveDateTime,
) -> Result<TimesheetEntry, ValidationError> {
    let existing = owned_entry(t, entry_id, employee_id, "submit")?;
    require_status(existing, &[TimesheetStatus::Draft], "submit")?;
    let entry = t
        .timesheets
        .get_mut(&entry_id)
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", entry_id))?;
    entry.status = TimesheetStatus::Submitted;
    entry.submitted_at = Some(now);
    entry.updated_at = Some(now);
    let submitted = entry.clone();
    record_audit(t, entry_id, AuditAction::Submit, Some(employee_id), role, None, now);
    Ok(submitted)
}

pub(crate) fn review_entry(
    t: &mut Tables,
    entry_id: i64,
    reviewer: &Reviewer,
    approve: bool,
    remarks: Option<String>,
    now: NaiveDateTime,
) -> Result<TimesheetEntry, ValidationError> {
    let action = if approve { "approve" } else { "reject" };
    let remarks = clean(remarks);
    if !approve && remarks.is_none() {
        return Err(ValidationError::RemarksRequired);
    }
    let existing = t
        .timesheets
        .get(&entry_id)
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", entry_id))?;
    require_status(existing, &[TimesheetStatus::Submitted], action)?;
    if !can_review(t, reviewer, existing) {
        return Err(ValidationError::NotReviewer {
            entry_id,
            reviewer_id: reviewer.employee_id.unwrap_or_default(),
        });
    }

    let entry = t
        .timesheets
        .get_mut(&entry_id)
        .ok_or_else(|| ValidationError::not_found("Timesheet entry", entry_id))?;
    entry.status = if approve {
        TimesheetStatus::Approved
    } else {
        TimesheetStatus::Rejected
    };
    entry.approved_by = reviewer.employee_id;
    entry.approved_at = Some(now);
    entry.approval_remarks = remarks.clone();
    entry.updated_at = Some(now);
    let reviewed = entry.clone();

    let audit_action = if approve { AuditAction::Approve } else { AuditAction::Reject };
    record_audit(t, entry_id, audit_action, reviewer.employee_id, reviewer.role, remarks, now);
    Ok(reviewed)
}

// --- Service ---

#[derive(Clone)]
pub struct TimesheetService {
    store: Store,
    clock: Clock,
}

impl TimesheetService {
    pub fn new(store: Store, clock: Clock) -> Self {
        Self { store, clock }
    }

    pub fn get(&self, entry_id: i64) -> ServiceResult<Option<TimesheetEntry>> {
        Ok(self.store.read(|t| t.timesheets.get(&entry_id).cloned())?)
    }

    /// Entries of `employee_id` in the Monday-started week containing `date`,
    /// ordered by date, project, task.
    pub fn week(&self, employee_id: EmployeeId, date: NaiveDate) -> ServiceResult<Vec<TimesheetEntry>> {
        let start = week_start(date);
        let end = start + Duration::days(6);
        let mut entries = self.store.read(|t| {
            t.timesheets
                .values()
                .filter(|e| e.employee_id == employee_id && e.work_date >= start && e.work_date <= end)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        entries.sort_by(|a, b| {
            a.work_date
                .cmp(&b.work_date)
                .then_with(|| fold_key(&a.project_code).cmp(&fold_key(&b.project_code)))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(entries)
    }

    pub fn create(&self, employee_id: EmployeeId, input: TimesheetInput) -> ServiceResult<TimesheetEntry> {
        let now = self.clock.now();
        let result = self
            .store
            .write(|t| -> ServiceResult<TimesheetEntry> { Ok(insert_entry(t, employee_id, input, now)?) });
        match &result {
            Ok(e) => info!(
                "Created timesheet entry {} for employee {} on {} ({}h + {}h OT, {})",
                e.id, e.employee_id, e.work_date, e.hours, e.overtime_hours, e.project_code
            ),
            Err(err) => warn!("Rejected timesheet entry for employee {}: {}", employee_id, err),
        }
        result
    }

    pub fn update(&self, entry_id: i64, employee_id: EmployeeId, input: TimesheetInput) -> ServiceResult<TimesheetEntry> {
        let now = self.clock.now();
        let result = self.store.write(|t| -> ServiceResult<TimesheetEntry> {
            Ok(update_entry(t, entry_id, employee_id, input, now)?)
        });
        match &result {
            Ok(e) => info!("Updated timesheet entry {} (now {})", e.id, e.status),
            Err(err) => warn!("Rejected update of timesheet entry {}: {}", entry_id, err),
        }
        result
    }

    pub fn delete(&self, entry_id: i64, employee_id: EmployeeId) -> ServiceResult<()> {
        let removed = self
            .store
            .write(|t| -> ServiceResult<TimesheetEntry> { Ok(delete_entry(t, entry_id, employee_id)?) })?;
        info!("Deleted timesheet entry {} of employee {}", removed.id, removed.employee_id);
        Ok(())
    }

    pub fn submit(&self, entry_id: i64, employee_id: EmployeeId, role: Role) -> ServiceResult<TimesheetEntry> {
        let now = self.clock.now();
        let result = self.store.write(|t| -> ServiceResult<TimesheetEntry> {
            Ok(submit_entry(t, entry_id, employee_id, role, now)?)
        });
        match &result {
            Ok(e) => info!("Timesheet entry {} submitted by employee {}", e.id, e.employee_id),
            Err(err) => warn!("Rejected submit of timesheet entry {}: {}", entry_id, err),
        }
        result
    }

    /// Submitted entries the reviewer may act on, newest work date first.
    /// The date window defaults to the last seven days.
    pub fn review_queue(&self, reviewer: &Reviewer, filter: &ReviewFilter) -> ServiceResult<Vec<TimesheetEntry>> {
        let today = self.clock.today();
        let end = filter.end_date.unwrap_or(today);
        let start = filter
            .start_date
            .unwrap_or(today - Duration::days(DEFAULT_REVIEW_WINDOW_DAYS));
        let project_key = filter
            .project_code
            .as_deref()
            .filter(|c| !is_blank(c))
            .map(fold_key);

        let mut queue = self.store.read(|t| {
            t.timesheets
                .values()
                .filter(|e| e.status == TimesheetStatus::Submitted)
                .filter(|e| e.work_date >= start && e.work_date <= end)
                .filter(|e| project_key.as_ref().map_or(true, |k| &fold_key(&e.project_code) == k))
                .filter(|e| filter.employee_id.map_or(true, |id| e.employee_id == id))
                .filter(|e| can_review(t, reviewer, e))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        queue.sort_by(|a, b| b.work_date.cmp(&a.work_date).then_with(|| a.id.cmp(&b.id)));
        debug!(
            "Review queue for {:?} ({:?}) {}..{}: {} entries",
            reviewer.employee_id,
            reviewer.role,
            start,
            end,
            queue.len()
        );
        Ok(queue)
    }

    pub fn approve(&self, entry_id: i64, reviewer: &Reviewer, remarks: Option<String>) -> ServiceResult<TimesheetEntry> {
        self.review(entry_id, reviewer, true, remarks)
    }

    pub fn reject(&self, entry_id: i64, reviewer: &Reviewer, remarks: Option<String>) -> ServiceResult<TimesheetEntry> {
        self.review(entry_id, reviewer, false, remarks)
    }

    fn review(
        &self,
        entry_id: i64,
        reviewer: &Reviewer,
        approve: bool,
        remarks: Option<String>,
    ) -> ServiceResult<TimesheetEntry> {
        let now = self.clock.now();
        let result = self.store.write(|t| -> ServiceResult<TimesheetEntry> {
            Ok(review_entry(t, entry_id, reviewer, approve, remarks, now)?)
        });
        match &result {
            Ok(e) => info!(
                "Timesheet entry {} {} by {:?} ({:?})",
                e.id, e.status, reviewer.employee_id, reviewer.role
            ),
            Err(err) => warn!("Rejected review of timesheet entry {}: {}", entry_id, err),
        }
        result
    }

    /// Audit trail of an entry, newest first.
    pub fn audits(&self, entry_id: i64) -> ServiceResult<Vec<TimesheetAudit>> {
        let mut audits = self.store.read(|t| {
            t.timesheet_audits
                .values()
                .filter(|a| a.timesheet_id == entry_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        audits.sort_by(|a, b| b.performed_at.cmp(&a.performed_at).then_with(|| b.id.cmp(&a.id)));
        Ok(audits)
    }
}

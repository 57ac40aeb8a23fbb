// src/project.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codes::{code_set, require_code};
use crate::error::{ServiceResult, ValidationError};
use crate::employee::EmployeeId;
use crate::store::{clean, fold_key, is_blank, next_id, Store, Tables};

pub const MEMBER_ROLES: [&str; 5] = ["PM", "SA", "SD", "PG", "OP"];
pub const PM_ROLE: &str = "PM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub project_type: String,
    pub project_size: String,
    pub project_criticality: String,
    pub portfolio: Option<String>,
    pub pm_id: Option<EmployeeId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget_hours: Decimal,
    pub budget_cost: Decimal,
    pub status: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: i64,
    pub project_code: String,
    pub employee_id: EmployeeId,
    pub role: String,
    pub allocation_pct: Decimal,
    pub is_active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectInput {
    pub code: String,
    pub name: String,
    pub project_type: String,
    pub project_size: String,
    pub project_criticality: String,
    pub portfolio: Option<String>,
    pub pm_id: Option<EmployeeId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget_hours: Decimal,
    pub budget_cost: Decimal,
    pub status: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberInput {
    pub employee_id: EmployeeId,
    pub role: String,
    #[serde(default = "full_allocation")]
    pub allocation_pct: Decimal,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn full_allocation() -> Decimal {
    dec!(100)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectFilter {
    pub keyword: Option<String>,
    pub project_type: Option<String>,
    pub status: Option<String>,
    pub pm_id: Option<EmployeeId>,
}

impl ProjectFilter {
    fn matches(&self, project: &Project) -> bool {
        if let Some(keyword) = self.keyword.as_deref().filter(|v| !is_blank(v)) {
            let keyword = fold_key(keyword);
            if !fold_key(&project.code).contains(&keyword) && !fold_key(&project.name).contains(&keyword) {
                return false;
            }
        }
        if let Some(project_type) = self.project_type.as_deref().filter(|v| !is_blank(v)) {
            if fold_key(&project.project_type) != fold_key(project_type) {
                return false;
            }
        }
        if let Some(status) = self.status.as_deref().filter(|v| !is_blank(v)) {
            if fold_key(&project.status) != fold_key(status) {
                return false;
            }
        }
        if let Some(pm_id) = self.pm_id {
            if project.pm_id != Some(pm_id) {
                return false;
            }
        }
        true
    }
}

fn check_date_order(
    start_field: &'static str,
    end_field: &'static str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(ValidationError::DateOrder {
            start_field,
            end_field,
            start,
            end,
        }),
        _ => Ok(()),
    }
}

// --- Table rules ---

fn validate(t: &Tables, input: &ProjectInput, updating_code: Option<&str>) -> Result<(), ValidationError> {
    let required = [
        ("code", &input.code),
        ("name", &input.name),
        ("projectType", &input.project_type),
        ("projectSize", &input.project_size),
        ("projectCriticality", &input.project_criticality),
        ("status", &input.status),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| is_blank(value)) {
        return Err(ValidationError::Required { field });
    }

    let code_key = fold_key(&input.code);
    let updating_key = updating_code.map(fold_key);
    if t
        .projects
        .values()
        .any(|p| fold_key(&p.code) == code_key && Some(fold_key(&p.code)) != updating_key)
    {
        return Err(ValidationError::duplicate("Project", input.code.trim()));
    }

    require_code(t, code_set::PROJECT_TYPE, input.project_type.trim())?;
    require_code(t, code_set::PROJECT_SIZE, input.project_size.trim())?;
    require_code(t, code_set::PROJECT_CRITICALITY, input.project_criticality.trim())?;
    require_code(t, code_set::PROJECT_STATUS, input.status.trim())?;
    if let Some(portfolio) = input.portfolio.as_deref().filter(|v| !is_blank(v)) {
        require_code(t, code_set::PORTFOLIO, portfolio.trim())?;
    }

    check_date_order("startDate", "endDate", input.start_date, input.end_date)?;

    for (field, value) in [("budgetHours", input.budget_hours), ("budgetCost", input.budget_cost)] {
        if value < Decimal::ZERO {
            return Err(ValidationError::OutOfRange {
                field,
                value: value.to_string(),
                min: "0".to_string(),
                max: "unbounded".to_string(),
            });
        }
    }

    if let Some(pm_id) = input.pm_id {
        if !t.employees.contains_key(&pm_id) {
            return Err(ValidationError::not_found("PM employee", pm_id));
        }
    }
    Ok(())
}

fn project_from_input(id: i64, input: ProjectInput) -> Project {
    Project {
        id,
        code: input.code.trim().to_string(),
        name: input.name.trim().to_string(),
        project_type: input.project_type.trim().to_string(),
        project_size: input.project_size.trim().to_string(),
        project_criticality: input.project_criticality.trim().to_string(),
        portfolio: clean(input.portfolio),
        pm_id: input.pm_id,
        start_date: input.start_date,
        end_date: input.end_date,
        budget_hours: input.budget_hours,
        budget_cost: input.budget_cost,
        status: input.status.trim().to_string(),
        description: clean(input.description),
    }
}

/// Makes `pm_id` the project's PM member, reusing an existing PM row when there is one.
fn ensure_pm_member(t: &mut Tables, project_code: &str, pm_id: Option<EmployeeId>) {
    let Some(pm_id) = pm_id else {
        return;
    };
    let key = fold_key(project_code);
    if let Some(existing) = t
        .project_members
        .values_mut()
        .find(|m| fold_key(&m.project_code) == key && m.role.eq_ignore_ascii_case(PM_ROLE))
    {
        existing.employee_id = pm_id;
        existing.is_active = true;
        return;
    }
    let member = ProjectMember {
        id: next_id(&mut t.counters.project_member),
        project_code: project_code.to_string(),
        employee_id: pm_id,
        role: PM_ROLE.to_string(),
        allocation_pct: dec!(100),
        is_active: true,
        start_date: None,
        end_date: None,
    };
    t.project_members.insert(member.id, member);
}

pub(crate) fn insert_project(t: &mut Tables, input: ProjectInput) -> Result<Project, ValidationError> {
    validate(t, &input, None)?;
    let project = project_from_input(next_id(&mut t.counters.project), input);
    t.projects.insert(project.id, project.clone());
    ensure_pm_member(t, &project.code, project.pm_id);
    Ok(project)
}

/// Updates a project. A code change is carried over to members, tasks, timesheet entries and KPI scores.
pub(crate) fn update_project(t: &mut Tables, code: &str, input: ProjectInput) -> Result<Project, ValidationError> {
    let existing = t
        .project_by_code(code)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Project", code))?;
    validate(t, &input, Some(&existing.code))?;
    let updated = project_from_input(existing.id, input);

    if existing.code != updated.code {
        let old_key = fold_key(&existing.code);
        let mut moved = (0usize, 0usize, 0usize, 0usize);
        for member in t.project_members.values_mut().filter(|m| fold_key(&m.project_code) == old_key) {
            member.project_code = updated.code.clone();
            moved.0 += 1;
        }
        for task in t.tasks.values_mut().filter(|k| fold_key(&k.project_code) == old_key) {
            task.project_code = updated.code.clone();
            moved.1 += 1;
        }
        for entry in t.timesheets.values_mut().filter(|e| fold_key(&e.project_code) == old_key) {
            entry.project_code = updated.code.clone();
            moved.2 += 1;
        }
        for score in t
            .kpi_scores
            .values_mut()
            .filter(|s| s.project_code.as_deref().map(fold_key).as_deref() == Some(old_key.as_str()))
        {
            score.project_code = Some(updated.code.clone());
            moved.3 += 1;
        }
        debug!(
            "Project code {} -> {}: moved {} members, {} tasks, {} timesheet entries, {} KPI scores",
            existing.code, updated.code, moved.0, moved.1, moved.2, moved.3
        );
    }

    t.projects.insert(updated.id, updated.clone());
    ensure_pm_member(t, &updated.code, updated.pm_id);
    Ok(updated)
}

pub(crate) fn delete_project(t: &mut Tables, code: &str) -> Result<Project, ValidationError> {
    let existing = t
        .project_by_code(code)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Project", code))?;
    let key = fold_key(&existing.code);
    if t.timesheets.values().any(|e| fold_key(&e.project_code) == key) {
        return Err(ValidationError::InUse {
            entity: "Project",
            key: existing.code,
            referenced_by: "timesheet entries",
        });
    }
    t.project_members.retain(|_, m| fold_key(&m.project_code) != key);
    t.tasks.retain(|_, k| fold_key(&k.project_code) != key);
    t.projects.remove(&existing.id);
    Ok(existing)
}

fn validate_member(t: &Tables, input: &MemberInput) -> Result<String, ValidationError> {
    if is_blank(&input.role) {
        return Err(ValidationError::Required { field: "role" });
    }
    let role = input.role.trim().to_uppercase();
    if !MEMBER_ROLES.contains(&role.as_str()) {
        return Err(ValidationError::InvalidValue {
            field: "role",
            value: input.role.clone(),
        });
    }
    if !t.employees.contains_key(&input.employee_id) {
        return Err(ValidationError::not_found("Employee", input.employee_id));
    }
    if input.allocation_pct < Decimal::ZERO || input.allocation_pct > dec!(100) {
        return Err(ValidationError::OutOfRange {
            field: "allocationPct",
            value: input.allocation_pct.to_string(),
            min: "0".to_string(),
            max: "100".to_string(),
        });
    }
    check_date_order("startDate", "endDate", input.start_date, input.end_date)?;
    Ok(role)
}

pub(crate) fn insert_member(t: &mut Tables, project_code: &str, input: MemberInput) -> Result<ProjectMember, ValidationError> {
    let code = t
        .project_by_code(project_code)
        .map(|p| p.code.clone())
        .ok_or_else(|| ValidationError::not_found("Project", project_code))?;
    let role = validate_member(t, &input)?;
    if t.is_project_member(&code, input.employee_id) {
        return Err(ValidationError::duplicate(
            "Project member",
            format!("{}/{}", code, input.employee_id),
        ));
    }
    let member = ProjectMember {
        id: next_id(&mut t.counters.project_member),
        project_code: code,
        employee_id: input.employee_id,
        role,
        allocation_pct: input.allocation_pct,
        is_active: input.is_active.unwrap_or(true),
        start_date: input.start_date,
        end_date: input.end_date,
    };
    t.project_members.insert(member.id, member.clone());
    Ok(member)
}

pub(crate) fn update_member(
    t: &mut Tables,
    project_code: &str,
    member_id: i64,
    input: MemberInput,
) -> Result<ProjectMember, ValidationError> {
    let key = fold_key(project_code);
    let existing = t
        .project_members
        .get(&member_id)
        .filter(|m| fold_key(&m.project_code) == key)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Project member", member_id))?;
    let role = validate_member(t, &input)?;
    if input.employee_id != existing.employee_id && t.is_project_member(&existing.project_code, input.employee_id) {
        return Err(ValidationError::duplicate(
            "Project member",
            format!("{}/{}", existing.project_code, input.employee_id),
        ));
    }
    let updated = ProjectMember {
        employee_id: input.employee_id,
        role,
        allocation_pct: input.allocation_pct,
        is_active: input.is_active.unwrap_or(existing.is_active),
        start_date: input.start_date,
        end_date: input.end_date,
        ..existing
    };
    t.project_members.insert(member_id, updated.clone());
    Ok(updated)
}

pub(crate) fn remove_member(t: &mut Tables, project_code: &str, member_id: i64) -> Result<ProjectMember, ValidationError> {
    let key = fold_key(project_code);
    let is_in_project = t
        .project_members
        .get(&member_id)
        .map_or(false, |m| fold_key(&m.project_code) == key);
    if !is_in_project {
        return Err(ValidationError::not_found("Project member", member_id));
    }
    t.project_members
        .remove(&member_id)
        .ok_or_else(|| ValidationError::not_found("Project member", member_id))
}

pub fn members_of(t: &Tables, project_code: &str) -> Vec<ProjectMember> {
    let key = fold_key(project_code);
    t.project_members
        .values()
        .filter(|m| fold_key(&m.project_code) == key)
        .cloned()
        .collect()
}

// --- Service ---

#[derive(Clone)]
pub struct ProjectService {
    store: Store,
}

impl ProjectService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn list(&self) -> ServiceResult<Vec<Project>> {
        self.search(&ProjectFilter::default())
    }

    /// Matching projects ordered by code.
    pub fn search(&self, filter: &ProjectFilter) -> ServiceResult<Vec<Project>> {
        let mut found = self.store.read(|t| {
            t.projects
                .values()
                .filter(|p| filter.matches(p))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        found.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(found)
    }

    pub fn get(&self, code: &str) -> ServiceResult<Option<Project>> {
        Ok(self.store.read(|t| t.project_by_code(code).cloned())?)
    }

    pub fn add(&self, input: ProjectInput) -> ServiceResult<Project> {
        let result = self
            .store
            .write(|t| -> ServiceResult<Project> { Ok(insert_project(t, input)?) });
        match &result {
            Ok(p) => info!("Added project {} ({}), PM {:?}", p.code, p.name, p.pm_id),
            Err(e) => warn!("Rejected new project: {}", e),
        }
        result
    }

    pub fn update(&self, code: &str, input: ProjectInput) -> ServiceResult<Project> {
        let result = self
            .store
            .write(|t| -> ServiceResult<Project> { Ok(update_project(t, code, input)?) });
        match &result {
            Ok(p) => info!("Updated project {} (was {})", p.code, code),
            Err(e) => warn!("Rejected update of project {}: {}", code, e),
        }
        result
    }

    pub fn delete(&self, code: &str) -> ServiceResult<()> {
        let removed = self
            .store
            .write(|t| -> ServiceResult<Project> { Ok(delete_project(t, code)?) })?;
        info!("Deleted project {}", removed.code);
        Ok(())
    }

    pub fn members(&self, project_code: &str) -> ServiceResult<Vec<ProjectMember>> {
        Ok(self.store.read(|t| members_of(t, project_code))?)
    }

    pub fn add_member(&self, project_code: &str, input: MemberInput) -> ServiceResult<ProjectMember> {
        let result = self.store.write(|t| -> ServiceResult<ProjectMember> {
            Ok(insert_member(t, project_code, input)?)
        });
        match &result {
            Ok(m) => info!(
                "Added member {} to project {} as {} ({}%)",
                m.employee_id, m.project_code, m.role, m.allocation_pct
            ),
            Err(e) => warn!("Rejected new member for project {}: {}", project_code, e),
        }
        result
    }

    pub fn update_member(&self, project_code: &str, member_id: i64, input: MemberInput) -> ServiceResult<ProjectMember> {
        let member = self.store.write(|t| -> ServiceResult<ProjectMember> {
            Ok(update_member(t, project_code, member_id, input)?)
        })?;
        info!("Updated member {} of project {}", member.id, member.project_code);
        Ok(member)
    }

    pub fn remove_member(&self, project_code: &str, member_id: i64) -> ServiceResult<()> {
        let removed = self.store.write(|t| -> ServiceResult<ProjectMember> {
            Ok(remove_member(t, project_code, member_id)?)
        })?;
        info!("Removed member {} from project {}", removed.employee_id, removed.project_code);
        Ok(())
    }
}

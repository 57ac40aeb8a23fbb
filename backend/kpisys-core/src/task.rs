// src/task.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codes::{code_set, require_code};
use crate::employee::EmployeeId;
use crate::error::{ServiceResult, ValidationError};
use crate::store::{clean, fold_key, is_blank, next_id, Store, Tables};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTask {
    pub id: i64,
    pub project_code: String,
    pub task_name: String,
    pub task_group: Option<String>,
    pub responsible_id: Option<EmployeeId>,
    pub plan_start: Option<NaiveDate>,
    pub plan_end: Option<NaiveDate>,
    pub task_progress: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskInput {
    pub task_name: String,
    pub task_group: Option<String>,
    pub responsible_id: Option<EmployeeId>,
    pub plan_start: Option<NaiveDate>,
    pub plan_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressInput {
    pub progress: Decimal,
}

fn validate(t: &Tables, project_code: &str, input: &TaskInput) -> Result<(), ValidationError> {
    if is_blank(&input.task_name) {
        return Err(ValidationError::Required { field: "taskName" });
    }
    if let Some(group) = input.task_group.as_deref().filter(|g| !is_blank(g)) {
        require_code(t, code_set::TASK_GROUP, group.trim())?;
    }
    if let Some(responsible_id) = input.responsible_id {
        if !t.is_project_member(project_code, responsible_id) {
            return Err(ValidationError::NotProjectMember {
                employee_id: responsible_id,
                project_code: project_code.to_string(),
            });
        }
    }
    if let (Some(start), Some(end)) = (input.plan_start, input.plan_end) {
        if start > end {
            return Err(ValidationError::DateOrder {
                start_field: "planStart",
                end_field: "planEnd",
                start,
                end,
            });
        }
    }
    Ok(())
}

pub(crate) fn insert_task(t: &mut Tables, project_code: &str, input: TaskInput) -> Result<ProjectTask, ValidationError> {
    let code = t
        .project_by_code(project_code)
        .map(|p| p.code.clone())
        .ok_or_else(|| ValidationError::not_found("Project", project_code))?;
    validate(t, &code, &input)?;
    let task = ProjectTask {
        id: next_id(&mut t.counters.task),
        project_code: code,
        task_name: input.task_name.trim().to_string(),
        task_group: clean(input.task_group),
        responsible_id: input.responsible_id,
        plan_start: input.plan_start,
        plan_end: input.plan_end,
        task_progress: Decimal::ZERO,
    };
    t.tasks.insert(task.id, task.clone());
    Ok(task)
}

pub(crate) fn update_task(t: &mut Tables, task_id: i64, input: TaskInput) -> Result<ProjectTask, ValidationError> {
    let existing = t
        .tasks
        .get(&task_id)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Task", task_id))?;
    validate(t, &existing.project_code, &input)?;
    let updated = ProjectTask {
        task_name: input.task_name.trim().to_string(),
        task_group: clean(input.task_group),
        responsible_id: input.responsible_id,
        plan_start: input.plan_start,
        plan_end: input.plan_end,
        ..existing
    };
    t.tasks.insert(task_id, updated.clone());
    Ok(updated)
}

pub(crate) fn set_progress(t: &mut Tables, task_id: i64, progress: Decimal) -> Result<ProjectTask, ValidationError> {
    if progress < Decimal::ZERO || progress > dec!(100) {
        return Err(ValidationError::OutOfRange {
            field: "taskProgress",
            value: progress.to_string(),
            min: "0".to_string(),
            max: "100".to_string(),
        });
    }
    let task = t
        .tasks
        .get_mut(&task_id)
        .ok_or_else(|| ValidationError::not_found("Task", task_id))?;
    task.task_progress = progress;
    Ok(task.clone())
}

pub(crate) fn delete_task(t: &mut Tables, task_id: i64) -> Result<ProjectTask, ValidationError> {
    if !t.tasks.contains_key(&task_id) {
        return Err(ValidationError::not_found("Task", task_id));
    }
    if t.timesheets.values().any(|e| e.task_id == Some(task_id)) {
        return Err(ValidationError::InUse {
            entity: "Task",
            key: task_id.to_string(),
            referenced_by: "timesheet entries",
        });
    }
    t.tasks
        .remove(&task_id)
        .ok_or_else(|| ValidationError::not_found("Task", task_id))
}

// --- Service ---

#[derive(Clone)]
pub struct TaskService {
    store: Store,
}

impl TaskService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Tasks of a project ordered by planned start (unscheduled last), then id.
    pub fn list(&self, project_code: &str) -> ServiceResult<Vec<ProjectTask>> {
        let key = fold_key(project_code);
        let mut tasks = self.store.read(|t| {
            t.tasks
                .values()
                .filter(|k| fold_key(&k.project_code) == key)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        tasks.sort_by_key(|k| (k.plan_start.is_none(), k.plan_start, k.id));
        Ok(tasks)
    }

    pub fn get(&self, task_id: i64) -> ServiceResult<Option<ProjectTask>> {
        Ok(self.store.read(|t| t.tasks.get(&task_id).cloned())?)
    }

    pub fn add(&self, project_code: &str, input: TaskInput) -> ServiceResult<ProjectTask> {
        let result = self
            .store
            .write(|t| -> ServiceResult<ProjectTask> { Ok(insert_task(t, project_code, input)?) });
        match &result {
            Ok(k) => info!("Added task {} '{}' to project {}", k.id, k.task_name, k.project_code),
            Err(e) => warn!("Rejected new task for project {}: {}", project_code, e),
        }
        result
    }

    pub fn update(&self, task_id: i64, input: TaskInput) -> ServiceResult<ProjectTask> {
        let result = self
            .store
            .write(|t| -> ServiceResult<ProjectTask> { Ok(update_task(t, task_id, input)?) });
        match &result {
            Ok(k) => info!("Updated task {} of project {}", k.id, k.project_code),
            Err(e) => warn!("Rejected update of task {}: {}", task_id, e),
        }
        result
    }

    pub fn update_progress(&self, task_id: i64, progress: Decimal) -> ServiceResult<ProjectTask> {
        let task = self
            .store
            .write(|t| -> ServiceResult<ProjectTask> { Ok(set_progress(t, task_id, progress)?) })?;
        info!("Task {} progress set to {}%", task.id, task.task_progress);
        Ok(task)
    }

    pub fn delete(&self, task_id: i64) -> ServiceResult<()> {
        let removed = self
            .store
            .write(|t| -> ServiceResult<ProjectTask> { Ok(delete_task(t, task_id)?) })?;
        info!("Deleted task {} from project {}", removed.id, removed.project_code);
        Ok(())
    }
}

#[cfg(test)]
mod task_service_tests {
    use super::*;
    use crate::clock::Clock;
    use crate::error::ServiceError;
    use crate::project::{insert_project, ProjectInput};
    use crate::seed::seed_directory_data;

    fn setup_test_environment() -> TaskService {
        let store = Store::in_memory();
        seed_directory_data(&store, &Clock::system()).unwrap();
        store
            .write(|t| -> ServiceResult<()> {
                insert_project(
                    t,
                    ProjectInput {
                        code: "PRJ-T".to_string(),
                        name: "Task host".to_string(),
                        project_type: "開發".to_string(),
                        project_size: "S".to_string(),
                        project_criticality: "一般".to_string(),
                        status: "規劃中".to_string(),
                        pm_id: Some(1001),
                        ..Default::default()
                    },
                )?;
                Ok(())
            })
            .unwrap();
        TaskService::new(store)
    }

    fn named(name: &str) -> TaskInput {
        TaskInput {
            task_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn new_task_starts_at_zero_progress() {
        let service = setup_test_environment();
        let task = service.add("prj-t", named("Kickoff")).unwrap();
        assert_eq!(task.project_code, "PRJ-T");
        assert_eq!(task.task_progress, Decimal::ZERO);
    }

    #[test]
    fn responsible_employee_must_be_a_project_member() {
        let service = setup_test_environment();
        let mut input = named("Design");
        input.responsible_id = Some(1004);
        assert!(matches!(
            service.add("PRJ-T", input).unwrap_err(),
            ServiceError::Validation(ValidationError::NotProjectMember { .. })
        ));

        let mut input = named("Design");
        input.responsible_id = Some(1001);
        assert!(service.add("PRJ-T", input).is_ok());
    }

    #[test]
    fn task_group_must_be_a_known_code() {
        let service = setup_test_environment();
        let mut input = named("Testing");
        input.task_group = Some("QA".to_string());
        assert!(matches!(
            service.add("PRJ-T", input).unwrap_err(),
            ServiceError::Validation(ValidationError::UnknownCode { .. })
        ));
        let mut input = named("Testing");
        input.task_group = Some("UT".to_string());
        assert!(service.add("PRJ-T", input).is_ok());
    }

    #[test]
    fn progress_is_bounded() {
        let service = setup_test_environment();
        let task = service.add("PRJ-T", named("Build")).unwrap();
        assert_eq!(service.update_progress(task.id, dec!(55.5)).unwrap().task_progress, dec!(55.5));
        assert!(service.update_progress(task.id, dec!(100.1)).is_err());
        assert!(service.update_progress(task.id, dec!(-1)).is_err());
    }

    #[test]
    fn list_orders_scheduled_tasks_first() {
        let service = setup_test_environment();
        service.add("PRJ-T", named("Unscheduled")).unwrap();
        let mut later = named("Later");
        later.plan_start = NaiveDate::from_ymd_opt(2025, 5, 1);
        service.add("PRJ-T", later).unwrap();
        let mut sooner = named("Sooner");
        sooner.plan_start = NaiveDate::from_ymd_opt(2025, 4, 1);
        service.add("PRJ-T", sooner).unwrap();

        let names: Vec<String> = service.list("PRJ-T").unwrap().into_iter().map(|k| k.task_name).collect();
        assert_eq!(names, vec!["Sooner", "Later", "Unscheduled"]);
    }
}

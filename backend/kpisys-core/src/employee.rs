// src/employee.rs
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{ServiceResult, ValidationError};
use crate::organization::OrgId;
use crate::store::{clean, fold_key, is_blank, next_id, Store, Tables};

pub type EmployeeId = i64;

pub const DEFAULT_STATUS: &str = "Active";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|e| panic!("invalid email pattern: {}", e))
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub employee_no: String,
    pub name: String,
    pub email: Option<String>,
    pub title: String,
    pub org_id: OrgId,
    pub manager_id: Option<EmployeeId>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRole {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub role_code: String,
    pub role_name: String,
    pub is_primary: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmployeeInput {
    pub employee_no: String,
    pub name: String,
    pub email: Option<String>,
    pub title: String,
    pub org_id: String,
    pub manager_id: Option<EmployeeId>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoleInput {
    pub role_name: String,
    pub role_code: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmployeeFilter {
    pub employee_no: Option<String>,
    pub name: Option<String>,
    pub org_id: Option<String>,
    pub title: Option<String>,
    pub manager_id: Option<EmployeeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeDetail {
    #[serde(flatten)]
    pub employee: Employee,
    pub roles: Vec<EmployeeRole>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

impl EmployeeFilter {
    fn matches(&self, employee: &Employee) -> bool {
        if let Some(no) = self.employee_no.as_deref().filter(|v| !is_blank(v)) {
            if !contains_ignore_case(&employee.employee_no, no) {
                return false;
            }
        }
        if let Some(name) = self.name.as_deref().filter(|v| !is_blank(v)) {
            if !contains_ignore_case(&employee.name, name) {
                return false;
            }
        }
        if let Some(org_id) = self.org_id.as_deref().filter(|v| !is_blank(v)) {
            if !employee.org_id.eq_ignore_ascii_case(org_id.trim()) {
                return false;
            }
        }
        if let Some(title) = self.title.as_deref().filter(|v| !is_blank(v)) {
            if !contains_ignore_case(&employee.title, title) {
                return false;
            }
        }
        if let Some(manager_id) = self.manager_id {
            if employee.manager_id != Some(manager_id) {
                return false;
            }
        }
        true
    }
}

// --- Table rules ---

fn validate(t: &Tables, input: &EmployeeInput, updating: Option<EmployeeId>) -> Result<OrgId, ValidationError> {
    if is_blank(&input.employee_no) {
        return Err(ValidationError::Required { field: "employeeNo" });
    }
    if is_blank(&input.name) {
        return Err(ValidationError::Required { field: "name" });
    }
    if input.status.as_deref().map_or(false, is_blank) {
        return Err(ValidationError::Required { field: "status" });
    }
    if is_blank(&input.org_id) {
        return Err(ValidationError::Required { field: "orgId" });
    }
    let org_id = t
        .organization(&input.org_id)
        .map(|o| o.org_id.clone())
        .ok_or_else(|| ValidationError::not_found("Organization", input.org_id.trim()))?;

    let employee_no = fold_key(&input.employee_no);
    if t
        .employees
        .values()
        .any(|e| fold_key(&e.employee_no) == employee_no && Some(e.id) != updating)
    {
        return Err(ValidationError::duplicate("Employee number", input.employee_no.trim()));
    }

    if let Some(email) = input.email.as_deref().filter(|v| !is_blank(v)) {
        if !is_valid_email(email) {
            return Err(ValidationError::InvalidValue {
                field: "email",
                value: email.to_string(),
            });
        }
        let email_key = fold_key(email);
        if t.employees.values().any(|e| {
            e.email.as_deref().map(fold_key).as_deref() == Some(email_key.as_str())
                && Some(e.id) != updating
        }) {
            return Err(ValidationError::duplicate("Employee email", email.trim()));
        }
    }

    if let Some(manager_id) = input.manager_id {
        if Some(manager_id) == updating {
            return Err(ValidationError::SelfManager {
                employee_id: manager_id,
            });
        }
        if !t.employees.contains_key(&manager_id) {
            return Err(ValidationError::not_found("Manager", manager_id));
        }
    }
    Ok(org_id)
}

pub(crate) fn insert_employee(
    t: &mut Tables,
    input: EmployeeInput,
    now: NaiveDateTime,
) -> Result<Employee, ValidationError> {
    let org_id = validate(t, &input, None)?;
    let employee = Employee {
        id: next_id(&mut t.counters.employee),
        employee_no: input.employee_no.trim().to_string(),
        name: input.name.trim().to_string(),
        email: clean(input.email),
        title: input.title.trim().to_string(),
        org_id,
        manager_id: input.manager_id,
        status: clean(input.status).unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        created_at: now,
        updated_at: None,
    };
    t.employees.insert(employee.id, employee.clone());
    Ok(employee)
}

pub(crate) fn update_employee(
    t: &mut Tables,
    id: EmployeeId,
    input: EmployeeInput,
    now: NaiveDateTime,
) -> Result<Employee, ValidationError> {
    let existing = t
        .employees
        .get(&id)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Employee", id))?;
    let org_id = validate(t, &input, Some(id))?;
    let updated = Employee {
        employee_no: input.employee_no.trim().to_string(),
        name: input.name.trim().to_string(),
        email: clean(input.email),
        title: input.title.trim().to_string(),
        org_id,
        manager_id: input.manager_id,
        status: clean(input.status).unwrap_or_else(|| existing.status.clone()),
        updated_at: Some(now),
        ..existing
    };
    t.employees.insert(id, updated.clone());
    Ok(updated)
}

pub(crate) fn delete_employee(t: &mut Tables, id: EmployeeId) -> Result<Employee, ValidationError> {
    let removed = t
        .employees
        .remove(&id)
        .ok_or_else(|| ValidationError::not_found("Employee", id))?;
    for subordinate in t.employees.values_mut().filter(|e| e.manager_id == Some(id)) {
        subordinate.manager_id = None;
    }
    t.employee_roles.retain(|_, r| r.employee_id != id);
    Ok(removed)
}

/// Roles of one employee, primary first, then by name.
pub fn roles_of(t: &Tables, employee_id: EmployeeId) -> Vec<EmployeeRole> {
    let mut roles: Vec<EmployeeRole> = t
        .employee_roles
        .values()
        .filter(|r| r.employee_id == employee_id)
        .cloned()
        .collect();
    roles.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| a.role_name.cmp(&b.role_name))
    });
    roles
}

fn set_primary(t: &mut Tables, employee_id: EmployeeId, role_id: i64) {
    for role in t
        .employee_roles
        .values_mut()
        .filter(|r| r.employee_id == employee_id)
    {
        role.is_primary = role.id == role_id;
    }
}

pub(crate) fn insert_role(
    t: &mut Tables,
    employee_id: EmployeeId,
    input: RoleInput,
    now: NaiveDateTime,
) -> Result<EmployeeRole, ValidationError> {
    if !t.employees.contains_key(&employee_id) {
        return Err(ValidationError::not_found("Employee", employee_id));
    }
    if is_blank(&input.role_name) {
        return Err(ValidationError::Required { field: "roleName" });
    }
    let role_name = input.role_name.trim().to_string();
    let name_key = fold_key(&role_name);
    let existing: Vec<&EmployeeRole> = t
        .employee_roles
        .values()
        .filter(|r| r.employee_id == employee_id)
        .collect();
    if existing.iter().any(|r| fold_key(&r.role_name) == name_key) {
        return Err(ValidationError::duplicate("Role", role_name));
    }
    // The first role an employee gets is primary regardless of the flag.
    let is_primary = input.is_primary || existing.is_empty();

    let role = EmployeeRole {
        id: next_id(&mut t.counters.employee_role),
        employee_id,
        role_code: clean(input.role_code).unwrap_or_else(|| role_name.clone()),
        role_name,
        is_primary,
        created_at: now,
    };
    t.employee_roles.insert(role.id, role.clone());
    if is_primary {
        set_primary(t, employee_id, role.id);
    }
    Ok(role)
}

pub(crate) fn set_primary_role(
    t: &mut Tables,
    employee_id: EmployeeId,
    role_id: i64,
) -> Result<(), ValidationError> {
    if !t.employees.contains_key(&employee_id) {
        return Err(ValidationError::not_found("Employee", employee_id));
    }
    match t.employee_roles.get(&role_id) {
        Some(role) if role.employee_id == employee_id => {
            set_primary(t, employee_id, role_id);
            Ok(())
        }
        _ => Err(ValidationError::not_found("Role", role_id)),
    }
}

pub(crate) fn remove_role(t: &mut Tables, employee_id: EmployeeId, role_id: i64) -> Result<EmployeeRole, ValidationError> {
    if !t.employees.contains_key(&employee_id) {
        return Err(ValidationError::not_found("Employee", employee_id));
    }
    let removed = match t.employee_roles.get(&role_id) {
        Some(role) if role.employee_id == employee_id => t.employee_roles.remove(&role_id),
        _ => None,
    }
    .ok_or_else(|| ValidationError::not_found("Role", role_id))?;

    if removed.is_primary {
        let successor = t
            .employee_roles
            .values()
            .filter(|r| r.employee_id == employee_id)
            .map(|r| r.id)
            .min();
        if let Some(successor) = successor {
            set_primary(t, employee_id, successor);
        }
    }
    Ok(removed)
}

// --- Service ---

#[derive(Clone)]
pub struct EmployeeService {
    store: Store,
    clock: Clock,
}

impl EmployeeService {
    pub fn new(store: Store, clock: Clock) -> Self {
        Self { store, clock }
    }

    pub fn list(&self) -> ServiceResult<Vec<Employee>> {
        self.search(&EmployeeFilter::default())
    }

    /// Matching employees ordered by employee number.
    pub fn search(&self, filter: &EmployeeFilter) -> ServiceResult<Vec<Employee>> {
        let mut found = self.store.read(|t| {
            t.employees
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        found.sort_by(|a, b| a.employee_no.cmp(&b.employee_no));
        Ok(found)
    }

    pub fn get(&self, id: EmployeeId) -> ServiceResult<Option<EmployeeDetail>> {
        Ok(self.store.read(|t| {
            t.employees.get(&id).map(|e| EmployeeDetail {
                employee: e.clone(),
                roles: roles_of(t, id),
            })
        })?)
    }

    pub fn add(&self, input: EmployeeInput) -> ServiceResult<Employee> {
        let now = self.clock.now();
        let result = self
            .store
            .write(|t| -> ServiceResult<Employee> { Ok(insert_employee(t, input, now)?) });
        match &result {
            Ok(e) => info!("Added employee {} {} ({}) in {}", e.id, e.employee_no, e.name, e.org_id),
            Err(e) => warn!("Rejected new employee: {}", e),
        }
        result
    }

    pub fn update(&self, id: EmployeeId, input: EmployeeInput) -> ServiceResult<Employee> {
        let now = self.clock.now();
        let result = self
            .store
            .write(|t| -> ServiceResult<Employee> { Ok(update_employee(t, id, input, now)?) });
        match &result {
            Ok(e) => info!("Updated employee {} {}", e.id, e.employee_no),
            Err(e) => warn!("Rejected update of employee {}: {}", id, e),
        }
        result
    }

    pub fn delete(&self, id: EmployeeId) -> ServiceResult<()> {
        let removed = self
            .store
            .write(|t| -> ServiceResult<Employee> { Ok(delete_employee(t, id)?) })?;
        info!("Deleted employee {} {}", removed.id, removed.employee_no);
        Ok(())
    }

    pub fn roles(&self, employee_id: EmployeeId) -> ServiceResult<Vec<EmployeeRole>> {
        Ok(self.store.read(|t| roles_of(t, employee_id))?)
    }

    pub fn add_role(&self, employee_id: EmployeeId, input: RoleInput) -> ServiceResult<EmployeeRole> {
        let now = self.clock.now();
        let role = self.store.write(|t| -> ServiceResult<EmployeeRole> {
            Ok(insert_role(t, employee_id, input, now)?)
        })?;
        info!(
            "Added role {} to employee {} (primary: {})",
            role.role_name, employee_id, role.is_primary
        );
        Ok(role)
    }

    pub fn set_primary_role(&self, employee_id: EmployeeId, role_id: i64) -> ServiceResult<()> {
        self.store
            .write(|t| -> ServiceResult<()> { Ok(set_primary_role(t, employee_id, role_id)?) })?;
        info!("Set role {} as primary for employee {}", role_id, employee_id);
        Ok(())
    }

    pub fn remove_role(&self, employee_id: EmployeeId, role_id: i64) -> ServiceResult<()> {
        let removed = self.store.write(|t| -> ServiceResult<EmployeeRole> {
            Ok(remove_role(t, employee_id, role_id)?)
        })?;
        info!("Removed role {} from employee {}", removed.role_name, employee_id);
        Ok(())
    }
}

#[cfg(test)]
mod employee_service_tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::organization::{insert_organization, OrganizationInput};
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn employee(no: &str, name: &str, org: &str, manager_id: Option<EmployeeId>) -> EmployeeInput {
        EmployeeInput {
            employee_no: no.to_string(),
            name: name.to_string(),
            email: Some(format!("{}@example.com", no.to_lowercase())),
            title: "工程師".to_string(),
            org_id: org.to_string(),
            manager_id,
            status: None,
        }
    }

    fn setup_test_environment() -> EmployeeService {
        let store = Store::in_memory();
        store
            .write(|t| -> ServiceResult<()> {
                for (id, parent) in [("HQ", None), ("RD", Some("HQ"))] {
                    insert_organization(
                        t,
                        OrganizationInput {
                            org_id: id.to_string(),
                            org_name: id.to_string(),
                            parent_org_id: parent.map(String::from),
                            ..Default::default()
                        },
                        now(),
                    )?;
                }
                Ok(())
            })
            .unwrap();
        EmployeeService::new(store, Clock::fixed(now()))
    }

    fn primary_count(service: &EmployeeService, employee_id: EmployeeId) -> usize {
        service
            .roles(employee_id)
            .unwrap()
            .iter()
            .filter(|r| r.is_primary)
            .count()
    }

    #[test]
    fn ids_start_at_1001_and_status_defaults() {
        let service = setup_test_environment();
        let first = service.add(employee("EMP-001", "王小明", "HQ", None)).unwrap();
        assert_eq!(first.id, 1001);
        assert_eq!(first.status, DEFAULT_STATUS);
    }

    #[test]
    fn employee_number_and_email_must_be_unique() {
        let service = setup_test_environment();
        service.add(employee("EMP-001", "王小明", "HQ", None)).unwrap();

        let err = service.add(employee("emp-001", "Other", "RD", None)).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::Duplicate { .. })));

        let mut same_email = employee("EMP-002", "Other", "RD", None);
        same_email.email = Some("EMP-001@example.com".to_string());
        let err = service.add(same_email).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::Duplicate { .. })));
    }

    #[test]
    fn unknown_org_and_manager_are_rejected() {
        let service = setup_test_environment();
        assert!(service.add(employee("EMP-001", "A", "NOPE", None)).is_err());
        assert!(service.add(employee("EMP-001", "A", "HQ", Some(4242))).is_err());
    }

    #[test]
    fn employee_cannot_manage_themselves() {
        let service = setup_test_environment();
        let e = service.add(employee("EMP-001", "A", "HQ", None)).unwrap();
        let err = service
            .update(e.id, employee("EMP-001", "A", "HQ", Some(e.id)))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::SelfManager { .. })));
    }

    #[test]
    fn delete_clears_manager_on_subordinates() {
        let service = setup_test_environment();
        let boss = service.add(employee("EMP-001", "Boss", "HQ", None)).unwrap();
        let report = service.add(employee("EMP-002", "Report", "RD", Some(boss.id))).unwrap();
        service.delete(boss.id).unwrap();
        let report = service.get(report.id).unwrap().unwrap();
        assert_eq!(report.employee.manager_id, None);
    }

    #[test]
    fn search_filters_by_name_org_and_manager() {
        let service = setup_test_environment();
        let boss = service.add(employee("EMP-001", "王小明", "HQ", None)).unwrap();
        service.add(employee("EMP-002", "林美美", "RD", Some(boss.id))).unwrap();
        service.add(employee("EMP-003", "陳大華", "RD", Some(boss.id))).unwrap();

        let by_org = service
            .search(&EmployeeFilter {
                org_id: Some("rd".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_org.len(), 2);

        let by_name = service
            .search(&EmployeeFilter {
                name: Some("美".to_string()),
                manager_id: Some(boss.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].employee_no, "EMP-002");
    }

    #[test]
    fn exactly_one_primary_role_through_role_changes() {
        let service = setup_test_environment();
        let e = service.add(employee("EMP-001", "A", "HQ", None)).unwrap();

        let first = service
            .add_role(e.id, RoleInput { role_name: "PM".to_string(), ..Default::default() })
            .unwrap();
        assert!(first.is_primary);

        let second = service
            .add_role(e.id, RoleInput { role_name: "SA".to_string(), is_primary: true, ..Default::default() })
            .unwrap();
        assert_eq!(primary_count(&service, e.id), 1);
        assert_eq!(service.roles(e.id).unwrap()[0].id, second.id);

        service.set_primary_role(e.id, first.id).unwrap();
        assert_eq!(primary_count(&service, e.id), 1);
        assert_eq!(service.roles(e.id).unwrap()[0].id, first.id);

        service.remove_role(e.id, first.id).unwrap();
        assert_eq!(primary_count(&service, e.id), 1);
        assert_eq!(service.roles(e.id).unwrap()[0].id, second.id);
    }

    #[test]
    fn duplicate_role_name_is_rejected_and_code_defaults_to_name() {
        let service = setup_test_environment();
        let e = service.add(employee("EMP-001", "A", "HQ", None)).unwrap();
        let role = service
            .add_role(e.id, RoleInput { role_name: "專案經理".to_string(), ..Default::default() })
            .unwrap();
        assert_eq!(role.role_code, "專案經理");
        assert!(service
            .add_role(e.id, RoleInput { role_name: " 專案經理 ".to_string(), ..Default::default() })
            .is_err());
    }
}

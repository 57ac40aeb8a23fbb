// src/import.rs
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::codes::{code_exists, code_set, insert_code, CodeInput};
use crate::employee::{insert_employee, insert_role, roles_of, set_primary_role, update_employee, EmployeeInput, RoleInput};
use crate::error::{ImportError, ServiceError, ServiceResult, ValidationError};
use crate::organization::{ensure_unassigned, insert_organization, update_organization, OrganizationInput};
use crate::store::{fold_key, is_blank, Store, Tables};

const DEFAULT_TITLE: &str = "未指定";

// --- Header synonyms ---
mod headers {
    pub const ORG_CODE: &[&str] = &["OrgCode", "組織代碼", "部門代碼", "OrgId", "部門代號"];
    pub const ORG_NAME: &[&str] = &["OrgName", "組織名稱", "部門名稱"];
    pub const ORG_PARENT: &[&str] = &["ParentOrgCode", "上層組織代碼", "ParentOrgId", "上層部門代碼"];
    pub const ORG_LEVEL: &[&str] = &["OrgLevel", "Level", "層級"];

    pub const EMP_NO: &[&str] = &["EmpId", "員工編號", "EmployeeNo", "EmployeeId"];
    pub const EMP_NAME: &[&str] = &["Name", "姓名"];
    pub const EMP_EMAIL: &[&str] = &["Email", "帳號", "電子郵件"];
    pub const EMP_ORG: &[&str] = &["DeptCode", "部門代碼", "OrgCode", "OrgId", "部門"];
    pub const EMP_TITLE: &[&str] = &["Title", "職稱"];
    pub const EMP_ROLES: &[&str] = &["職掌", "Roles", "Role", "RoleName"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub organizations_read: usize,
    pub organizations_created: usize,
    pub organizations_updated: usize,
    pub organizations_skipped: usize,
    pub employees_read: usize,
    pub employees_created: usize,
    pub employees_updated: usize,
    pub employees_skipped: usize,
    pub roles_linked: usize,
}

// --- Sheet reading ---

/// All non-empty rows of the first worksheet (or the CSV file), as trimmed text.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, ImportError> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let rows = match extension.as_str() {
        "xlsx" | "xls" => read_workbook(path)?,
        "csv" => read_csv(path)?,
        _ => {
            return Err(ImportError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
        }
    };
    Ok(rows
        .into_iter()
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) | Data::Empty => String::new(),
        Data::DateTime(d) => d.to_string(),
        Data::DateTimeIso(d) => d.clone(),
        Data::DurationIso(d) => d.clone(),
    }
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<String>>, ImportError> {
    let spreadsheet_error = |message: String| ImportError::Spreadsheet {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| spreadsheet_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| spreadsheet_error("Workbook has no worksheets".to_string()))?
        .map_err(|e| spreadsheet_error(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
                .collect(),
        );
    }
    Ok(rows)
}

/// Column positions keyed by folded header text.
struct HeaderMap(HashMap<String, usize>);

impl HeaderMap {
    fn new(header_row: &[String]) -> Self {
        let mut columns = HashMap::new();
        for (index, name) in header_row.iter().enumerate() {
            if !is_blank(name) {
                columns.entry(fold_key(name)).or_insert(index);
            }
        }
        HeaderMap(columns)
    }

    /// Value under the first synonym present in the header, if non-blank.
    fn value(&self, row: &[String], synonyms: &[&str]) -> Option<String> {
        synonyms
            .iter()
            .find_map(|name| self.0.get(&fold_key(name)))
            .and_then(|index| row.get(*index))
            .map(|cell| cell.trim().to_string())
            .filter(|cell| !cell.is_empty())
    }
}

fn split_header(rows: Vec<Vec<String>>) -> (HeaderMap, Vec<Vec<String>>) {
    let mut rows = rows.into_iter();
    let header = rows.next().unwrap_or_default();
    (HeaderMap::new(&header), rows.collect())
}

fn split_roles(raw: &str) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for role in raw.split([';', ',']).map(str::trim).filter(|r| !r.is_empty()) {
        if !roles.iter().any(|r| fold_key(r) == fold_key(role)) {
            roles.push(role.to_string());
        }
    }
    roles
}

#[derive(Debug, Clone)]
struct OrganizationRecord {
    code: String,
    name: Option<String>,
    parent: Option<String>,
    level: Option<String>,
}

#[derive(Debug, Clone)]
struct EmployeeRecord {
    employee_no: String,
    name: Option<String>,
    email: Option<String>,
    org_id: Option<String>,
    title: Option<String>,
    roles: Vec<String>,
}

// --- Row rules ---

/// Creates or updates one organization. Returns true when it was created.
fn upsert_organization(t: &mut Tables, record: &OrganizationRecord, now: NaiveDateTime) -> Result<bool, ValidationError> {
    let org_name = record.name.clone().unwrap_or_else(|| record.code.clone());
    match t.organization(&record.code).cloned() {
        Some(existing) => {
            let input = OrganizationInput {
                org_id: existing.org_id.clone(),
                org_name,
                org_code: existing.org_code,
                parent_org_id: record.parent.clone(),
                portfolio_code: existing.portfolio_code,
                is_active: Some(existing.is_active),
            };
            update_organization(t, &existing.org_id, input, now)?;
            Ok(false)
        }
        None => {
            let input = OrganizationInput {
                org_id: record.code.clone(),
                org_name,
                parent_org_id: record.parent.clone(),
                ..Default::default()
            };
            insert_organization(t, input, now)?;
            Ok(true)
        }
    }
}

/// Links each role to the employee, adding it to the EMP_ROLE code set when new.
/// The first role listed becomes primary. Returns the number of new links.
fn link_roles(t: &mut Tables, employee_id: i64, roles: &[String], now: NaiveDateTime) -> Result<usize, ValidationError> {
    let mut linked = 0;
    let mut primary_id = None;
    for (index, role) in roles.iter().enumerate() {
        if !code_exists(t, code_set::EMP_ROLE, role) {
            let sort_order = t
                .code_sets
                .get(&fold_key(code_set::EMP_ROLE))
                .map_or(0, |set| set.items.len() as i32)
                + 1;
            insert_code(
                t,
                code_set::EMP_ROLE,
                CodeInput {
                    code: role.clone(),
                    code_name: role.clone(),
                    description: None,
                    sort_order,
                },
            )?;
        }

        let existing = roles_of(t, employee_id)
            .into_iter()
            .find(|r| fold_key(&r.role_name) == fold_key(role));
        let role_id = match existing {
            Some(existing) => existing.id,
            None => {
                let added = insert_role(
                    t,
                    employee_id,
                    RoleInput {
                        role_name: role.clone(),
                        role_code: None,
                        is_primary: index == 0,
                    },
                    now,
                )?;
                linked += 1;
                added.id
            }
        };
        if index == 0 {
            primary_id = Some(role_id);
        }
    }
    if let Some(primary_id) = primary_id {
        set_primary_role(t, employee_id, primary_id)?;
    }
    Ok(linked)
}

/// Creates or updates one employee and links their roles.
/// Returns whether the employee was created and how many roles were linked.
fn upsert_employee(
    t: &mut Tables,
    record: &EmployeeRecord,
    fallback_org: &str,
    now: NaiveDateTime,
) -> Result<(bool, usize), ValidationError> {
    let name = record
        .name
        .clone()
        .ok_or(ValidationError::Required { field: "name" })?;
    let org_id = match record.org_id.as_deref().and_then(|o| t.organization(o)) {
        Some(org) => org.org_id.clone(),
        None => {
            warn!(
                "Employee {} assigned to {} because organization {:?} was not found",
                record.employee_no, fallback_org, record.org_id
            );
            fallback_org.to_string()
        }
    };
    let number_key = fold_key(&record.employee_no);
    let existing = t
        .employees
        .values()
        .find(|e| fold_key(&e.employee_no) == number_key)
        .cloned();

    let input = EmployeeInput {
        employee_no: record.employee_no.clone(),
        name,
        email: record.email.clone(),
        title: record.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        org_id,
        manager_id: existing.as_ref().and_then(|e| e.manager_id),
        status: None,
    };
    let (employee, created) = match existing {
        Some(existing) => (update_employee(t, existing.id, input, now)?, false),
        None => (insert_employee(t, input, now)?, true),
    };
    let linked = link_roles(t, employee.id, &record.roles, now)?;
    Ok((created, linked))
}

// --- Service ---

#[derive(Clone)]
pub struct ImportService {
    store: Store,
    clock: Clock,
}

impl ImportService {
    pub fn new(store: Store, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Imports organizations first, then employees. Either file may be omitted.
    pub fn import(
        &self,
        organization_file: Option<&Path>,
        employee_file: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ImportResult, ImportError> {
        info!(
            "Starting import. Organization file: {:?}, employee file: {:?}",
            organization_file, employee_file
        );
        let mut result = ImportResult::default();
        if let Some(path) = organization_file {
            self.import_organizations(path, cancel, &mut result)?;
        }
        if let Some(path) = employee_file {
            self.import_employees(path, cancel, &mut result)?;
        }
        info!(
            "Import finished. Organizations read {}, created {}, updated {}, skipped {}. \
             Employees read {}, created {}, updated {}, skipped {}. Roles linked {}.",
            result.organizations_read,
            result.organizations_created,
            result.organizations_updated,
            result.organizations_skipped,
            result.employees_read,
            result.employees_created,
            result.employees_updated,
            result.employees_skipped,
            result.roles_linked
        );
        Ok(result)
    }

    /// Places organizations in repeated passes so children may precede their parents.
    pub fn import_organizations(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let (header, rows) = split_header(read_rows(path)?);
        let mut pending: Vec<OrganizationRecord> = rows
            .iter()
            .filter_map(|row| {
                Some(OrganizationRecord {
                    code: header.value(row, headers::ORG_CODE)?,
                    name: header.value(row, headers::ORG_NAME),
                    parent: header.value(row, headers::ORG_PARENT),
                    level: header.value(row, headers::ORG_LEVEL),
                })
            })
            .collect();
        result.organizations_read += pending.len();
        let mut rows_done = 0;

        while !pending.is_empty() {
            let mut waiting = Vec::new();
            let mut placed = 0;
            for record in pending {
                if cancel.is_cancelled() {
                    return Err(ImportError::Cancelled { rows_done });
                }
                let parent_ready = match record.parent.as_deref() {
                    None => true,
                    Some(parent) => self.store.read(|t| t.organization(parent).is_some())?,
                };
                if !parent_ready {
                    waiting.push(record);
                    continue;
                }

                let now = self.clock.now();
                let outcome = self
                    .store
                    .write(|t| -> ServiceResult<bool> { Ok(upsert_organization(t, &record, now)?) });
                rows_done += 1;
                placed += 1;
                match outcome {
                    Ok(true) => result.organizations_created += 1,
                    Ok(false) => result.organizations_updated += 1,
                    Err(ServiceError::Validation(e)) => {
                        warn!("Skipped organization {}: {}", record.code, e);
                        result.organizations_skipped += 1;
                    }
                    Err(ServiceError::Store(e)) => return Err(e.into()),
                }
                debug!("Organization row {} (level column {:?}) processed", record.code, record.level);
            }
            if placed == 0 {
                for leftover in &waiting {
                    warn!(
                        "Could not import organization {}: parent {:?} not found",
                        leftover.code, leftover.parent
                    );
                }
                result.organizations_skipped += waiting.len();
                break;
            }
            pending = waiting;
        }
        Ok(())
    }

    pub fn import_employees(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let (header, rows) = split_header(read_rows(path)?);
        let now = self.clock.now();
        let fallback_org = self
            .store
            .write(|t| -> Result<String, crate::error::StoreError> { Ok(ensure_unassigned(t, now)) })?;

        for (index, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled { rows_done: index });
            }
            let Some(employee_no) = header.value(row, headers::EMP_NO) else {
                continue;
            };
            result.employees_read += 1;
            let record = EmployeeRecord {
                employee_no,
                name: header.value(row, headers::EMP_NAME),
                email: header.value(row, headers::EMP_EMAIL),
                org_id: header.value(row, headers::EMP_ORG),
                title: header.value(row, headers::EMP_TITLE),
                roles: header
                    .value(row, headers::EMP_ROLES)
                    .map(|raw| split_roles(&raw))
                    .unwrap_or_default(),
            };

            let now = self.clock.now();
            let outcome = self.store.write(|t| -> ServiceResult<(bool, usize)> {
                Ok(upsert_employee(t, &record, &fallback_org, now)?)
            });
            match outcome {
                Ok((created, linked)) => {
                    if created {
                        result.employees_created += 1;
                    } else {
                        result.employees_updated += 1;
                    }
                    result.roles_linked += linked;
                    debug!("Employee {} imported ({} new roles)", record.employee_no, linked);
                }
                Err(ServiceError::Validation(e)) => {
                    warn!("Skipped employee {}: {}", record.employee_no, e);
                    result.employees_skipped += 1;
                }
                Err(ServiceError::Store(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod import_tests {
    use super::*;
    use crate::organization::UNASSIGNED_ORG_ID;
    use std::{fs, path::PathBuf};

    fn fixture(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("kpisys-import-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    fn setup_test_environment() -> ImportService {
        ImportService::new(Store::in_memory(), Clock::system())
    }

    #[test]
    fn organizations_are_placed_even_when_children_come_first() {
        let service = setup_test_environment();
        let path = fixture(
            "orgs.csv",
            "\u{feff}OrgCode,OrgName,ParentOrgCode\nRD-FE,前端組,RD\nRD,研發處,HQ\nHQ,總公司,\nLOST,孤兒,NOWHERE\n",
        );
        let mut result = ImportResult::default();
        service
            .import_organizations(&path, &CancellationToken::new(), &mut result)
            .unwrap();

        assert_eq!(result.organizations_read, 4);
        assert_eq!(result.organizations_created, 3);
        assert_eq!(result.organizations_skipped, 1);
        let level = service
            .store
            .read(|t| t.organization("RD-FE").map(|o| o.org_level))
            .unwrap();
        assert_eq!(level, Some(3));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn employees_fall_back_to_unassigned_and_get_roles() {
        let service = setup_test_environment();
        let orgs = fixture("orgs-zh.csv", "組織代碼,組織名稱\nHQ,總公司\n");
        let employees = fixture(
            "employees.csv",
            "員工編號,姓名,電子郵件,部門代碼,職稱,職掌\n\
             E-1,王小明,ming@example.com,HQ,經理,PM;SA\n\
             E-2,林美美,,XX,,PG\n\
             ,No Number,,HQ,,\n\
             E-3,,,HQ,,\n",
        );
        let result = service
            .import(Some(&orgs), Some(&employees), &CancellationToken::new())
            .unwrap();

        assert_eq!(result.employees_read, 3);
        assert_eq!(result.employees_created, 2);
        assert_eq!(result.employees_skipped, 1);
        assert_eq!(result.roles_linked, 3);

        service
            .store
            .read(|t| {
                let mei = t.employees.values().find(|e| e.employee_no == "E-2").unwrap();
                assert_eq!(mei.org_id, UNASSIGNED_ORG_ID);
                assert_eq!(mei.title, DEFAULT_TITLE);

                let ming = t.employees.values().find(|e| e.employee_no == "E-1").unwrap();
                let roles = roles_of(t, ming.id);
                assert_eq!(roles.len(), 2);
                assert_eq!(roles[0].role_name, "PM");
                assert!(roles[0].is_primary);
                assert!(code_exists(t, code_set::EMP_ROLE, "SA"));
            })
            .unwrap();
        let _ = fs::remove_file(orgs);
        let _ = fs::remove_file(employees);
    }

    #[test]
    fn reimport_updates_existing_employees() {
        let service = setup_test_environment();
        let first = fixture("reimport-a.csv", "EmpId,Name,Title,Roles\nE-9,Old Name,Dev,PG\n");
        let second = fixture("reimport-b.csv", "EmpId,Name,Title,Roles\ne-9,New Name,Lead,SA;PG\n");
        let cancel = CancellationToken::new();
        service.import(None, Some(&first), &cancel).unwrap();
        let result = service.import(None, Some(&second), &cancel).unwrap();

        assert_eq!(result.employees_created, 0);
        assert_eq!(result.employees_updated, 1);
        assert_eq!(result.roles_linked, 1);
        service
            .store
            .read(|t| {
                assert_eq!(t.employees.len(), 1);
                let e = t.employees.values().next().unwrap();
                assert_eq!(e.name, "New Name");
                let roles = roles_of(t, e.id);
                assert_eq!(roles[0].role_name, "SA");
                assert_eq!(roles.iter().filter(|r| r.is_primary).count(), 1);
            })
            .unwrap();
        let _ = fs::remove_file(first);
        let _ = fs::remove_file(second);
    }

    #[test]
    fn missing_and_unsupported_files_are_errors() {
        let service = setup_test_environment();
        let cancel = CancellationToken::new();
        let missing = std::env::temp_dir().join("kpisys-import-does-not-exist.xlsx");
        assert!(matches!(
            service.import(Some(&missing), None, &cancel),
            Err(ImportError::FileNotFound(_))
        ));

        let text = fixture("orgs.txt", "OrgCode\nHQ\n");
        assert!(matches!(
            service.import(Some(&text), None, &cancel),
            Err(ImportError::UnsupportedFormat { .. })
        ));
        let _ = fs::remove_file(text);
    }

    #[test]
    fn cancelled_import_stops_before_the_first_row() {
        let service = setup_test_environment();
        let path = fixture("cancel.csv", "EmpId,Name\nE-1,A\nE-2,B\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            service.import(None, Some(&path), &cancel),
            Err(ImportError::Cancelled { rows_done: 0 })
        ));
        assert_eq!(service.store.read(|t| t.employees.len()).unwrap(), 0);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn roles_split_on_semicolons_and_commas_without_duplicates() {
        assert_eq!(split_roles(" PM; SA ,pm,, PG "), vec!["PM", "SA", "PG"]);
    }
}

// src/store.rs
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

use crate::codes::CodeSet;
use crate::employee::{Employee, EmployeeId, EmployeeRole};
use crate::error::{io_context, StoreError};
use crate::kpi::{KpiMaster, KpiScore};
use crate::organization::{OrgId, Organization};
use crate::project::{Project, ProjectMember};
use crate::task::ProjectTask;
use crate::timesheet::{TimesheetAudit, TimesheetEntry};
use crate::users::User;

// --- Tables ---

/// Last id handed out per table. Employee ids start at 1001.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdCounters {
    pub employee: i64,
    pub employee_role: i64,
    pub project: i64,
    pub project_member: i64,
    pub task: i64,
    pub timesheet: i64,
    pub timesheet_audit: i64,
    pub user: i64,
    pub kpi_score: i64,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            employee: 1000,
            employee_role: 0,
            project: 0,
            project_member: 0,
            task: 0,
            timesheet: 0,
            timesheet_audit: 0,
            user: 0,
            kpi_score: 0,
        }
    }
}

pub(crate) fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub organizations: BTreeMap<OrgId, Organization>,
    pub employees: BTreeMap<EmployeeId, Employee>,
    pub employee_roles: BTreeMap<i64, EmployeeRole>,
    pub projects: BTreeMap<i64, Project>,
    pub project_members: BTreeMap<i64, ProjectMember>,
    pub tasks: BTreeMap<i64, ProjectTask>,
    pub timesheets: BTreeMap<i64, TimesheetEntry>,
    pub timesheet_audits: BTreeMap<i64, TimesheetAudit>,
    /// Keyed by `fold_key(set name)`.
    pub code_sets: BTreeMap<String, CodeSet>,
    pub users: BTreeMap<i64, User>,
    pub kpi_masters: BTreeMap<i64, KpiMaster>,
    pub kpi_scores: BTreeMap<i64, KpiScore>,
    pub counters: IdCounters,
}

impl Tables {
    /// Case-insensitive organization lookup.
    pub fn organization(&self, org_id: &str) -> Option<&Organization> {
        let org_id = org_id.trim();
        self.organizations.get(org_id).or_else(|| {
            self.organizations
                .values()
                .find(|o| o.org_id.eq_ignore_ascii_case(org_id))
        })
    }

    /// Case-insensitive project lookup by code.
    pub fn project_by_code(&self, code: &str) -> Option<&Project> {
        let key = fold_key(code);
        self.projects.values().find(|p| fold_key(&p.code) == key)
    }

    pub fn project_by_code_mut(&mut self, code: &str) -> Option<&mut Project> {
        let key = fold_key(code);
        self.projects.values_mut().find(|p| fold_key(&p.code) == key)
    }

    pub fn is_project_member(&self, project_code: &str, employee_id: EmployeeId) -> bool {
        let key = fold_key(project_code);
        self.project_members
            .values()
            .any(|m| m.employee_id == employee_id && fold_key(&m.project_code) == key)
    }
}

/// Normalised comparison key for case-insensitive codes.
pub fn fold_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Trims an optional text field, dropping it when blank.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

// --- Store ---

/// Shared handle over all tables. Every mutation runs as one transaction:
/// the closure works on a copy that only replaces the live tables once it
/// succeeds and the snapshot (when configured) has been written.
#[derive(Clone)]
pub struct Store {
    tables: Arc<Mutex<Tables>>,
    data_file: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::from_tables(Tables::default(), None)
    }

    pub fn from_tables(tables: Tables, data_file: Option<PathBuf>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(tables)),
            data_file,
        }
    }

    /// Opens a store persisted to `path`, loading the existing snapshot if there is one.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let tables = match load_snapshot(path)? {
            Some(tables) => {
                info!(
                    "Loaded snapshot from {:?}: {} organizations, {} employees, {} projects, {} timesheets",
                    path,
                    tables.organizations.len(),
                    tables.employees.len(),
                    tables.projects.len(),
                    tables.timesheets.len()
                );
                tables
            }
            None => {
                info!("No snapshot at {:?}; starting with empty tables", path);
                Tables::default()
            }
        };
        Ok(Self::from_tables(tables, Some(path.to_path_buf())))
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let guard = self.tables.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&guard))
    }

    pub fn write<T, E>(&self, f: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.tables.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut working = guard.clone();
        let value = f(&mut working)?;
        if let Some(path) = &self.data_file {
            save_snapshot(path, &working)?;
        }
        *guard = working;
        Ok(value)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.read(|t| {
            t.organizations.is_empty() && t.employees.is_empty() && t.code_sets.is_empty()
        })
    }
}

// --- Snapshot persistence ---

pub fn load_snapshot(path: &Path) -> Result<Option<Tables>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }

    let json_string = fs::read_to_string(path)
        .map_err(|e| io_context(e, format!("Failed to read snapshot file: {:?}", path)))?;
    let tables: Tables = serde_json::from_str(&json_string)?;
    Ok(Some(tables))
}

pub fn save_snapshot(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let json_string = serde_json::to_string_pretty(tables)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            io_context(
                e,
                format!("Failed to create directory for snapshot file: {:?}", parent),
            )
        })?;
    }

    // Temp file then rename; readers only ever see a complete snapshot.
    let tmp_path = path.with_extension("json.tmp");
    let mut file = File::create(&tmp_path)
        .map_err(|e| io_context(e, format!("Failed to create snapshot file: {:?}", tmp_path)))?;
    file.write_all(json_string.as_bytes())
        .map_err(|e| io_context(e, format!("Failed to write snapshot file: {:?}", tmp_path)))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| io_context(e, format!("Failed to replace snapshot file: {:?}", path)))?;

    debug!("Snapshot saved to {:?} ({} bytes)", path, json_string.len());
    Ok(())
}

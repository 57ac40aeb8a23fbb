// src/organization.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::employee::Employee;
use crate::error::{ServiceResult, ValidationError};
use crate::store::{clean, fold_key, is_blank, Store, Tables};

pub type OrgId = String;

/// Fallback unit for imported employees whose department is unknown.
pub const UNASSIGNED_ORG_ID: &str = "UNASSIGNED";
pub const UNASSIGNED_ORG_NAME: &str = "未分類部門";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: OrgId,
    pub org_name: String,
    pub org_code: Option<String>,
    pub parent_org_id: Option<OrgId>,
    pub org_level: u32,
    pub portfolio_code: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrganizationInput {
    pub org_id: String,
    pub org_name: String,
    pub org_code: Option<String>,
    pub parent_org_id: Option<String>,
    pub portfolio_code: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationNode {
    #[serde(flatten)]
    pub node: Organization,
    pub children: Vec<OrganizationNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationBrowserNode {
    #[serde(flatten)]
    pub node: Organization,
    pub employees: Vec<Employee>,
    pub children: Vec<OrganizationBrowserNode>,
}

// --- Tree helpers ---

/// True when making `new_parent` the parent of `org_id` would close a loop,
/// i.e. `org_id` is `new_parent` itself or one of its ancestors.
pub fn would_create_cycle(
    organizations: &BTreeMap<OrgId, Organization>,
    org_id: &str,
    new_parent: &str,
) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(new_parent.to_string());
    while let Some(id) = current {
        if id.eq_ignore_ascii_case(org_id) {
            return true;
        }
        if !visited.insert(id.clone()) {
            // Pre-existing loop that does not involve org_id.
            return true;
        }
        current = organizations.get(&id).and_then(|o| o.parent_org_id.clone());
    }
    false
}

fn level_under(t: &Tables, parent_org_id: Option<&str>) -> u32 {
    parent_org_id
        .and_then(|p| t.organization(p))
        .map_or(1, |parent| parent.org_level + 1)
}

fn children_of<'a>(
    organizations: &'a BTreeMap<OrgId, Organization>,
    parent_id: &'a str,
) -> impl Iterator<Item = &'a Organization> + 'a {
    organizations.values().filter(move |o| {
        o.parent_org_id
            .as_deref()
            .map_or(false, |p| p.eq_ignore_ascii_case(parent_id))
    })
}

/// Recomputes `org_level` below `root_id` after a reparent.
fn relevel_descendants(t: &mut Tables, root_id: &str) {
    let mut queue = VecDeque::from([root_id.to_string()]);
    while let Some(parent_id) = queue.pop_front() {
        let parent_level = match t.organizations.get(&parent_id) {
            Some(parent) => parent.org_level,
            None => continue,
        };
        let child_ids: Vec<OrgId> = children_of(&t.organizations, &parent_id)
            .map(|o| o.org_id.clone())
            .collect();
        for child_id in child_ids {
            if let Some(child) = t.organizations.get_mut(&child_id) {
                if child.org_level != parent_level + 1 {
                    debug!(
                        "Releveling {} from {} to {}",
                        child_id,
                        child.org_level,
                        parent_level + 1
                    );
                    child.org_level = parent_level + 1;
                }
            }
            queue.push_back(child_id);
        }
    }
}

fn resolve_parent(t: &Tables, parent_org_id: Option<String>) -> Result<Option<OrgId>, ValidationError> {
    match clean(parent_org_id) {
        None => Ok(None),
        Some(parent) => t
            .organization(&parent)
            .map(|p| Some(p.org_id.clone()))
            .ok_or_else(|| ValidationError::not_found("Parent organization", parent)),
    }
}

fn ensure_unique_code(t: &Tables, org_code: Option<&str>, except: Option<&str>) -> Result<(), ValidationError> {
    let Some(code) = org_code else {
        return Ok(());
    };
    let key = fold_key(code);
    let taken = t.organizations.values().any(|o| {
        o.org_code.as_deref().map(fold_key).as_deref() == Some(key.as_str())
            && except.map_or(true, |id| !o.org_id.eq_ignore_ascii_case(id))
    });
    if taken {
        return Err(ValidationError::duplicate("Organization code", code));
    }
    Ok(())
}

// --- Table rules ---

pub(crate) fn insert_organization(
    t: &mut Tables,
    input: OrganizationInput,
    now: NaiveDateTime,
) -> Result<Organization, ValidationError> {
    if is_blank(&input.org_id) {
        return Err(ValidationError::Required { field: "orgId" });
    }
    if is_blank(&input.org_name) {
        return Err(ValidationError::Required { field: "orgName" });
    }
    let org_id = input.org_id.trim().to_string();
    if t.organization(&org_id).is_some() {
        return Err(ValidationError::duplicate("Organization", org_id));
    }
    let parent_org_id = resolve_parent(t, input.parent_org_id)?;
    let org_code = clean(input.org_code);
    ensure_unique_code(t, org_code.as_deref(), None)?;

    let organization = Organization {
        org_level: level_under(t, parent_org_id.as_deref()),
        org_id: org_id.clone(),
        org_name: input.org_name.trim().to_string(),
        org_code,
        parent_org_id,
        portfolio_code: clean(input.portfolio_code),
        is_active: input.is_active.unwrap_or(true),
        created_at: now,
        updated_at: None,
    };
    t.organizations.insert(org_id, organization.clone());
    Ok(organization)
}

pub(crate) fn update_organization(
    t: &mut Tables,
    org_id: &str,
    input: OrganizationInput,
    now: NaiveDateTime,
) -> Result<Organization, ValidationError> {
    let existing = t
        .organization(org_id)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Organization", org_id))?;
    if is_blank(&input.org_name) {
        return Err(ValidationError::Required { field: "orgName" });
    }
    let parent_org_id = resolve_parent(t, input.parent_org_id)?;
    if let Some(parent) = parent_org_id.as_deref() {
        if would_create_cycle(&t.organizations, &existing.org_id, parent) {
            return Err(ValidationError::ParentCycle {
                org_id: existing.org_id.clone(),
                parent_id: parent.to_string(),
            });
        }
    }
    let org_code = clean(input.org_code);
    ensure_unique_code(t, org_code.as_deref(), Some(&existing.org_id))?;

    let updated = Organization {
        org_level: level_under(t, parent_org_id.as_deref()),
        org_name: input.org_name.trim().to_string(),
        org_code,
        parent_org_id,
        portfolio_code: clean(input.portfolio_code),
        is_active: input.is_active.unwrap_or(existing.is_active),
        updated_at: Some(now),
        ..existing
    };
    let level_changed = t
        .organizations
        .get(&updated.org_id)
        .map_or(false, |o| o.org_level != updated.org_level);
    t.organizations.insert(updated.org_id.clone(), updated.clone());
    if level_changed {
        relevel_descendants(t, &updated.org_id);
    }
    Ok(updated)
}

pub(crate) fn delete_organization(t: &mut Tables, org_id: &str) -> Result<Organization, ValidationError> {
    let existing = t
        .organization(org_id)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("Organization", org_id))?;
    if children_of(&t.organizations, &existing.org_id).next().is_some() {
        return Err(ValidationError::HasChildren {
            org_id: existing.org_id,
        });
    }
    if t
        .employees
        .values()
        .any(|e| e.org_id.eq_ignore_ascii_case(&existing.org_id))
    {
        return Err(ValidationError::InUse {
            entity: "Organization",
            key: existing.org_id,
            referenced_by: "employees",
        });
    }
    t.organizations.remove(&existing.org_id);
    Ok(existing)
}

/// Ensures the import fallback unit exists and returns its id.
pub(crate) fn ensure_unassigned(t: &mut Tables, now: NaiveDateTime) -> OrgId {
    if let Some(org) = t.organization(UNASSIGNED_ORG_ID) {
        return org.org_id.clone();
    }
    t.organizations.insert(
        UNASSIGNED_ORG_ID.to_string(),
        Organization {
            org_id: UNASSIGNED_ORG_ID.to_string(),
            org_name: UNASSIGNED_ORG_NAME.to_string(),
            org_code: Some(UNASSIGNED_ORG_ID.to_string()),
            parent_org_id: None,
            org_level: 1,
            portfolio_code: None,
            is_active: true,
            created_at: now,
            updated_at: None,
        },
    );
    UNASSIGNED_ORG_ID.to_string()
}

pub fn build_tree(organizations: &BTreeMap<OrgId, Organization>) -> Vec<OrganizationNode> {
    fn node(organizations: &BTreeMap<OrgId, Organization>, org: &Organization) -> OrganizationNode {
        OrganizationNode {
            node: org.clone(),
            children: children_of(organizations, &org.org_id)
                .map(|child| node(organizations, child))
                .collect(),
        }
    }

    organizations
        .values()
        .filter(|o| is_root(organizations, o))
        .map(|root| node(organizations, root))
        .collect()
}

// Orphans (parent id pointing nowhere) are shown as roots rather than hidden.
fn is_root(organizations: &BTreeMap<OrgId, Organization>, org: &Organization) -> bool {
    match org.parent_org_id.as_deref() {
        None => true,
        Some(parent) => !organizations.contains_key(parent),
    }
}

pub fn build_browser_tree(t: &Tables) -> Vec<OrganizationBrowserNode> {
    fn node(t: &Tables, org: &Organization) -> OrganizationBrowserNode {
        let mut employees: Vec<Employee> = t
            .employees
            .values()
            .filter(|e| e.org_id.eq_ignore_ascii_case(&org.org_id))
            .cloned()
            .collect();
        employees.sort_by(|a, b| a.employee_no.cmp(&b.employee_no));
        OrganizationBrowserNode {
            node: org.clone(),
            employees,
            children: children_of(&t.organizations, &org.org_id)
                .map(|child| node(t, child))
                .collect(),
        }
    }

    t.organizations
        .values()
        .filter(|o| is_root(&t.organizations, o))
        .map(|root| node(t, root))
        .collect()
}

// --- Service ---

#[derive(Clone)]
pub struct OrganizationService {
    store: Store,
    clock: Clock,
}

impl OrganizationService {
    pub fn new(store: Store, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// All units ordered by level, then id.
    pub fn list(&self) -> ServiceResult<Vec<Organization>> {
        let mut all = self
            .store
            .read(|t| t.organizations.values().cloned().collect::<Vec<_>>())?;
        all.sort_by(|a, b| a.org_level.cmp(&b.org_level).then_with(|| a.org_id.cmp(&b.org_id)));
        Ok(all)
    }

    pub fn get(&self, org_id: &str) -> ServiceResult<Option<Organization>> {
        Ok(self.store.read(|t| t.organization(org_id).cloned())?)
    }

    pub fn tree(&self) -> ServiceResult<Vec<OrganizationNode>> {
        Ok(self.store.read(|t| build_tree(&t.organizations))?)
    }

    pub fn browser_tree(&self) -> ServiceResult<Vec<OrganizationBrowserNode>> {
        Ok(self.store.read(build_browser_tree)?)
    }

    pub fn add(&self, input: OrganizationInput) -> ServiceResult<Organization> {
        let now = self.clock.now();
        let result = self
            .store
            .write(|t| -> ServiceResult<Organization> { Ok(insert_organization(t, input, now)?) });
        match &result {
            Ok(org) => info!(
                "Added organization {} ({}) at level {}",
                org.org_id, org.org_name, org.org_level
            ),
            Err(e) => warn!("Rejected new organization: {}", e),
        }
        result
    }

    pub fn update(&self, org_id: &str, input: OrganizationInput) -> ServiceResult<Organization> {
        let now = self.clock.now();
        let result = self.store.write(|t| -> ServiceResult<Organization> {
            Ok(update_organization(t, org_id, input, now)?)
        });
        match &result {
            Ok(org) => info!(
                "Updated organization {} (parent {:?}, level {})",
                org.org_id, org.parent_org_id, org.org_level
            ),
            Err(e) => warn!("Rejected update of organization {}: {}", org_id, e),
        }
        result
    }

    pub fn delete(&self, org_id: &str) -> ServiceResult<()> {
        let removed = self
            .store
            .write(|t| -> ServiceResult<Organization> { Ok(delete_organization(t, org_id)?) });
        match removed {
            Ok(org) => {
                info!("Deleted organization {}", org.org_id);
                Ok(())
            }
            Err(e) => {
                warn!("Rejected delete of organization {}: {}", org_id, e);
                Err(e)
            }
        }
    }
}

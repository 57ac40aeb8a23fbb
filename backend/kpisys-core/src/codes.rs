// src/codes.rs
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ServiceResult, ValidationError};
use crate::store::{clean, fold_key, is_blank, Store, Tables};

// --- Code set names ---
pub mod code_set {
    pub const PROJECT_SIZE: &str = "PROJECT_SIZE";
    pub const PROJECT_CRITICALITY: &str = "PROJECT_CRITICALITY";
    pub const PROJECT_STATUS: &str = "PROJECT_STATUS";
    pub const PROJECT_TYPE: &str = "PROJECT_TYPE";
    pub const PORTFOLIO: &str = "PORTFOLIO";
    pub const TASK_GROUP: &str = "TASK_GROUP";
    pub const DEPEND_TYPE: &str = "DEPEND_TYPE";
    pub const EMP_ROLE: &str = "EMP_ROLE";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeItem {
    pub code_set: String,
    pub code: String,
    pub code_name: String,
    pub description: Option<String>,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSet {
    pub name: String,
    pub items: Vec<CodeItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodeInput {
    pub code: String,
    pub code_name: String,
    pub description: Option<String>,
    pub sort_order: i32,
}

// --- Table rules ---

pub(crate) fn code_exists(t: &Tables, set_name: &str, code: &str) -> bool {
    let code_key = fold_key(code);
    t.code_sets
        .get(&fold_key(set_name))
        .map_or(false, |set| {
            set.items.iter().any(|item| fold_key(&item.code) == code_key)
        })
}

/// Fails with `UnknownCode` unless `code` is defined in `set_name`.
pub(crate) fn require_code(t: &Tables, set_name: &str, code: &str) -> Result<(), ValidationError> {
    if code_exists(t, set_name, code) {
        Ok(())
    } else {
        Err(ValidationError::UnknownCode {
            code_set: set_name.to_string(),
            code: code.to_string(),
        })
    }
}

pub(crate) fn insert_code(
    t: &mut Tables,
    set_name: &str,
    input: CodeInput,
) -> Result<CodeItem, ValidationError> {
    if is_blank(set_name) {
        return Err(ValidationError::Required { field: "codeSet" });
    }
    if is_blank(&input.code) {
        return Err(ValidationError::Required { field: "code" });
    }
    if is_blank(&input.code_name) {
        return Err(ValidationError::Required { field: "codeName" });
    }
    if code_exists(t, set_name, &input.code) {
        return Err(ValidationError::duplicate(
            "Code",
            format!("{}/{}", set_name.trim(), input.code.trim()),
        ));
    }

    let set = t
        .code_sets
        .entry(fold_key(set_name))
        .or_insert_with(|| CodeSet {
            name: set_name.trim().to_string(),
            items: Vec::new(),
        });
    let item = CodeItem {
        code_set: set.name.clone(),
        code: input.code.trim().to_string(),
        code_name: input.code_name.trim().to_string(),
        description: clean(input.description),
        sort_order: input.sort_order,
    };
    set.items.push(item.clone());
    Ok(item)
}

fn sorted_items(set: &CodeSet) -> Vec<CodeItem> {
    let mut items = set.items.clone();
    items.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.code.cmp(&b.code)));
    items
}

// --- Service ---

#[derive(Clone)]
pub struct CodeService {
    store: Store,
}

impl CodeService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn code_sets(&self) -> ServiceResult<Vec<String>> {
        let mut names = self
            .store
            .read(|t| t.code_sets.values().map(|s| s.name.clone()).collect::<Vec<_>>())?;
        names.sort();
        Ok(names)
    }

    /// Items of a set ordered by sort order then code. Unknown sets yield an empty list.
    pub fn codes(&self, set_name: &str) -> ServiceResult<Vec<CodeItem>> {
        Ok(self.store.read(|t| {
            t.code_sets
                .get(&fold_key(set_name))
                .map(sorted_items)
                .unwrap_or_default()
        })?)
    }

    pub fn add_code(&self, set_name: &str, input: CodeInput) -> ServiceResult<CodeItem> {
        let result = self
            .store
            .write(|t| -> ServiceResult<CodeItem> { Ok(insert_code(t, set_name, input)?) });
        match &result {
            Ok(item) => info!("Added code {}/{}", item.code_set, item.code),
            Err(e) => warn!("Rejected new code in set {}: {}", set_name, e),
        }
        result
    }

    pub fn update_code(&self, set_name: &str, code: &str, input: CodeInput) -> ServiceResult<CodeItem> {
        let updated = self.store.write(|t| -> ServiceResult<CodeItem> {
            if is_blank(&input.code_name) {
                return Err(ValidationError::Required { field: "codeName" }.into());
            }
            let code_key = fold_key(code);
            let item = t
                .code_sets
                .get_mut(&fold_key(set_name))
                .and_then(|set| set.items.iter_mut().find(|i| fold_key(&i.code) == code_key))
                .ok_or_else(|| ValidationError::not_found("Code", format!("{}/{}", set_name, code)))?;
            item.code_name = input.code_name.trim().to_string();
            item.description = clean(input.description);
            item.sort_order = input.sort_order;
            Ok(item.clone())
        })?;
        info!("Updated code {}/{}", updated.code_set, updated.code);
        Ok(updated)
    }

    /// Returns false when the code does not exist.
    pub fn delete_code(&self, set_name: &str, code: &str) -> ServiceResult<bool> {
        let removed = self.store.write(|t| -> ServiceResult<bool> {
            let code_key = fold_key(code);
            let Some(set) = t.code_sets.get_mut(&fold_key(set_name)) else {
                return Ok(false);
            };
            let before = set.items.len();
            set.items.retain(|i| fold_key(&i.code) != code_key);
            Ok(set.items.len() != before)
        })?;
        if removed {
            info!("Deleted code {}/{}", set_name, code);
        }
        Ok(removed)
    }
}

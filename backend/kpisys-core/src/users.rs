// src/users.rs
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::employee::EmployeeId;
use crate::error::{ServiceResult, ValidationError};
use crate::session::Role;
use crate::store::{fold_key, is_blank, next_id, Store, Tables};

const SALT_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub employee_id: Option<EmployeeId>,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub salt: String,
}

/// What the user pages and JSON endpoints expose. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub employee_id: Option<EmployeeId>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            employee_id: user.employee_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInput {
    pub email: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub employee_id: Option<EmployeeId>,
    #[serde(default)]
    pub password: Option<String>,
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

fn validate(t: &Tables, input: &UserInput, existing_id: Option<i64>) -> Result<(), ValidationError> {
    if is_blank(&input.email) {
        return Err(ValidationError::Required { field: "email" });
    }
    if is_blank(&input.display_name) {
        return Err(ValidationError::Required { field: "displayName" });
    }
    let email_key = fold_key(&input.email);
    if t
        .users
        .values()
        .any(|u| Some(u.id) != existing_id && fold_key(&u.email) == email_key)
    {
        return Err(ValidationError::duplicate("User", input.email.trim()));
    }
    if let Some(employee_id) = input.employee_id {
        if !t.employees.contains_key(&employee_id) {
            return Err(ValidationError::not_found("Employee", employee_id));
        }
    }
    Ok(())
}

// --- Table rules ---

pub(crate) fn insert_user(t: &mut Tables, input: UserInput) -> Result<User, ValidationError> {
    validate(t, &input, None)?;
    let password = input
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(ValidationError::Required { field: "password" })?;
    let salt = new_salt();
    let user = User {
        id: next_id(&mut t.counters.user),
        email: input.email.trim().to_string(),
        display_name: input.display_name.trim().to_string(),
        role: input.role,
        employee_id: input.employee_id,
        password_hash: hash_password(password, &salt),
        salt,
    };
    t.users.insert(user.id, user.clone());
    Ok(user)
}

/// Updates a user. A blank password keeps the current hash.
pub(crate) fn update_user(t: &mut Tables, user_id: i64, input: UserInput) -> Result<User, ValidationError> {
    let existing = t
        .users
        .get(&user_id)
        .cloned()
        .ok_or_else(|| ValidationError::not_found("User", user_id))?;
    validate(t, &input, Some(user_id))?;
    let (password_hash, salt) = match input.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            let salt = new_salt();
            (hash_password(password, &salt), salt)
        }
        None => (existing.password_hash, existing.salt),
    };
    let updated = User {
        id: user_id,
        email: input.email.trim().to_string(),
        display_name: input.display_name.trim().to_string(),
        role: input.role,
        employee_id: input.employee_id,
        password_hash,
        salt,
    };
    t.users.insert(user_id, updated.clone());
    Ok(updated)
}

pub(crate) fn find_login(t: &Tables, email: &str, password: &str) -> Option<User> {
    let email_key = fold_key(email);
    t.users
        .values()
        .find(|u| fold_key(&u.email) == email_key)
        .filter(|u| hash_password(password, &u.salt) == u.password_hash)
        .cloned()
}

// --- Service ---

#[derive(Clone)]
pub struct UserService {
    store: Store,
}

impl UserService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn list(&self) -> ServiceResult<Vec<UserView>> {
        let mut users = self
            .store
            .read(|t| t.users.values().map(UserView::from).collect::<Vec<_>>())?;
        users.sort_by(|a, b| fold_key(&a.email).cmp(&fold_key(&b.email)));
        Ok(users)
    }

    pub fn get(&self, user_id: i64) -> ServiceResult<Option<UserView>> {
        Ok(self.store.read(|t| t.users.get(&user_id).map(UserView::from))?)
    }

    pub fn add(&self, input: UserInput) -> ServiceResult<UserView> {
        let result = self
            .store
            .write(|t| -> ServiceResult<User> { Ok(insert_user(t, input)?) });
        match &result {
            Ok(u) => info!("Added user {} ({})", u.email, u.role),
            Err(e) => warn!("Rejected new user: {}", e),
        }
        result.map(|u| UserView::from(&u))
    }

    pub fn update(&self, user_id: i64, input: UserInput) -> ServiceResult<UserView> {
        let result = self
            .store
            .write(|t| -> ServiceResult<User> { Ok(update_user(t, user_id, input)?) });
        match &result {
            Ok(u) => info!("Updated user {} ({})", u.email, u.role),
            Err(e) => warn!("Rejected update of user {}: {}", user_id, e),
        }
        result.map(|u| UserView::from(&u))
    }

    pub fn delete(&self, user_id: i64) -> ServiceResult<()> {
        let removed = self.store.write(|t| -> ServiceResult<User> {
            Ok(t
                .users
                .remove(&user_id)
                .ok_or_else(|| ValidationError::not_found("User", user_id))?)
        })?;
        info!("Deleted user {}", removed.email);
        Ok(())
    }

    pub fn authenticate(&self, email: &str, password: &str) -> ServiceResult<User> {
        match self.store.read(|t| find_login(t, email, password))? {
            Some(user) => {
                info!("User {} authenticated", user.email);
                Ok(user)
            }
            None => {
                warn!("Failed login attempt for {}", email.trim());
                Err(ValidationError::InvalidCredentials.into())
            }
        }
    }
}

#[cfg(test)]
mod user_service_tests {
    use super::*;
    use crate::error::ServiceError;

    fn input(email: &str, password: Option<&str>) -> UserInput {
        UserInput {
            email: email.to_string(),
            display_name: "Someone".to_string(),
            role: Role::Employee,
            employee_id: None,
            password: password.map(String::from),
        }
    }

    fn setup_test_environment() -> UserService {
        let service = UserService::new(Store::in_memory());
        service.add(input("staff@example.com", Some("staff123"))).unwrap();
        service
    }

    #[test]
    fn authenticate_matches_email_case_insensitively() {
        let service = setup_test_environment();
        let user = service.authenticate("STAFF@example.com", "staff123").unwrap();
        assert_eq!(user.email, "staff@example.com");
        assert!(matches!(
            service.authenticate("staff@example.com", "wrong").unwrap_err(),
            ServiceError::Validation(ValidationError::InvalidCredentials)
        ));
    }

    #[test]
    fn passwords_are_salted_not_stored_plain() {
        let service = setup_test_environment();
        let stored = service
            .store
            .read(|t| t.users.values().next().cloned())
            .unwrap()
            .unwrap();
        assert_ne!(stored.password_hash, "staff123");
        assert_eq!(stored.password_hash.len(), 64);
        assert_eq!(stored.password_hash, hash_password("staff123", &stored.salt));
    }

    #[test]
    fn duplicate_email_and_missing_password_are_rejected() {
        let service = setup_test_environment();
        assert!(matches!(
            service.add(input("Staff@Example.com", Some("x"))).unwrap_err(),
            ServiceError::Validation(ValidationError::Duplicate { .. })
        ));
        assert!(matches!(
            service.add(input("new@example.com", None)).unwrap_err(),
            ServiceError::Validation(ValidationError::Required { field: "password" })
        ));
    }

    #[test]
    fn blank_password_on_update_keeps_the_old_one() {
        let service = setup_test_environment();
        let id = service.list().unwrap()[0].id;
        let mut change = input("staff@example.com", Some(""));
        change.role = Role::Pm;
        let updated = service.update(id, change).unwrap();
        assert_eq!(updated.role, Role::Pm);
        assert!(service.authenticate("staff@example.com", "staff123").is_ok());

        service.update(id, input("staff@example.com", Some("changed!"))).unwrap();
        assert!(service.authenticate("staff@example.com", "staff123").is_err());
        assert!(service.authenticate("staff@example.com", "changed!").is_ok());
    }

    #[test]
    fn linked_employee_must_exist() {
        let service = setup_test_environment();
        let mut linked = input("linked@example.com", Some("pw"));
        linked.employee_id = Some(4242);
        assert!(matches!(
            service.add(linked).unwrap_err(),
            ServiceError::Validation(ValidationError::NotFound { .. })
        ));
    }
}

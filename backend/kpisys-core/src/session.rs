// src/session.rs
use chrono::{Duration, NaiveDateTime};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::employee::EmployeeId;
use crate::users::User;

pub const SESSION_COOKIE: &str = "session_token";
const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Manager,
    #[serde(rename = "PM")]
    Pm,
    Employee,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::Pm, Role::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Manager => "Manager",
            Role::Pm => "PM",
            Role::Employee => "Employee",
        }
    }

    /// Path segment of the role's landing dashboard.
    pub fn dashboard(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Pm => "pm",
            Role::Employee => "employee",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub employee_id: Option<EmployeeId>,
    pub expires_at: NaiveDateTime,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login required")]
    Unauthenticated,

    #[error("Role {role} may not access this page (requires one of: {required})")]
    Forbidden { role: Role, required: String },
}

/// Gate for a role set. An empty `required` set admits any logged-in user.
pub fn authorize(session: Option<&Session>, required: &[Role]) -> Result<(), AuthError> {
    let session = session.ok_or(AuthError::Unauthenticated)?;
    if required.is_empty() || required.contains(&session.role) {
        return Ok(());
    }
    Err(AuthError::Forbidden {
        role: session.role,
        required: required
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Extracts the session token from a raw `Cookie` header value.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{}={}; HttpOnly; SameSite=Lax; Path=/", SESSION_COOKIE, token)
}

pub fn expired_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}

// --- Session store ---

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    clock: Clock,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Clock, ttl_minutes: i64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
            ttl: Duration::minutes(ttl_minutes.max(1)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Opens a session for `user` and prunes every expired one.
    pub fn create(&self, user: &User) -> Session {
        let now = self.clock.now();
        let token: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let session = Session {
            token: token.clone(),
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            employee_id: user.employee_id,
            expires_at: now + self.ttl,
        };
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        if sessions.len() < before {
            debug!("Pruned {} expired sessions", before - sessions.len());
        }
        sessions.insert(token, session.clone());
        info!("Session opened for {} ({})", session.email, session.role);
        session
    }

    /// Live session for `token`. Expired sessions are dropped on lookup.
    pub fn get(&self, token: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        match sessions.get(token) {
            Some(session) if session.expires_at > now => Some(session.clone()),
            Some(_) => {
                if let Some(expired) = sessions.remove(token) {
                    debug!("Session for {} expired at {}", expired.email, expired.expires_at);
                }
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, token: &str) -> bool {
        match self.lock().remove(token) {
            Some(session) => {
                info!("Session closed for {}", session.email);
                true
            }
            None => false,
        }
    }

    /// Drops every session of a user, e.g. after the account is deleted.
    pub fn remove_user(&self, user_id: i64) {
        self.lock().retain(|_, s| s.user_id != user_id);
    }
}

// src/web/auth.rs
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{views, AppError, AppState};
use crate::error::{ServiceError, ValidationError};
use crate::session::{
    authorize, expired_session_cookie, session_cookie, token_from_cookie_header, Role, Session,
};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(token_from_cookie_header)
}

// --- Middleware ---

/// Resolves the session cookie and stores the live `Session` in the request extensions.
pub async fn load_session(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let session = session_token(request.headers()).and_then(|token| state.sessions.get(token));
    if let Some(session) = session {
        debug!("Request by {} ({})", session.email, session.role);
        request.extensions_mut().insert(session);
    }
    next.run(request).await
}

fn guard(request: &Request, required: &[Role]) -> Result<(), AppError> {
    authorize(request.extensions().get::<Session>(), required)?;
    Ok(())
}

pub async fn require_session(request: Request, next: Next) -> Result<Response, AppError> {
    guard(&request, &[])?;
    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    guard(&request, &[Role::Admin])?;
    Ok(next.run(request).await)
}

pub async fn require_reviewer(request: Request, next: Next) -> Result<Response, AppError> {
    guard(&request, &[Role::Manager, Role::Pm, Role::Admin])?;
    Ok(next.run(request).await)
}

// --- Handlers ---

pub async fn login_page() -> Html<String> {
    views::login_page(None)
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<Response, AppError> {
    match state.users.authenticate(&form.email, &form.password) {
        Ok(user) => {
            let session = state.sessions.create(&user);
            info!("User {} logged in as {}", user.email, user.role);
            Ok((
                [(header::SET_COOKIE, session_cookie(&session.token))],
                Redirect::to("/"),
            )
                .into_response())
        }
        Err(ServiceError::Validation(ValidationError::InvalidCredentials)) => {
            warn!("Failed login for {}", form.email.trim());
            Ok((
                StatusCode::UNAUTHORIZED,
                views::login_page(Some("Invalid email or password")),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.remove(token);
    }
    (
        [(header::SET_COOKIE, expired_session_cookie())],
        Redirect::to("/auth/login"),
    )
        .into_response()
}

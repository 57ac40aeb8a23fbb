// src/web/pages.rs
use axum::{
    extract::{Path, State},
    response::{Html, Redirect},
    Extension,
};
use tracing::info;

use super::{views, AppResult, AppState};
use crate::error::ValidationError;
use crate::organization::OrganizationBrowserNode;
use crate::session::{authorize, Role, Session};
use crate::timesheet::{week_start, ReviewFilter, Reviewer};

/// Sends the user to the dashboard of their role.
pub async fn home(Extension(session): Extension<Session>) -> Redirect {
    Redirect::to(&format!("/dashboard/{}", session.role.dashboard()))
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(name): Path<String>,
) -> AppResult<Html<String>> {
    let role = Role::ALL
        .into_iter()
        .find(|r| r.dashboard() == name)
        .ok_or_else(|| ValidationError::not_found("Dashboard", &name))?;
    authorize(Some(&session), &[role, Role::Admin])?;

    let body = match role {
        Role::Admin => admin_dashboard(&state)?,
        Role::Manager | Role::Pm => reviewer_dashboard(&state, &session)?,
        Role::Employee => employee_dashboard(&state, &session)?,
    };
    Ok(views::page(&format!("{} Dashboard", role), Some(&session), &body))
}

fn admin_dashboard(state: &AppState) -> AppResult<String> {
    let counts = state.store.read(|t| {
        vec![
            vec!["Organizations".to_string(), t.organizations.len().to_string()],
            vec!["Employees".to_string(), t.employees.len().to_string()],
            vec!["Projects".to_string(), t.projects.len().to_string()],
            vec!["Timesheet entries".to_string(), t.timesheets.len().to_string()],
            vec!["Users".to_string(), t.users.len().to_string()],
            vec!["KPI scores".to_string(), t.kpi_scores.len().to_string()],
        ]
    })?;
    let mut body = views::table(&["Table", "Rows"], &counts);
    body.push_str(
        "<p><a href='/kpi-admin'>KPI administration</a> | \
         <a href='/dashboard/manager'>Manager view</a> | \
         <a href='/dashboard/pm'>PM view</a> | \
         <a href='/dashboard/employee'>Employee view</a></p>",
    );
    Ok(body)
}

fn reviewer_dashboard(state: &AppState, session: &Session) -> AppResult<String> {
    let reviewer = Reviewer {
        employee_id: session.employee_id,
        role: session.role,
    };
    let queue = state.timesheets.review_queue(&reviewer, &ReviewFilter::default())?;
    let rows: Vec<Vec<String>> = queue
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.employee_id.to_string(),
                e.project_code.clone(),
                e.work_date.to_string(),
                e.total_hours().to_string(),
                views::or_dash(e.notes.as_deref()),
            ]
        })
        .collect();
    let mut body = format!("<h2>Pending approvals ({})</h2>", queue.len());
    body.push_str(&views::table(
        &["Entry", "Employee", "Project", "Date", "Hours", "Notes"],
        &rows,
    ));
    Ok(body)
}

fn employee_dashboard(state: &AppState, session: &Session) -> AppResult<String> {
    let Some(employee_id) = session.employee_id else {
        return Ok("<p>This account is not linked to an employee.</p>".to_string());
    };
    let today = state.clock.today();
    let entries = state.timesheets.week(employee_id, today)?;
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.work_date.to_string(),
                e.project_code.clone(),
                views::or_dash(e.task_id),
                e.hours.to_string(),
                e.overtime_hours.to_string(),
                e.status.to_string(),
            ]
        })
        .collect();
    let mut body = format!("<h2>Week of {}</h2>", week_start(today));
    body.push_str(&views::table(
        &["Date", "Project", "Task", "Hours", "Overtime", "Status"],
        &rows,
    ));
    Ok(body)
}

fn render_browser_node(node: &OrganizationBrowserNode, html: &mut String) {
    html.push_str(&format!(
        "<li><strong>{}</strong> {}",
        views::escape(&node.node.org_id),
        views::escape(&node.node.org_name)
    ));
    if !node.employees.is_empty() {
        html.push_str("<ul>");
        for employee in &node.employees {
            html.push_str(&format!(
                "<li>{} {} ({})</li>",
                views::escape(&employee.employee_no),
                views::escape(&employee.name),
                views::escape(&employee.title)
            ));
        }
        html.push_str("</ul>");
    }
    if !node.children.is_empty() {
        html.push_str("<ul>");
        for child in &node.children {
            render_browser_node(child, html);
        }
        html.push_str("</ul>");
    }
    html.push_str("</li>");
}

pub async fn organization_browser(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> AppResult<Html<String>> {
    let tree = state.organizations.browser_tree()?;
    let mut body = String::from("<ul>");
    for root in &tree {
        render_browser_node(root, &mut body);
    }
    body.push_str("</ul>");
    Ok(views::page("Organizations", Some(&session), &body))
}

pub async fn status(State(state): State<AppState>) -> AppResult<Html<String>> {
    info!("Handling /status request");
    let (employees, projects, timesheets) = state
        .store
        .read(|t| (t.employees.len(), t.projects.len(), t.timesheets.len()))?;
    let persistence = match state.store.data_file() {
        Some(path) => format!("snapshot at {}", path.display()),
        None => "in memory".to_string(),
    };
    let body = format!(
        "<p>Current Time (Server): {}</p><p>Storage: {}</p>\
         <p>{} employees, {} projects, {} timesheet entries</p>",
        state.clock.now(),
        views::escape(&persistence),
        employees,
        projects,
        timesheets
    );
    Ok(views::page("Server Status", None, &body))
}

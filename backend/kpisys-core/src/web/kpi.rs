// src/web/kpi.rs
use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
    Extension, Form, Json,
};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use tracing::info;

use super::{views, AppResult, AppState};
use crate::kpi::{KpiMaster, KpiScore};
use crate::session::Session;

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecalcForm {
    pub year: i32,
    pub month: u32,
}

/// The month before `today`.
pub fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}

fn resolve_period(state: &AppState, query: &PeriodQuery) -> (i32, u32) {
    let (default_year, default_month) = previous_month(state.clock.today());
    (query.year.unwrap_or(default_year), query.month.unwrap_or(default_month))
}

pub async fn kpi_admin_page(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<PeriodQuery>,
) -> AppResult<Html<String>> {
    let (year, month) = resolve_period(&state, &query);
    let masters = state.kpi.data().masters().await?;
    let scores = state.kpi.data().scores_by_month(year, month).await?;

    let mut body = format!(
        "<form method='post' action='/kpi-admin/recalculate'>\
         <label>Year <input name='year' value='{}'></label> \
         <label>Month <input name='month' value='{}'></label> \
         <button>Recalculate</button></form>",
        year, month
    );

    body.push_str("<h2>KPI definitions</h2>");
    let master_rows: Vec<Vec<String>> = masters
        .iter()
        .map(|m| {
            vec![
                m.kpi_code.clone(),
                m.kpi_name.clone(),
                views::or_dash(m.description.as_deref()),
            ]
        })
        .collect();
    body.push_str(&views::table(&["Code", "Name", "Description"], &master_rows));

    body.push_str(&format!("<h2>Scores {}-{:02}</h2>", year, month));
    let score_rows: Vec<Vec<String>> = scores
        .iter()
        .map(|s| {
            vec![
                s.emp_id.to_string(),
                views::or_dash(s.project_code.as_deref()),
                s.kpi_code.clone(),
                s.score_date.to_string(),
                s.score.to_string(),
            ]
        })
        .collect();
    body.push_str(&views::table(
        &["Employee", "Project", "KPI", "Date", "Score"],
        &score_rows,
    ));

    Ok(views::page("KPI Administration", Some(&session), &body))
}

pub async fn recalculate(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Form(form): Form<RecalcForm>,
) -> AppResult<Redirect> {
    info!(
        "KPI recalculation {}-{:02} requested by {}",
        form.year, form.month, session.email
    );
    let summary = state
        .kpi
        .recalculate_monthly(form.year, form.month, &state.shutdown.child_token())
        .await?;
    info!(
        "KPI recalculation {}-{:02} wrote {} rows, cleared {}",
        summary.year, summary.month, summary.rows_written, summary.rows_cleared
    );
    Ok(Redirect::to(&format!(
        "/kpi-admin?year={}&month={}",
        summary.year, summary.month
    )))
}

pub async fn list_scores(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> AppResult<Json<Vec<KpiScore>>> {
    let (year, month) = resolve_period(&state, &query);
    Ok(Json(state.kpi.data().scores_by_month(year, month).await?))
}

pub async fn list_masters(State(state): State<AppState>) -> AppResult<Json<Vec<KpiMaster>>> {
    Ok(Json(state.kpi.data().masters().await?))
}

// src/main.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct Project {
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WeekView {
    employee_id: i64,
    week_start: String,
}

#[derive(Debug, Deserialize)]
struct TimesheetEntry {
    id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct KpiScore {
    emp_id: i64,
    project_code: Option<String>,
    kpi_code: String,
    score: String,
}

fn base_url() -> String {
    std::env::var("KPISYS_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// A client with its own cookie jar, logged in as `email`.
async fn login(base_url: &str, email: &str, password: &str) -> Result<Client, Box<dyn Error>> {
    let client = Client::builder().cookie_store(true).build()?;
    let response = client
        .post(format!("{}/auth/login", base_url))
        .form(&[("email", email), ("password", password)])
        .send()
        .await?;
    if response.status() == StatusCode::UNAUTHORIZED {
        return Err(format!("Login rejected for {}", email).into());
    }
    println!("Logged in as {} -> {}", email, response.url());
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = base_url();

    // Test 1: Status page
    println!("\n🔍 Checking server status...");
    let status = Client::new().get(format!("{}/status", base_url)).send().await?;
    println!("Status endpoint: {}", status.status());

    let staff = login(&base_url, "staff@example.com", "staff123").await?;
    let manager = login(&base_url, "manager@example.com", "manager123").await?;
    let admin = login(&base_url, "admin@example.com", "admin123").await?;

    // Test 2: Projects visible to any session
    println!("\n🔍 Listing projects...");
    let projects = staff
        .get(format!("{}/api/projects", base_url))
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<Project>>()
        .await?;
    for project in &projects {
        println!(" - {} ({})", project.name, project.code);
    }
    let project_code = projects
        .first()
        .map(|p| p.code.clone())
        .ok_or("No projects on the server")?;

    // Test 3: Create and submit a timesheet entry for this week's Monday
    println!("\n🔍 Creating a timesheet entry...");
    let week = staff
        .get(format!("{}/api/timesheets", base_url))
        .send()
        .await?
        .error_for_status()?
        .json::<WeekView>()
        .await?;
    println!("Employee {} week starting {}", week.employee_id, week.week_start);

    let response = staff
        .post(format!("{}/api/timesheets", base_url))
        .json(&json!({
            "project_code": project_code,
            "work_date": week.week_start,
            "hours": 4,
            "notes": "smoke test"
        }))
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        return Err(format!("Create failed ({}): {}", status, response.text().await?).into());
    }
    let entry = response.json::<TimesheetEntry>().await?;
    println!("Created entry {} ({})", entry.id, entry.status);

    let submitted = staff
        .post(format!("{}/api/timesheets/{}/submit", base_url, entry.id))
        .send()
        .await?
        .error_for_status()?
        .json::<TimesheetEntry>()
        .await?;
    println!("Entry {} is now {}", submitted.id, submitted.status);

    // Test 4: Approve as the manager
    println!("\n🔍 Approving as manager...");
    let approved = manager
        .post(format!("{}/api/approvals/{}/approve", base_url, entry.id))
        .json(&json!({ "remarks": "approved by smoke test" }))
        .send()
        .await?
        .error_for_status()?
        .json::<TimesheetEntry>()
        .await?;
    println!("Entry {} is now {}", approved.id, approved.status);

    // Test 5: Recalculate the KPI month as admin
    println!("\n🔍 Recalculating KPI scores...");
    let (year, month) = week
        .week_start
        .split('-')
        .collect::<Vec<_>>()
        .get(0..2)
        .map(|parts| (parts[0].to_string(), parts[1].trim_start_matches('0').to_string()))
        .ok_or("Unexpected week_start format")?;
    let response = admin
        .post(format!("{}/kpi-admin/recalculate", base_url))
        .form(&[("year", year.as_str()), ("month", month.as_str())])
        .send()
        .await?;
    println!("Recalculate: {} ({})", response.status(), response.url());

    let scores = admin
        .get(format!("{}/api/kpi/scores?year={}&month={}", base_url, year, month))
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<KpiScore>>()
        .await?;
    println!("{} KPI scores for {}-{}:", scores.len(), year, month);
    for score in scores.iter().take(12) {
        println!(
            " - employee {} {} {} = {}",
            score.emp_id,
            score.project_code.as_deref().unwrap_or("-"),
            score.kpi_code,
            score.score
        );
    }

    println!("\n✅ Smoke flow finished.");
    Ok(())
}

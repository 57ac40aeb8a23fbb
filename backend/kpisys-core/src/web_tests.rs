// src/web_tests.rs

#[cfg(test)]
mod tests {
    use crate::clock::Clock;
    use crate::seed::seed_demo_data;
    use crate::store::Store;
    use crate::web::{router, AppState};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
        Router,
    };
    use chrono::NaiveDateTime;
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    fn setup_test_environment() -> Router {
        let clock = Clock::fixed(
            NaiveDateTime::parse_from_str("2025-04-16 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        );
        let store = Store::in_memory();
        seed_demo_data(&store, &clock).unwrap();
        router(AppState::new(store, clock, 60))
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Logs in and returns the `session_token=...` cookie pair.
    async fn login(app: &Router, email: &str, password: &str) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "email={}&password={}",
                email.replace('@', "%40"),
                password
            )))
            .unwrap();
        let response = send(app, request).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "login failed for {}", email);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn get(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn send_json(method: &str, uri: &str, cookie: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_is_public() {
        let app = setup_test_environment();
        let response = send(&app, Request::builder().uri("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Server Status"));
    }

    #[tokio::test]
    async fn test_missing_session_redirects_to_login() {
        let app = setup_test_environment();
        let response = send(&app, get("/api/projects", "session_token=bogus")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/auth/login");
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let app = setup_test_environment();
        let request = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("email=staff%40example.com&password=nope"))
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_home_redirects_by_role_and_dashboards_are_guarded() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;
        let admin = login(&app, "admin@example.com", "admin123").await;

        let response = send(&app, get("/", &staff)).await;
        assert_eq!(location(&response), "/dashboard/employee");
        let response = send(&app, get("/", &admin)).await;
        assert_eq!(location(&response), "/dashboard/admin");

        assert_eq!(send(&app, get("/dashboard/employee", &staff)).await.status(), StatusCode::OK);
        assert_eq!(send(&app, get("/dashboard/admin", &staff)).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(send(&app, get("/dashboard/manager", &admin)).await.status(), StatusCode::OK);
        assert_eq!(send(&app, get("/dashboard/nobody", &admin)).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_reject_other_roles() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;
        let admin = login(&app, "admin@example.com", "admin123").await;

        assert_eq!(send(&app, get("/api/users", &staff)).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(send(&app, get("/kpi-admin", &staff)).await.status(), StatusCode::FORBIDDEN);

        let response = send(&app, get("/api/users", &admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let users = body_json(response).await;
        assert_eq!(users.as_array().map(Vec::len), Some(4));
        assert!(users[0].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_code_reads_are_open_and_writes_need_admin() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;
        let admin = login(&app, "admin@example.com", "admin123").await;
        let new_code = json!({ "code": "RND", "code_name": "研發組合", "sort_order": 4 });

        let response = send(&app, send_json("POST", "/api/codes/PORTFOLIO", &staff, new_code.clone())).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, send_json("POST", "/api/codes/PORTFOLIO", &admin, new_code.clone())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = send(&app, send_json("POST", "/api/codes/PORTFOLIO", &admin, new_code)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&app, get("/api/codes/PORTFOLIO", &staff)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let codes: Vec<String> = body_json(response)
            .await
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["code"].as_str().map(String::from))
            .collect();
        assert_eq!(codes, vec!["FIN", "HR", "OPS", "RND"]);
    }

    #[tokio::test]
    async fn test_directory_errors_map_to_status_codes() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;

        let response = send(&app, get("/api/projects", &staff)).await;
        assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(2));

        assert_eq!(send(&app, get("/api/projects/NOPE", &staff)).await.status(), StatusCode::NOT_FOUND);

        let duplicate = json!({ "org_id": "RD", "org_name": "Again" });
        let response = send(&app, send_json("POST", "/api/organizations", &staff, duplicate)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&app, send_json("DELETE", "/api/organizations/RD", &staff, json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, get("/api/organizations/tree", &staff)).await;
        let tree = body_json(response).await;
        assert_eq!(tree[0]["org_id"], "HQ");
        assert_eq!(tree[0]["children"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_timesheet_flow_from_entry_to_kpi_scores() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;
        let manager = login(&app, "manager@example.com", "manager123").await;
        let admin = login(&app, "admin@example.com", "admin123").await;

        let entry = json!({
            "project_code": "PRJ-001",
            "task_id": 1,
            "work_date": "2025-04-15",
            "hours": 8,
            "notes": "Kickoff prep"
        });
        let response = send(&app, send_json("POST", "/api/timesheets", &staff, entry)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "Draft");
        let id = created["id"].as_i64().unwrap();

        let response = send(&app, get("/api/timesheets?date=2025-04-17", &staff)).await;
        let week = body_json(response).await;
        assert_eq!(week["week_start"], "2025-04-14");
        assert_eq!(week["entries"].as_array().map(Vec::len), Some(1));

        let response = send(&app, send_json("POST", &format!("/api/timesheets/{}/submit", id), &staff, json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Staff cannot reach the review queue at all.
        assert_eq!(send(&app, get("/api/approvals", &staff)).await.status(), StatusCode::FORBIDDEN);

        let response = send(&app, get("/api/approvals", &manager)).await;
        let queue = body_json(response).await;
        assert_eq!(queue.as_array().map(Vec::len), Some(1));

        let response = send(
            &app,
            send_json("POST", &format!("/api/approvals/{}/reject", id), &manager, json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            send_json("POST", &format!("/api/approvals/{}/approve", id), &manager, json!({ "remarks": "ok" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "Approved");

        let response = send(&app, get(&format!("/api/timesheets/{}/audits", id), &staff)).await;
        let actions: Vec<String> = body_json(response)
            .await
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a["action"].as_str().map(String::from))
            .collect();
        assert_eq!(actions, vec!["Approve", "Submit"]);

        let recalc = Request::builder()
            .method("POST")
            .uri("/kpi-admin/recalculate")
            .header(header::COOKIE, &admin)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("year=2025&month=4"))
            .unwrap();
        let response = send(&app, recalc).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/kpi-admin?year=2025&month=4");

        let response = send(&app, get("/api/kpi/scores?year=2025&month=4", &admin)).await;
        let scores = body_json(response).await;
        assert_eq!(scores.as_array().map(Vec::len), Some(6));
        assert!(scores
            .as_array()
            .unwrap()
            .iter()
            .all(|s| s["emp_id"] == 1002));

        let response = send(&app, get("/kpi-admin?year=2025&month=4", &admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("OutputPerHour"));
    }

    #[tokio::test]
    async fn test_approval_without_a_body_is_accepted() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;
        let manager = login(&app, "manager@example.com", "manager123").await;

        let entry = json!({ "project_code": "PRJ-001", "work_date": "2025-04-14", "hours": 6 });
        let response = send(&app, send_json("POST", "/api/timesheets", &staff, entry)).await;
        let id = body_json(response).await["id"].as_i64().unwrap();
        let response = send(&app, send_json("POST", &format!("/api/timesheets/{}/submit", id), &staff, json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bare_post = |uri: String| {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::COOKIE, &manager)
                .body(Body::empty())
                .unwrap()
        };

        // Reject still needs remarks, so a bare POST is a validation error.
        let response = send(&app, bare_post(format!("/api/approvals/{}/reject", id))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, bare_post(format!("/api/approvals/{}/approve", id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let approved = body_json(response).await;
        assert_eq!(approved["status"], "Approved");
        assert!(approved["approval_remarks"].is_null());
    }

    #[tokio::test]
    async fn test_logout_ends_the_session() {
        let app = setup_test_environment();
        let staff = login(&app, "staff@example.com", "staff123").await;

        let logout = Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .header(header::COOKIE, &staff)
            .body(Body::empty())
            .unwrap();
        let response = send(&app, logout).await;
        assert_eq!(location(&response), "/auth/login");

        let response = send(&app, get("/api/projects", &staff)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}

// src/web/views.rs
use axum::response::Html;

use crate::session::Session;

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps `body` in the shared layout. `body` must already be escaped.
pub fn page(title: &str, session: Option<&Session>, body: &str) -> Html<String> {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{} - KPI System</title></head><body>", escape(title)));
    if let Some(session) = session {
        html.push_str(&format!(
            "<nav><a href='/'>Home</a> | <a href='/organizations/browser'>Organizations</a>{} \
             <span>{} ({})</span> \
             <form method='post' action='/auth/logout' style='display:inline'><button>Logout</button></form></nav>",
            if session.role == crate::session::Role::Admin {
                " | <a href='/kpi-admin'>KPI Admin</a>"
            } else {
                ""
            },
            escape(&session.display_name),
            session.role
        ));
    }
    html.push_str(&format!("<h1>{}</h1>", escape(title)));
    html.push_str(body);
    html.push_str("</body></html>");
    Html(html)
}

pub fn login_page(error: Option<&str>) -> Html<String> {
    let mut body = String::new();
    if let Some(error) = error {
        body.push_str(&format!("<p class='error'>{}</p>", escape(error)));
    }
    body.push_str(
        "<form method='post' action='/auth/login'>\
         <label>Email <input name='email' type='email'></label> \
         <label>Password <input name='password' type='password'></label> \
         <button>Login</button></form>",
    );
    page("Login", None, &body)
}

/// Renders rows of already-stringified cells; every cell is escaped.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "<p>No records.</p>".to_string();
    }
    let mut html = String::from("<table border='1'><tr>");
    for header in headers {
        html.push_str(&format!("<th>{}</th>", escape(header)));
    }
    html.push_str("</tr>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape(cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

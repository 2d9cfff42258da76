//! HTML views for the operator dashboard. The page polls the units fragment via HTMX.

use batwatch_core::{derive_badge, Badge, UnitKind, UnitState};
use chrono::{DateTime, Utc};

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn badge_html(badge: &Badge) -> String {
    format!(
        r#"<span class="badge {}">{}</span>"#,
        badge.tone.css_class(),
        badge.label
    )
}

pub fn dashboard_page(app_name: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{name}</title>
  <script src="https://unpkg.com/htmx.org@1.9.12"></script>
  <style>
    body {{ font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; margin: 2rem; }}
    table {{ width: 100%; border-collapse: collapse; }}
    th, td {{ padding: .5rem .75rem; text-align: left; border-bottom: 1px solid #334155; }}
    th {{ color: #f59e0b; }}
    .badge {{ padding: .1rem .5rem; border-radius: .25rem; font-size: .8rem; font-weight: 600; }}
    .badge-neutral {{ background: #334155; }}
    .badge-info {{ background: #2563eb; }}
    .badge-success {{ background: #16a34a; }}
    .badge-danger {{ background: #dc2626; }}
    .badge-muted {{ background: #1e293b; color: #64748b; }}
  </style>
</head>
<body>
  <h1>{name}</h1>
  <div id="units" hx-get="/dashboard/units" hx-trigger="load, every 2s"></div>
</body>
</html>"#,
        name = html_escape(app_name)
    )
}

/// Summary cards plus the units table.
pub fn units_fragment(units: &[UnitState], now: DateTime<Utc>, revert_after: chrono::Duration) -> String {
    let count = |kind: UnitKind| units.iter().filter(|u| u.info.kind == kind).count();
    let busy = units.iter().filter(|u| u.is_busy()).count();
    let online = units.iter().filter(|u| u.connection.connected).count();

    let summary = format!(
        r#"<p>{} servers · {} standalones · {} clients · {} online · {} busy</p>"#,
        count(UnitKind::Server),
        count(UnitKind::Standalone),
        count(UnitKind::Client),
        online,
        busy
    );

    let mut rows = String::new();
    for u in units {
        let badge = derive_badge(u, now, revert_after);
        let parent = u.info.server_id.as_deref().unwrap_or("—");
        rows.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.5}, {:.5}</td><td>{}</td><td>{}</td></tr>"#,
            html_escape(&u.info.id),
            html_escape(&u.info.name),
            u.info.kind.as_str(),
            html_escape(parent),
            u.info.location.latitude,
            u.info.location.longitude,
            u.mode.as_str(),
            badge_html(&badge)
        ));
    }
    if units.is_empty() {
        rows.push_str(r#"<tr><td colspan="7">No recording units registered.</td></tr>"#);
    }

    format!(
        r#"{}<table><thead><tr><th>ID</th><th>Name</th><th>Kind</th><th>Server</th><th>Location</th><th>Mode</th><th>Status</th></tr></thead><tbody>{}</tbody></table>"#,
        summary, rows
    )
}

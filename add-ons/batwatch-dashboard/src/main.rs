//! **Batwatch Dashboard**: `batwatch status` prints the recording fleet as seen by the
//! gateway: every unit with its mode and status badge, a unit's scheduled records, or
//! the cached species predictions of a recording folder.
//!
//! ## Usage
//!
//! ```text
//! batwatch status                 # fleet overview (default)
//! batwatch records <unit>         # scheduled records of a server or standalone
//! batwatch predictions <folder>   # cached predictions of a recording folder
//! batwatch --help                 # print usage
//! ```
//!
//! The gateway address comes from `BATWATCH_GATEWAY_URL` (default `http://127.0.0.1:8010`).

use batwatch_core::{Prediction, ScheduledRecord, UnitKind, UnitState};
use chrono::Utc;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8010";

#[derive(Debug, Deserialize)]
struct BadgeDto {
    label: String,
    tone: String,
}

#[derive(Debug, Deserialize)]
struct UnitRow {
    #[serde(flatten)]
    state: UnitState,
    busy: bool,
    badge: BadgeDto,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    #[serde(flatten)]
    record: ScheduledRecord,
    key: String,
    badge: BadgeDto,
}

fn main() {
    dotenvy::dotenv().ok();
    let args: Vec<String> = std::env::args().collect();
    let sub = args.get(1).map(|s| s.as_str()).unwrap_or("status");
    let arg = args.get(2).map(|s| s.as_str());

    let result = match (sub, arg) {
        ("status", _) => run_status(),
        ("records", Some(unit)) => run_records(unit),
        ("predictions", Some(folder)) => run_predictions(folder),
        ("records", None) | ("predictions", None) => {
            Err(format!("'{}' needs an argument. See batwatch --help", sub))
        }
        ("--help" | "-h" | "help", _) => {
            print_help();
            Ok(())
        }
        (other, _) => Err(format!(
            "Unknown subcommand '{}'. Use: batwatch status | records <unit> | predictions <folder> | --help",
            other
        )),
    };

    if let Err(e) = result {
        eprintln!("batwatch {}: {}", sub, e);
        std::process::exit(1);
    }
}

fn print_help() {
    println!("Batwatch Dashboard v{}", VERSION);
    println!();
    println!("Usage: batwatch [COMMAND]");
    println!();
    println!("Commands:");
    println!("  status                Fleet overview: units, modes and status (default)");
    println!("  records <unit>        Scheduled records of a server or standalone");
    println!("  predictions <folder>  Cached species predictions of a recording folder");
    println!("  help                  Print this help message");
    println!();
    println!("Set BATWATCH_GATEWAY_URL to reach a gateway other than {}.", DEFAULT_GATEWAY_URL);
}

fn gateway_url() -> String {
    std::env::var("BATWATCH_GATEWAY_URL")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string())
}

/// Gateway URL for `segments`, each percent-encoded as a single path segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, String> {
    let mut url =
        reqwest::Url::parse(base).map_err(|e| format!("Invalid gateway URL '{}': {}", base, e))?;
    url.path_segments_mut()
        .map_err(|_| format!("Gateway URL '{}' cannot carry a path", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn fetch<T: DeserializeOwned>(segments: &[&str]) -> Result<T, String> {
    let url = endpoint(&gateway_url(), segments)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| format!("HTTP client: {}", e))?;
    let resp = client
        .get(url.clone())
        .send()
        .map_err(|e| format!("Gateway unreachable at {} ({}). Is batwatch-gateway running?", url, e))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        return Err(format!("Gateway error {}: {}", status, message));
    }
    resp.json().map_err(|e| format!("Invalid JSON from gateway: {}", e))
}

fn tone_color(tone: &str) -> Color {
    match tone {
        "info" => Color::Cyan,
        "success" => Color::Green,
        "danger" => Color::Red,
        "muted" => Color::DarkGrey,
        _ => Color::Reset,
    }
}

fn header(cols: &[&str]) -> Vec<Cell> {
    cols.iter()
        .map(|c| {
            Cell::new(c)
                .set_alignment(CellAlignment::Center)
                .add_attribute(Attribute::Bold)
        })
        .collect()
}

fn new_table(cols: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(cols));
    table
}

fn run_status() -> Result<(), String> {
    let units: Vec<UnitRow> = fetch(&["api", "v1", "units"])?;

    println!();
    println!("  BATWATCH v{}  —  {}", VERSION, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("{}", units_table(&units));
    println!("  {}", fleet_summary(&units));
    println!();
    Ok(())
}

fn units_table(units: &[UnitRow]) -> Table {
    let mut table = new_table(&["ID", "Name", "Kind", "Server", "Location", "Mode", "Status"]);
    for u in units {
        let info = &u.state.info;
        let mode = Cell::new(u.state.mode.as_str());
        let mode = if u.busy {
            mode.add_attribute(Attribute::Bold)
        } else {
            mode
        };
        table.add_row(vec![
            Cell::new(&info.id),
            Cell::new(&info.name),
            Cell::new(info.kind.as_str()),
            Cell::new(info.server_id.as_deref().unwrap_or("—")),
            Cell::new(format!(
                "{:.4}, {:.4}",
                info.location.latitude, info.location.longitude
            ))
            .set_alignment(CellAlignment::Right),
            mode,
            Cell::new(&u.badge.label)
                .set_alignment(CellAlignment::Center)
                .fg(tone_color(&u.badge.tone)),
        ]);
    }
    table
}

fn fleet_summary(units: &[UnitRow]) -> String {
    let count = |kind: UnitKind| units.iter().filter(|u| u.state.info.kind == kind).count();
    format!(
        "Servers: {}  |  Standalones: {}  |  Clients: {}  |  Online: {}  |  Busy: {}",
        count(UnitKind::Server),
        count(UnitKind::Standalone),
        count(UnitKind::Client),
        units.iter().filter(|u| u.state.connection.connected).count(),
        units.iter().filter(|u| u.busy).count()
    )
}

fn run_records(unit: &str) -> Result<(), String> {
    let records: Vec<RecordRow> = fetch(&["api", "v1", "units", unit, "records"])?;
    println!();
    println!("  Scheduled records — {}", unit);
    println!();
    if records.is_empty() {
        println!("  (No scheduled records)");
        println!();
        return Ok(());
    }
    let mut table = new_table(&["Start (UTC)", "Duration", "Status", "Updated"]);
    for r in &records {
        table.add_row(vec![
            Cell::new(&r.key),
            Cell::new(format!("{}s", r.record.duration_secs)).set_alignment(CellAlignment::Right),
            Cell::new(&r.badge.label).fg(tone_color(&r.badge.tone)),
            Cell::new(r.record.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

fn run_predictions(folder: &str) -> Result<(), String> {
    let predictions: Vec<Prediction> = fetch(&["api", "v1", "folders", folder, "predictions"])?;
    println!();
    println!("  Species predictions — {}", folder);
    println!();
    if predictions.is_empty() {
        println!("  (No cached predictions; start a run from the dashboard)");
        println!();
        return Ok(());
    }
    println!("{}", predictions_table(&predictions));
    println!();
    Ok(())
}

fn predictions_table(predictions: &[Prediction]) -> Table {
    let mut table = new_table(&["File", "Top species", "Confidence", "Runner-up"]);
    for p in predictions {
        let (top, conf) = match p.top() {
            Some(s) => (s.species.clone(), format!("{:.0}%", s.confidence * 100.0)),
            None => ("—".to_string(), "—".to_string()),
        };
        let runner_up = p
            .species
            .get(1)
            .map(|s| format!("{} ({:.0}%)", s.species, s.confidence * 100.0))
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(&p.file),
            Cell::new(top).add_attribute(Attribute::Bold),
            Cell::new(conf).set_alignment(CellAlignment::Right),
            Cell::new(runner_up),
        ]);
    }
    table
}

//! Documents stored in the dashboard tree: recording units, their command state,
//! scheduled records and species predictions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BatwatchError, BatwatchResult};

/// Longest accepted unit id.
pub const MAX_UNIT_ID_LEN: usize = 64;

/// Key format for scheduled records. Lexicographic order equals chronological order.
pub const RECORD_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Kind of recording hardware tracked by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Base station that relays for its clients and transmits recordings.
    Server,
    /// Self-contained recorder that uploads its own recordings.
    Standalone,
    /// Field microphone attached to a server.
    Client,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Standalone => "standalone",
            Self::Client => "client",
        }
    }

    /// Servers and standalones accept remote commands; clients follow their server.
    pub fn accepts_commands(&self) -> bool {
        !matches!(self, Self::Client)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn validate(&self) -> BatwatchResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(BatwatchError::Invalid(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(BatwatchError::Invalid(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Identity document stored at `units/{id}/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub id: String,
    pub kind: UnitKind,
    #[serde(default)]
    pub name: String,
    pub location: GeoLocation,
    /// Parent server; set for clients only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Checks a unit id: 1..=64 chars of `[A-Za-z0-9_-]`.
pub fn validate_unit_id(id: &str) -> BatwatchResult<()> {
    if id.is_empty() || id.len() > MAX_UNIT_ID_LEN {
        return Err(BatwatchError::Invalid(format!(
            "unit id must be 1..={} characters",
            MAX_UNIT_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(BatwatchError::Invalid(format!(
            "unit id '{}' may only contain letters, digits, '_' and '-'",
            id
        )));
    }
    Ok(())
}

/// Current command state of a server or standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    Connect,
    Locate,
    Instant,
    Schedule,
    TransmitScheduled,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connect => "connect",
            Self::Locate => "locate",
            Self::Instant => "instant",
            Self::Schedule => "schedule",
            Self::TransmitScheduled => "transmit_scheduled",
        }
    }
}

/// Backend-written progress of the last command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStatus {
    #[default]
    Idle,
    Pending,
    InProgress,
    Success,
    Error,
}

impl ActiveStatus {
    /// Success and error end a command; the unit returns to idle mode.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStatusRecord {
    pub status: ActiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connected: bool,
    pub updated_at: DateTime<Utc>,
}

/// Merged view of one unit, assembled from its documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub info: UnitInfo,
    pub mode: Mode,
    pub active_status: ActiveStatusRecord,
    pub connection: ConnectionRecord,
}

impl UnitState {
    /// A unit is busy while a command is outstanding.
    pub fn is_busy(&self) -> bool {
        self.mode != Mode::Idle
            || matches!(
                self.active_status.status,
                ActiveStatus::Pending | ActiveStatus::InProgress
            )
    }
}

/// Lifecycle of a scheduled recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Scheduled,
    Recording,
    ReadyToTransmit,
    ReadyToUpload,
    Transmitting,
    Uploading,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Recording => "recording",
            Self::ReadyToTransmit => "ready_to_transmit",
            Self::ReadyToUpload => "ready_to_upload",
            Self::Transmitting => "transmitting",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Status a finished recording waits in before it leaves the unit.
    pub fn ready_status(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Standalone => Self::ReadyToUpload,
            _ => Self::ReadyToTransmit,
        }
    }

    /// Status while the recording is leaving the unit.
    pub fn in_flight_status(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Standalone => Self::Uploading,
            _ => Self::Transmitting,
        }
    }

    /// Servers take the transmit branch, standalones the upload branch.
    /// `Failed` is reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: RecordStatus, kind: UnitKind) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        let ready = Self::ready_status(kind);
        let in_flight = Self::in_flight_status(kind);
        match self {
            Self::Scheduled => next == Self::Recording,
            Self::Recording => next == ready,
            s if *s == ready => next == in_flight,
            s if *s == in_flight => next == Self::Completed,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document at `units/{id}/scheduled_records/{start}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRecord {
    pub start: DateTime<Utc>,
    pub duration_secs: u32,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledRecord {
    pub fn key(&self) -> String {
        record_key(&self.start)
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + chrono::Duration::seconds(i64::from(self.duration_secs))
    }

    /// Half-open interval overlap against another window.
    pub fn overlaps(&self, start: DateTime<Utc>, duration_secs: u32) -> bool {
        let end = start + chrono::Duration::seconds(i64::from(duration_secs));
        self.start < end && start < self.end()
    }
}

/// ISO-8601 key of a record start (second precision, UTC).
pub fn record_key(start: &DateTime<Utc>) -> String {
    start.format(RECORD_KEY_FORMAT).to_string()
}

/// Parses a record key or any RFC 3339 timestamp.
pub fn parse_record_key(s: &str) -> BatwatchResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| BatwatchError::Invalid(format!("timestamp '{}': {}", s, e)))
}

/// One ranked species guess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesScore {
    pub species: String,
    pub confidence: f64,
}

/// Drops non-finite confidences, clamps to [0, 1], sorts descending (stable on ties)
/// and keeps the first `top_k` entries. `top_k == 0` keeps everything.
pub fn rank_species(scores: Vec<SpeciesScore>, top_k: usize) -> Vec<SpeciesScore> {
    let mut ranked: Vec<SpeciesScore> = scores
        .into_iter()
        .filter(|s| s.confidence.is_finite())
        .map(|mut s| {
            s.confidence = s.confidence.clamp(0.0, 1.0);
            s
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if top_k > 0 {
        ranked.truncate(top_k);
    }
    ranked
}

/// Prediction for one recording, stored at `predictions/{folder}/{file}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub folder: String,
    pub file: String,
    pub species: Vec<SpeciesScore>,
    pub predicted_at: DateTime<Utc>,
}

impl Prediction {
    pub fn top(&self) -> Option<&SpeciesScore> {
        self.species.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub humidity_pct: Option<f64>,
    #[serde(default)]
    pub battery_v: Option<f64>,
}

/// A file inside a recording folder as listed by the prediction API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingFile {
    pub name: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub spectrogram_url: Option<String>,
    #[serde(default)]
    pub sensor: Option<SensorReading>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3"];

impl RecordingFile {
    pub fn is_audio(&self) -> bool {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Progress of a folder prediction job, stored at `jobs/{folder}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub folder: String,
    pub state: JobState,
    pub total: usize,
    pub done: usize,
    pub cached: usize,
    pub failed: usize,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

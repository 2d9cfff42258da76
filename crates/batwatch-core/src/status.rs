//! Status badges shown next to units and records.
//!
//! A command moves a unit through pending → in progress → success | error. The last
//! two are shown only for a short window after the device reported them; after that
//! the badge falls back to idle.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{ActiveStatus, Mode, RecordStatus, UnitState};

/// How long success and error badges stay visible.
pub const DEFAULT_REVERT_AFTER_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Info,
    Success,
    Danger,
    Muted,
}

impl Tone {
    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Neutral => "badge-neutral",
            Self::Info => "badge-info",
            Self::Success => "badge-success",
            Self::Danger => "badge-danger",
            Self::Muted => "badge-muted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub label: &'static str,
    pub tone: Tone,
}

impl Badge {
    const fn new(label: &'static str, tone: Tone) -> Self {
        Self { label, tone }
    }
}

fn in_progress_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Connect => "Connecting",
        Mode::Locate => "Locating",
        Mode::Instant => "Recording",
        Mode::Schedule => "Scheduling",
        Mode::TransmitScheduled => "Transmitting",
        Mode::Idle => "Working",
    }
}

/// Badge for a unit at `now`.
pub fn derive_badge(state: &UnitState, now: DateTime<Utc>, revert_after: Duration) -> Badge {
    let status = &state.active_status;
    let expired = now - status.updated_at >= revert_after;
    match status.status {
        ActiveStatus::Pending => Badge::new("Sending", Tone::Info),
        ActiveStatus::InProgress => Badge::new(in_progress_label(state.mode), Tone::Info),
        ActiveStatus::Success if !expired => Badge::new("Success", Tone::Success),
        ActiveStatus::Error if !expired => Badge::new("Error", Tone::Danger),
        _ if !state.connection.connected => Badge::new("Offline", Tone::Muted),
        _ => Badge::new("Idle", Tone::Neutral),
    }
}

pub fn record_badge(status: RecordStatus) -> Badge {
    match status {
        RecordStatus::Scheduled => Badge::new("Scheduled", Tone::Neutral),
        RecordStatus::Recording => Badge::new("Recording", Tone::Info),
        RecordStatus::ReadyToTransmit => Badge::new("Ready to transmit", Tone::Neutral),
        RecordStatus::ReadyToUpload => Badge::new("Ready to upload", Tone::Neutral),
        RecordStatus::Transmitting => Badge::new("Transmitting", Tone::Info),
        RecordStatus::Uploading => Badge::new("Uploading", Tone::Info),
        RecordStatus::Completed => Badge::new("Completed", Tone::Success),
        RecordStatus::Failed => Badge::new("Failed", Tone::Danger),
    }
}

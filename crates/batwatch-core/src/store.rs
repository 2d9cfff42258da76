//! Dashboard document tree: sled-backed store for units, scheduled records,
//! predictions and job progress. Values are JSON documents under slash-separated paths.
//!
//! | Path | Document |
//! |------|----------|
//! | `units/{id}/info` | [`UnitInfo`] |
//! | `units/{id}/mode` | [`Mode`] |
//! | `units/{id}/active_status` | [`ActiveStatusRecord`] |
//! | `units/{id}/connection` | [`ConnectionRecord`] |
//! | `units/{id}/scheduled_records/{start}` | [`ScheduledRecord`] |
//! | `predictions/{folder}/{file}` | [`Prediction`] |
//! | `jobs/{folder}` | [`JobProgress`] |

use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{BatwatchError, BatwatchResult};
use crate::models::{
    record_key, validate_unit_id, ActiveStatus, ActiveStatusRecord, ConnectionRecord, JobProgress,
    Mode, Prediction, RecordStatus, ScheduledRecord, UnitInfo, UnitKind, UnitState,
};

pub const UNITS_PREFIX: &str = "units/";
pub const PREDICTIONS_PREFIX: &str = "predictions/";
pub const JOBS_PREFIX: &str = "jobs/";

/// Events a subscriber may fall behind by before newer ones are dropped.
pub const SUBSCRIPTION_BUFFER: usize = 256;

const WATCH_POLL: Duration = Duration::from_millis(500);

/// Escapes a free-form segment (folder or file name) for use inside a path.
pub fn escape_segment(s: &str) -> String {
    s.replace('%', "%25").replace('/', "%2F")
}

fn unit_prefix(id: &str) -> String {
    format!("{}{}/", UNITS_PREFIX, id)
}

fn unit_path(id: &str, leaf: &str) -> String {
    format!("{}{}/{}", UNITS_PREFIX, id, leaf)
}

fn records_prefix(id: &str) -> String {
    unit_path(id, "scheduled_records/")
}

fn prediction_path(folder: &str, file: &str) -> String {
    format!(
        "{}{}/{}",
        PREDICTIONS_PREFIX,
        escape_segment(folder),
        escape_segment(file)
    )
}

fn job_path(folder: &str) -> String {
    format!("{}{}", JOBS_PREFIX, escape_segment(folder))
}

/// Change observed through a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Put {
        path: String,
        value: serde_json::Value,
    },
    Removed {
        path: String,
    },
}

impl StoreEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::Put { path, .. } | Self::Removed { path } => path,
        }
    }

    /// Short name of the change (`put` or `removed`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Removed { .. } => "removed",
        }
    }
}

impl From<sled::Event> for StoreEvent {
    fn from(event: sled::Event) -> Self {
        match event {
            sled::Event::Insert { key, value } => Self::Put {
                path: String::from_utf8_lossy(&key).into_owned(),
                value: serde_json::from_slice(&value).unwrap_or(serde_json::Value::Null),
            },
            sled::Event::Remove { key } => Self::Removed {
                path: String::from_utf8_lossy(&key).into_owned(),
            },
        }
    }
}

/// Live feed of changes under a path prefix.
///
/// A watcher thread drains the sled subscriber into a bounded channel, so a reader
/// that stops polling loses events instead of stalling store writers.
pub struct Subscription {
    rx: mpsc::Receiver<StoreEvent>,
}

impl Subscription {
    /// Waits for the next change. `None` once the store is dropped.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }
}

fn forward_events(prefix: String, mut watcher: sled::Subscriber, tx: mpsc::Sender<StoreEvent>) {
    let mut dropped = 0usize;
    while !tx.is_closed() {
        match watcher.next_timeout(WATCH_POLL) {
            Ok(event) => match tx.try_send(StoreEvent::from(event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        tracing::warn!(prefix = %prefix, dropped, "subscriber lagging; events dropped");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(prefix = %prefix, "store watcher stopped");
}

/// Document store for the dashboard.
#[derive(Clone)]
pub struct DashboardStore {
    db: sled::Db,
}

impl DashboardStore {
    /// Open the store at `path`, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> BatwatchResult<Self> {
        let db = sled::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "dashboard store opened");
        Ok(Self { db })
    }

    /// In-memory store removed on drop.
    pub fn open_temporary() -> BatwatchResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn put_doc<T: Serialize>(&self, path: &str, doc: &T) -> BatwatchResult<()> {
        let bytes = serde_json::to_vec(doc)?;
        self.db.insert(path.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_doc<T: DeserializeOwned>(&self, path: &str) -> BatwatchResult<Option<T>> {
        match self.db.get(path.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    fn scan_docs<T: DeserializeOwned>(&self, prefix: &str) -> BatwatchResult<Vec<(String, T)>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (k, v) = entry?;
            let key = String::from_utf8_lossy(&k).into_owned();
            out.push((key, serde_json::from_slice(&v)?));
        }
        Ok(out)
    }

    fn remove_prefix(&self, prefix: &str) -> BatwatchResult<usize> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<Result<_, _>>()?;
        for k in &keys {
            self.db.remove(k)?;
        }
        Ok(keys.len())
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> BatwatchResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Watch every change under `prefix` (e.g. `units/` or `predictions/`).
    pub fn subscribe(&self, prefix: &str) -> Subscription {
        let watcher = self.db.watch_prefix(prefix.as_bytes());
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let prefix = prefix.to_string();
        std::thread::spawn(move || forward_events(prefix, watcher, tx));
        Subscription { rx }
    }

    // ── units ──────────────────────────────────────────────────────────────

    /// Register a new unit. Clients must name an existing server.
    pub fn add_unit(&self, info: &UnitInfo) -> BatwatchResult<()> {
        validate_unit_id(&info.id)?;
        info.location.validate()?;
        if self.get_doc::<UnitInfo>(&unit_path(&info.id, "info"))?.is_some() {
            return Err(BatwatchError::Conflict(format!("unit {}", info.id)));
        }
        match (info.kind, info.server_id.as_deref()) {
            (UnitKind::Client, Some(server_id)) => {
                let parent = self
                    .get_doc::<UnitInfo>(&unit_path(server_id, "info"))?
                    .ok_or_else(|| BatwatchError::NotFound(format!("server {}", server_id)))?;
                if parent.kind != UnitKind::Server {
                    return Err(BatwatchError::Invalid(format!(
                        "client parent {} is a {}, not a server",
                        server_id,
                        parent.kind.as_str()
                    )));
                }
            }
            (UnitKind::Client, None) => {
                return Err(BatwatchError::Invalid("client requires server_id".into()));
            }
            (_, Some(_)) => {
                return Err(BatwatchError::Invalid(format!(
                    "{} cannot have a parent server",
                    info.kind.as_str()
                )));
            }
            (_, None) => {}
        }

        let now = info.created_at;
        self.put_doc(&unit_path(&info.id, "info"), info)?;
        self.put_doc(&unit_path(&info.id, "mode"), &Mode::Idle)?;
        self.put_doc(
            &unit_path(&info.id, "active_status"),
            &ActiveStatusRecord {
                status: ActiveStatus::Idle,
                message: None,
                updated_at: now,
            },
        )?;
        self.put_doc(
            &unit_path(&info.id, "connection"),
            &ConnectionRecord {
                connected: false,
                updated_at: now,
            },
        )?;
        tracing::info!(unit = %info.id, kind = info.kind.as_str(), "unit added");
        Ok(())
    }

    /// Remove a unit and everything under it. Removing a server removes its clients.
    /// Busy units are refused.
    pub fn remove_unit(&self, id: &str) -> BatwatchResult<()> {
        let state = self.require_unit(id)?;
        if state.is_busy() {
            return Err(BatwatchError::Busy(id.to_string()));
        }
        if state.info.kind == UnitKind::Server {
            for client in self.list_clients(id)? {
                let removed = self.remove_prefix(&unit_prefix(&client.info.id))?;
                tracing::debug!(client = %client.info.id, keys = removed, "client removed with server");
            }
        }
        let removed = self.remove_prefix(&unit_prefix(id))?;
        tracing::info!(unit = %id, keys = removed, "unit removed");
        Ok(())
    }

    pub fn get_unit(&self, id: &str) -> BatwatchResult<Option<UnitState>> {
        let Some(info) = self.get_doc::<UnitInfo>(&unit_path(id, "info"))? else {
            return Ok(None);
        };
        let mode = self
            .get_doc::<Mode>(&unit_path(id, "mode"))?
            .unwrap_or_default();
        let active_status = self
            .get_doc::<ActiveStatusRecord>(&unit_path(id, "active_status"))?
            .unwrap_or(ActiveStatusRecord {
                status: ActiveStatus::Idle,
                message: None,
                updated_at: info.created_at,
            });
        let connection = self
            .get_doc::<ConnectionRecord>(&unit_path(id, "connection"))?
            .unwrap_or(ConnectionRecord {
                connected: false,
                updated_at: info.created_at,
            });
        Ok(Some(UnitState {
            info,
            mode,
            active_status,
            connection,
        }))
    }

    pub fn require_unit(&self, id: &str) -> BatwatchResult<UnitState> {
        self.get_unit(id)?
            .ok_or_else(|| BatwatchError::NotFound(format!("unit {}", id)))
    }

    /// All units ordered by id.
    pub fn list_units(&self) -> BatwatchResult<Vec<UnitState>> {
        let mut ids: Vec<String> = self
            .scan_docs::<serde_json::Value>(UNITS_PREFIX)?
            .into_iter()
            .filter_map(|(k, _)| {
                k.strip_prefix(UNITS_PREFIX)
                    .and_then(|rest| rest.strip_suffix("/info"))
                    .filter(|id| !id.contains('/'))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        let mut units = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(u) = self.get_unit(&id)? {
                units.push(u);
            }
        }
        Ok(units)
    }

    pub fn list_clients(&self, server_id: &str) -> BatwatchResult<Vec<UnitState>> {
        Ok(self
            .list_units()?
            .into_iter()
            .filter(|u| {
                u.info.kind == UnitKind::Client && u.info.server_id.as_deref() == Some(server_id)
            })
            .collect())
    }

    pub fn set_mode(&self, id: &str, mode: Mode) -> BatwatchResult<()> {
        self.put_doc(&unit_path(id, "mode"), &mode)
    }

    pub fn set_active_status(&self, id: &str, record: &ActiveStatusRecord) -> BatwatchResult<()> {
        self.put_doc(&unit_path(id, "active_status"), record)
    }

    pub fn set_connection(&self, id: &str, record: &ConnectionRecord) -> BatwatchResult<()> {
        self.put_doc(&unit_path(id, "connection"), record)
    }

    // ── scheduled records ─────────────────────────────────────────────────

    pub fn put_scheduled_record(&self, id: &str, record: &ScheduledRecord) -> BatwatchResult<()> {
        let path = format!("{}{}", records_prefix(id), record.key());
        self.put_doc(&path, record)
    }

    pub fn get_scheduled_record(
        &self,
        id: &str,
        start: &DateTime<Utc>,
    ) -> BatwatchResult<Option<ScheduledRecord>> {
        self.get_doc(&format!("{}{}", records_prefix(id), record_key(start)))
    }

    /// Records of a unit in chronological order.
    pub fn list_scheduled_records(&self, id: &str) -> BatwatchResult<Vec<ScheduledRecord>> {
        Ok(self
            .scan_docs::<ScheduledRecord>(&records_prefix(id))?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    /// Move a record along its lifecycle; illegal moves are rejected.
    pub fn update_record_status(
        &self,
        id: &str,
        start: &DateTime<Utc>,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> BatwatchResult<ScheduledRecord> {
        let unit = self.require_unit(id)?;
        let mut record = self.get_scheduled_record(id, start)?.ok_or_else(|| {
            BatwatchError::NotFound(format!("record {} on unit {}", record_key(start), id))
        })?;
        if !record.status.can_transition_to(status, unit.info.kind) {
            return Err(BatwatchError::Transition {
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }
        record.status = status;
        record.updated_at = now;
        self.put_scheduled_record(id, &record)?;
        tracing::info!(unit = %id, start = %record.key(), status = %status, "record status updated");
        Ok(record)
    }

    // ── predictions ───────────────────────────────────────────────────────

    pub fn put_prediction(&self, prediction: &Prediction) -> BatwatchResult<()> {
        self.put_doc(
            &prediction_path(&prediction.folder, &prediction.file),
            prediction,
        )
    }

    pub fn get_prediction(&self, folder: &str, file: &str) -> BatwatchResult<Option<Prediction>> {
        self.get_doc(&prediction_path(folder, file))
    }

    /// Cached predictions of a folder, ordered by file name.
    pub fn list_predictions(&self, folder: &str) -> BatwatchResult<Vec<Prediction>> {
        let prefix = format!("{}{}/", PREDICTIONS_PREFIX, escape_segment(folder));
        Ok(self
            .scan_docs::<Prediction>(&prefix)?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }

    pub fn put_job_progress(&self, progress: &JobProgress) -> BatwatchResult<()> {
        self.put_doc(&job_path(&progress.folder), progress)
    }

    pub fn get_job_progress(&self, folder: &str) -> BatwatchResult<Option<JobProgress>> {
        self.get_doc(&job_path(folder))
    }
}

//! CommandDispatcher: issues remote commands to servers and standalones by writing
//! the mode and status documents their device agents watch, and applies the status
//! reports those agents send back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BatwatchError, BatwatchResult};
use crate::models::{
    ActiveStatus, ActiveStatusRecord, ConnectionRecord, Mode, RecordStatus, ScheduledRecord,
    UnitKind, UnitState,
};
use crate::store::DashboardStore;

/// Operator command for a server or standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Connect,
    Locate,
    InstantRecord { duration_secs: u32 },
    ScheduleRecord { start: DateTime<Utc>, duration_secs: u32 },
    Transmit,
}

impl Command {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Connect => Mode::Connect,
            Self::Locate => Mode::Locate,
            Self::InstantRecord { .. } => Mode::Instant,
            Self::ScheduleRecord { .. } => Mode::Schedule,
            Self::Transmit => Mode::TransmitScheduled,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Refuse commands while any other server or standalone is busy.
    pub fleet_exclusive: bool,
    pub max_record_secs: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            fleet_exclusive: true,
            max_record_secs: 3600,
        }
    }
}

/// Writes commands into the store and enforces the busy rules.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: DashboardStore,
    policy: DispatchPolicy,
}

impl CommandDispatcher {
    pub fn new(store: DashboardStore, policy: DispatchPolicy) -> Self {
        Self { store, policy }
    }

    /// Issue `command` to `unit_id`. On success the unit is in the command's mode with
    /// a pending status, and the returned state reflects that.
    pub fn dispatch(
        &self,
        unit_id: &str,
        command: &Command,
        now: DateTime<Utc>,
    ) -> BatwatchResult<UnitState> {
        let unit = self.store.require_unit(unit_id)?;
        if !unit.info.kind.accepts_commands() {
            return Err(BatwatchError::Invalid(format!(
                "unit {} is a client; send commands to its server",
                unit_id
            )));
        }
        if unit.is_busy() {
            return Err(BatwatchError::Busy(unit_id.to_string()));
        }
        if self.policy.fleet_exclusive {
            if let Some(other) = self.store.list_units()?.into_iter().find(|u| {
                u.info.id != unit_id && u.info.kind.accepts_commands() && u.is_busy()
            }) {
                tracing::warn!(unit = %unit_id, busy = %other.info.id, "command refused, fleet busy");
                return Err(BatwatchError::Busy(other.info.id));
            }
        }

        match command {
            Command::InstantRecord { duration_secs } => {
                self.check_duration(*duration_secs)?;
            }
            Command::ScheduleRecord {
                start,
                duration_secs,
            } => {
                self.check_duration(*duration_secs)?;
                if *start <= now {
                    return Err(BatwatchError::Invalid(format!(
                        "scheduled start {} is not in the future",
                        start
                    )));
                }
                let clash = self
                    .store
                    .list_scheduled_records(unit_id)?
                    .into_iter()
                    .find(|r| !r.status.is_terminal() && r.overlaps(*start, *duration_secs));
                if let Some(existing) = clash {
                    return Err(BatwatchError::Conflict(format!(
                        "record at {} overlaps {}",
                        start,
                        existing.key()
                    )));
                }
                self.store.put_scheduled_record(
                    unit_id,
                    &ScheduledRecord {
                        start: *start,
                        duration_secs: *duration_secs,
                        status: RecordStatus::Scheduled,
                        updated_at: now,
                    },
                )?;
            }
            Command::Transmit => {
                let (kind, waiting) = self.ready_records(unit_id)?;
                if waiting == 0 {
                    return Err(BatwatchError::Invalid(format!(
                        "unit {} has no records {}",
                        unit_id,
                        RecordStatus::ready_status(kind)
                    )));
                }
                tracing::debug!(unit = %unit_id, waiting, "transmit requested");
            }
            Command::Connect | Command::Locate => {}
        }

        let mode = command.mode();
        self.store.set_mode(unit_id, mode)?;
        self.store.set_active_status(
            unit_id,
            &ActiveStatusRecord {
                status: ActiveStatus::Pending,
                message: None,
                updated_at: now,
            },
        )?;
        tracing::info!(unit = %unit_id, mode = mode.as_str(), "command dispatched");
        self.store.require_unit(unit_id)
    }

    fn check_duration(&self, duration_secs: u32) -> BatwatchResult<()> {
        if duration_secs == 0 || duration_secs > self.policy.max_record_secs {
            return Err(BatwatchError::Invalid(format!(
                "duration {}s outside 1..={}",
                duration_secs, self.policy.max_record_secs
            )));
        }
        Ok(())
    }

    /// Device report of command progress. Success and error put the unit back in idle mode.
    pub fn report_status(
        &self,
        unit_id: &str,
        status: ActiveStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> BatwatchResult<UnitState> {
        let unit = self.store.require_unit(unit_id)?;
        self.store.set_active_status(
            unit_id,
            &ActiveStatusRecord {
                status,
                message: message.clone(),
                updated_at: now,
            },
        )?;
        if status.is_terminal() || status == ActiveStatus::Idle {
            self.store.set_mode(unit_id, Mode::Idle)?;
        }
        match status {
            ActiveStatus::Error => tracing::warn!(
                unit = %unit_id,
                mode = unit.mode.as_str(),
                message = message.as_deref().unwrap_or(""),
                "command failed on device"
            ),
            _ => tracing::info!(unit = %unit_id, status = ?status, "status reported"),
        }
        self.store.require_unit(unit_id)
    }

    pub fn report_connection(
        &self,
        unit_id: &str,
        connected: bool,
        now: DateTime<Utc>,
    ) -> BatwatchResult<UnitState> {
        self.store.require_unit(unit_id)?;
        self.store.set_connection(
            unit_id,
            &ConnectionRecord {
                connected,
                updated_at: now,
            },
        )?;
        tracing::info!(unit = %unit_id, connected, "connection reported");
        self.store.require_unit(unit_id)
    }

    /// Device report of a scheduled record moving along its lifecycle.
    pub fn advance_record(
        &self,
        unit_id: &str,
        start: &DateTime<Utc>,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> BatwatchResult<ScheduledRecord> {
        self.store.update_record_status(unit_id, start, status, now)
    }

    /// Unit kind and the number of records waiting to be transmitted or uploaded.
    pub fn ready_records(&self, unit_id: &str) -> BatwatchResult<(UnitKind, usize)> {
        let unit = self.store.require_unit(unit_id)?;
        let ready = RecordStatus::ready_status(unit.info.kind);
        let n = self
            .store
            .list_scheduled_records(unit_id)?
            .iter()
            .filter(|r| r.status == ready)
            .count();
        Ok((unit.info.kind, n))
    }
}

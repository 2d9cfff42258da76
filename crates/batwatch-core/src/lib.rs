//! Batwatch: core library.
//! Recording units, remote commands, status badges and species predictions for the
//! bat-acoustic recording dashboard.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod pagination;
pub mod predict_api;
pub mod predictor;
pub mod status;
pub mod store;

pub use config::DashboardConfig;
pub use dispatcher::{Command, CommandDispatcher, DispatchPolicy};
pub use error::{BatwatchError, BatwatchResult};
pub use models::{
    ActiveStatus, GeoLocation, JobProgress, JobState, Mode, Prediction, RecordStatus,
    RecordingFile, ScheduledRecord, SpeciesScore, UnitInfo, UnitKind, UnitState,
};
pub use pagination::{paginate, Page};
pub use predict_api::{PredictApiClient, PredictionBackend, SpeciesImage};
pub use predictor::{CancelToken, PredictionReport, PredictionRunner};
pub use status::{derive_badge, record_badge, Badge, Tone};
pub use store::{DashboardStore, StoreEvent, Subscription};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

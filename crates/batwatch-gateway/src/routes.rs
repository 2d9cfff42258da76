//! HTTP surface of the gateway: unit registry, commands, device reports, recordings,
//! prediction jobs, the HTML dashboard and the SSE change feed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use batwatch_core::{
    derive_badge, models::parse_record_key, paginate, record_badge, ActiveStatus, Badge,
    BatwatchError, BatwatchResult, Command, CommandDispatcher, DashboardConfig, DashboardStore,
    GeoLocation, JobProgress, Page, Prediction, PredictApiClient, PredictionRunner, RecordStatus,
    RecordingFile, ScheduledRecord, StoreEvent, UnitInfo, UnitKind, UnitState,
};
use chrono::Utc;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::jobs::JobRegistry;
use crate::views;

pub struct AppState {
    pub config: DashboardConfig,
    pub store: DashboardStore,
    pub dispatcher: CommandDispatcher,
    pub api: PredictApiClient,
    pub jobs: JobRegistry<PredictApiClient>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: DashboardConfig, store: DashboardStore) -> BatwatchResult<Self> {
        let api = PredictApiClient::new(&config.predict_api_url, config.predict_timeout())?;
        let dispatcher = CommandDispatcher::new(store.clone(), config.dispatch_policy());
        let runner = PredictionRunner::new(
            Arc::new(api.clone()),
            store.clone(),
            config.prediction_top_k,
        );
        Ok(Self {
            config,
            store,
            dispatcher,
            api,
            jobs: JobRegistry::new(runner),
        })
    }

    fn unit_view(&self, state: UnitState) -> UnitView {
        let badge = derive_badge(&state, Utc::now(), self.config.revert_after());
        UnitView {
            busy: state.is_busy(),
            badge,
            state,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(dashboard_page))
        .route("/dashboard/units", get(dashboard_units))
        .route("/api/v1/units", get(list_units).post(add_unit))
        .route("/api/v1/units/:id", get(get_unit).delete(remove_unit))
        .route("/api/v1/units/:id/clients", get(list_clients))
        .route("/api/v1/units/:id/commands", post(dispatch_command))
        .route("/api/v1/units/:id/status", post(report_status))
        .route("/api/v1/units/:id/connection", post(report_connection))
        .route("/api/v1/units/:id/records", get(list_records))
        .route("/api/v1/units/:id/records/:start/status", post(advance_record))
        .route("/api/v1/folders", get(list_folders))
        .route("/api/v1/folders/:folder/files", get(list_files))
        .route(
            "/api/v1/folders/:folder/predict",
            get(prediction_progress)
                .post(start_prediction)
                .delete(cancel_prediction),
        )
        .route("/api/v1/folders/:folder/predictions", get(list_predictions))
        .route("/api/v1/species/:name/image", get(species_image))
        .route("/api/v1/backend/health", get(backend_health))
        .route("/events", get(events))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests))
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::info!(%method, %path, status = response.status().as_u16(), "request");
    response
}

async fn health() -> &'static str {
    "OK"
}

// ── dashboard ──────────────────────────────────────────────────────────────

async fn dashboard_page(State(state): State<SharedState>) -> Html<String> {
    Html(views::dashboard_page(&state.config.app_name))
}

async fn dashboard_units(State(state): State<SharedState>) -> ApiResult<Html<String>> {
    let units = state.store.list_units()?;
    Ok(Html(views::units_fragment(
        &units,
        Utc::now(),
        state.config.revert_after(),
    )))
}

// ── units ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UnitView {
    #[serde(flatten)]
    pub state: UnitState,
    pub busy: bool,
    pub badge: Badge,
}

#[derive(Debug, Deserialize)]
pub struct AddUnitRequest {
    pub id: String,
    pub kind: UnitKind,
    #[serde(default)]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub server_id: Option<String>,
}

async fn list_units(State(state): State<SharedState>) -> ApiResult<Json<Vec<UnitView>>> {
    let units = state.store.list_units()?;
    Ok(Json(units.into_iter().map(|u| state.unit_view(u)).collect()))
}

async fn add_unit(
    State(state): State<SharedState>,
    Json(body): Json<AddUnitRequest>,
) -> ApiResult<(StatusCode, Json<UnitView>)> {
    let info = UnitInfo {
        id: body.id.trim().to_string(),
        kind: body.kind,
        name: body.name.map(|n| n.trim().to_string()).unwrap_or_default(),
        location: GeoLocation {
            latitude: body.latitude,
            longitude: body.longitude,
        },
        server_id: body
            .server_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        created_at: Utc::now(),
    };
    state.store.add_unit(&info)?;
    let unit = state.store.require_unit(&info.id)?;
    Ok((StatusCode::CREATED, Json(state.unit_view(unit))))
}

async fn get_unit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UnitView>> {
    let unit = state.store.require_unit(&id)?;
    Ok(Json(state.unit_view(unit)))
}

async fn remove_unit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.remove_unit(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_clients(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<UnitView>>> {
    state.store.require_unit(&id)?;
    let clients = state.store.list_clients(&id)?;
    Ok(Json(clients.into_iter().map(|u| state.unit_view(u)).collect()))
}

// ── commands & device reports ───────────────────────────────────────────────

async fn dispatch_command(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(command): Json<Command>,
) -> ApiResult<Json<UnitView>> {
    let unit = state.dispatcher.dispatch(&id, &command, Utc::now())?;
    Ok(Json(state.unit_view(unit)))
}

#[derive(Debug, Deserialize)]
pub struct StatusReport {
    pub status: ActiveStatus,
    #[serde(default)]
    pub message: Option<String>,
}

async fn report_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(report): Json<StatusReport>,
) -> ApiResult<Json<UnitView>> {
    let unit = state
        .dispatcher
        .report_status(&id, report.status, report.message, Utc::now())?;
    Ok(Json(state.unit_view(unit)))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionReport {
    pub connected: bool,
}

async fn report_connection(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(report): Json<ConnectionReport>,
) -> ApiResult<Json<UnitView>> {
    let unit = state
        .dispatcher
        .report_connection(&id, report.connected, Utc::now())?;
    Ok(Json(state.unit_view(unit)))
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: ScheduledRecord,
    pub key: String,
    pub badge: Badge,
}

impl From<ScheduledRecord> for RecordView {
    fn from(record: ScheduledRecord) -> Self {
        Self {
            key: record.key(),
            badge: record_badge(record.status),
            record,
        }
    }
}

async fn list_records(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RecordView>>> {
    state.store.require_unit(&id)?;
    let records = state.store.list_scheduled_records(&id)?;
    Ok(Json(records.into_iter().map(RecordView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct RecordStatusReport {
    pub status: RecordStatus,
}

async fn advance_record(
    State(state): State<SharedState>,
    Path((id, start)): Path<(String, String)>,
    Json(report): Json<RecordStatusReport>,
) -> ApiResult<Json<RecordView>> {
    let start = parse_record_key(&start)?;
    let record = state
        .dispatcher
        .advance_record(&id, &start, report.status, Utc::now())?;
    Ok(Json(record.into()))
}

// ── recordings & predictions ────────────────────────────────────────────────

async fn list_folders(State(state): State<SharedState>) -> ApiResult<Json<serde_json::Value>> {
    let folders = state.api.list_folders().await?;
    Ok(Json(serde_json::json!({ "folders": folders })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FileRow {
    #[serde(flatten)]
    pub file: RecordingFile,
    pub is_audio: bool,
    pub prediction: Option<Prediction>,
}

async fn list_files(
    State(state): State<SharedState>,
    Path(folder): Path<String>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Page<FileRow>>> {
    use batwatch_core::PredictionBackend;

    let files = state.api.list_files(&folder).await?;
    let page = paginate(
        files,
        q.page.unwrap_or(1),
        q.per_page.unwrap_or(state.config.page_size),
        state.config.max_page_size,
    );
    let mut items = Vec::with_capacity(page.items.len());
    for file in page.items {
        let prediction = state.store.get_prediction(&folder, &file.name)?;
        items.push(FileRow {
            is_audio: file.is_audio(),
            file,
            prediction,
        });
    }
    Ok(Json(Page {
        items,
        page: page.page,
        per_page: page.per_page,
        total: page.total,
        total_pages: page.total_pages,
    }))
}

#[derive(Debug, Serialize)]
pub struct JobStatus {
    pub folder: String,
    pub running: bool,
    pub progress: Option<JobProgress>,
}

fn job_status(state: &AppState, folder: &str) -> BatwatchResult<JobStatus> {
    Ok(JobStatus {
        folder: folder.to_string(),
        running: state.jobs.is_running(folder),
        progress: state.store.get_job_progress(folder)?,
    })
}

async fn start_prediction(
    State(state): State<SharedState>,
    Path(folder): Path<String>,
) -> ApiResult<(StatusCode, Json<JobStatus>)> {
    if folder.trim().is_empty() {
        return Err(BatwatchError::Invalid("folder name is empty".into()).into());
    }
    let started = state.jobs.start(&folder);
    let code = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(job_status(&state, &folder)?)))
}

async fn cancel_prediction(
    State(state): State<SharedState>,
    Path(folder): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.jobs.cancel(&folder);
    Ok(Json(serde_json::json!({ "folder": folder, "cancelled": cancelled })))
}

async fn prediction_progress(
    State(state): State<SharedState>,
    Path(folder): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(job_status(&state, &folder)?))
}

async fn list_predictions(
    State(state): State<SharedState>,
    Path(folder): Path<String>,
) -> ApiResult<Json<Vec<Prediction>>> {
    Ok(Json(state.store.list_predictions(&folder)?))
}

async fn species_image(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let image = state.api.species_image(&name).await?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes).into_response())
}

async fn backend_health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let ok = match state.api.health().await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("prediction api health check failed: {}", e);
            false
        }
    };
    Json(serde_json::json!({ "url": state.api.base_url(), "ok": ok }))
}

// ── change feed ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub prefix: Option<String>,
}

async fn events(
    State(state): State<SharedState>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let prefix = q.prefix.unwrap_or_default();
    let mut sub = state.store.subscribe(&prefix);
    tracing::debug!(prefix = %prefix, "change feed subscribed");
    let stream = async_stream::stream! {
        while let Some(change) = sub.next().await {
            let data = match &change {
                StoreEvent::Put { value, .. } => {
                    serde_json::json!({ "path": change.path(), "value": value })
                }
                StoreEvent::Removed { .. } => serde_json::json!({ "path": change.path() }),
            };
            yield Ok(Event::default().event(change.kind()).data(data.to_string()));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tower::ServiceExt;

    fn state_for(predict_api_url: &str) -> SharedState {
        let config = DashboardConfig {
            predict_api_url: predict_api_url.into(),
            predict_timeout_secs: 5,
            ..Default::default()
        };
        let store = DashboardStore::open_temporary().unwrap();
        Arc::new(AppState::new(config, store).unwrap())
    }

    fn test_state() -> SharedState {
        state_for("http://127.0.0.1:9")
    }

    /// Local stand-in for the prediction API. Listing `slow` takes 300 ms.
    async fn spawn_predict_api() -> String {
        let api = Router::new()
            .route(
                "/folders/:folder/files",
                get(|Path(folder): Path<String>| async move {
                    if folder == "slow" {
                        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    }
                    Json(serde_json::json!({ "files": [
                        { "name": "a.wav" },
                        { "name": "b.wav" },
                        { "name": "notes.txt" }
                    ]}))
                }),
            )
            .route(
                "/predict",
                post(|| async {
                    Json(serde_json::json!({ "predictions": [
                        { "species": "Nyctalus noctula", "confidence": 0.6 }
                    ]}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, api).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = router(test_state());
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_server_then_command_then_report() {
        let app = router(test_state());

        let (code, unit) = send(
            &app,
            "POST",
            "/api/v1/units",
            Some(serde_json::json!({
                "id": "srv-1", "kind": "server", "name": "Orchard",
                "latitude": 51.75, "longitude": -1.25
            })),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(unit["info"]["id"], "srv-1");
        assert_eq!(unit["badge"]["label"], "Offline");

        let (code, _) = send(
            &app,
            "POST",
            "/api/v1/units",
            Some(serde_json::json!({
                "id": "srv-1", "kind": "server", "latitude": 0.0, "longitude": 0.0
            })),
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, unit) = send(
            &app,
            "POST",
            "/api/v1/units/srv-1/commands",
            Some(serde_json::json!({ "command": "instant_record", "duration_secs": 60 })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(unit["mode"], "instant");
        assert_eq!(unit["busy"], true);
        assert_eq!(unit["badge"]["label"], "Sending");

        let (code, body) = send(
            &app,
            "POST",
            "/api/v1/units/srv-1/commands",
            Some(serde_json::json!({ "command": "locate" })),
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("busy"));

        let (code, unit) = send(
            &app,
            "POST",
            "/api/v1/units/srv-1/status",
            Some(serde_json::json!({ "status": "success" })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(unit["mode"], "idle");
        assert_eq!(unit["badge"]["label"], "Success");
    }

    #[tokio::test]
    async fn schedule_and_advance_record() {
        let state = test_state();
        let app = router(Arc::clone(&state));
        send(
            &app,
            "POST",
            "/api/v1/units",
            Some(serde_json::json!({
                "id": "solo", "kind": "standalone", "latitude": 10.0, "longitude": 20.0
            })),
        )
        .await;

        let start = (Utc::now() + chrono::Duration::hours(1))
            .format(batwatch_core::models::RECORD_KEY_FORMAT)
            .to_string();
        let (code, _) = send(
            &app,
            "POST",
            "/api/v1/units/solo/commands",
            Some(serde_json::json!({
                "command": "schedule_record", "start": start, "duration_secs": 300
            })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);

        let (_, records) = send(&app, "GET", "/api/v1/units/solo/records", None).await;
        assert_eq!(records[0]["key"], start);
        assert_eq!(records[0]["status"], "scheduled");

        let uri = format!("/api/v1/units/solo/records/{}/status", start);
        let (code, _) = send(
            &app,
            "POST",
            &uri,
            Some(serde_json::json!({ "status": "uploading" })),
        )
        .await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);

        let (code, rec) = send(
            &app,
            "POST",
            &uri,
            Some(serde_json::json!({ "status": "recording" })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(rec["badge"]["label"], "Recording");
    }

    #[tokio::test]
    async fn client_removal_and_missing_units() {
        let app = router(test_state());
        send(
            &app,
            "POST",
            "/api/v1/units",
            Some(serde_json::json!({
                "id": "srv-1", "kind": "server", "latitude": 1.0, "longitude": 1.0
            })),
        )
        .await;
        let (code, _) = send(
            &app,
            "POST",
            "/api/v1/units",
            Some(serde_json::json!({
                "id": "cli-1", "kind": "client", "server_id": "srv-1",
                "latitude": 1.0, "longitude": 1.0
            })),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);

        let (_, clients) = send(&app, "GET", "/api/v1/units/srv-1/clients", None).await;
        assert_eq!(clients.as_array().unwrap().len(), 1);

        let (code, _) = send(&app, "DELETE", "/api/v1/units/srv-1", None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        let (code, _) = send(&app, "GET", "/api/v1/units/cli-1", None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let app = router(test_state());
        let (code, body) = send(&app, "GET", "/api/v1/folders", None).await;
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());

        let (code, body) = send(&app, "GET", "/api/v1/backend/health", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn cancelling_idle_folder_reports_nothing_running() {
        let app = router(test_state());
        let (code, body) = send(&app, "DELETE", "/api/v1/folders/night-01/predict", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["cancelled"], false);

        let (_, body) = send(&app, "GET", "/api/v1/folders/night-01/predict", None).await;
        assert_eq!(body["running"], false);
        assert!(body["progress"].is_null());
    }

    #[tokio::test]
    async fn dashboard_fragment_renders() {
        let app = router(test_state());
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/dashboard/units")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("No recording units registered."));
    }

    #[tokio::test]
    async fn repeated_predict_start_reports_the_running_job() {
        let state = state_for(&spawn_predict_api().await);
        let app = router(Arc::clone(&state));

        let (code, first) = send(&app, "POST", "/api/v1/folders/slow/predict", None).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(first["running"], true);

        let (code, second) = send(&app, "POST", "/api/v1/folders/slow/predict", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(second["folder"], "slow");
        assert_eq!(second["running"], true);

        let (_, status) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let (code, body) = send(&app, "GET", "/api/v1/folders/slow/predict", None).await;
                if body["running"] == false {
                    return (code, body);
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job completes");
        assert_eq!(status["progress"]["state"], "completed");
        assert_eq!(status["progress"]["total"], 2);

        let (_, predictions) = send(&app, "GET", "/api/v1/folders/slow/predictions", None).await;
        assert_eq!(predictions.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn folder_files_merge_cached_predictions_and_paginate() {
        let state = state_for(&spawn_predict_api().await);
        state
            .store
            .put_prediction(&Prediction {
                folder: "night-01".into(),
                file: "a.wav".into(),
                species: vec![batwatch_core::SpeciesScore {
                    species: "Plecotus auritus".into(),
                    confidence: 0.9,
                }],
                predicted_at: Utc::now(),
            })
            .unwrap();
        let app = router(state);

        let (code, page) = send(
            &app,
            "GET",
            "/api/v1/folders/night-01/files?page=1&per_page=2",
            None,
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["total_pages"], 2);
        let items = page["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "a.wav");
        assert_eq!(
            items[0]["prediction"]["species"][0]["species"],
            "Plecotus auritus"
        );
        assert!(items[1]["prediction"].is_null());

        let (_, page) = send(
            &app,
            "GET",
            "/api/v1/folders/night-01/files?page=2&per_page=2",
            None,
        )
        .await;
        assert_eq!(page["items"][0]["name"], "notes.txt");
        assert_eq!(page["items"][0]["is_audio"], false);
    }

    #[tokio::test]
    async fn change_feed_streams_puts_and_removals() {
        use futures_util::StreamExt;

        let state = test_state();
        let app = router(Arc::clone(&state));
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/events?prefix=units/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        state
            .store
            .add_unit(&UnitInfo {
                id: "solo".into(),
                kind: UnitKind::Standalone,
                name: String::new(),
                location: GeoLocation {
                    latitude: 0.0,
                    longitude: 0.0,
                },
                server_id: None,
                created_at: Utc::now(),
            })
            .unwrap();
        state.store.remove_unit("solo").unwrap();

        let mut body = res.into_body().into_data_stream();
        let mut text = String::new();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !text.contains("event: removed") {
                let chunk = body.next().await.expect("feed open").unwrap();
                text.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .expect("removal streamed");

        assert!(text.contains("event: put"));
        assert!(text.contains(r#""path":"units/solo/info""#));
        let put = text.find("event: put").unwrap();
        let removed = text.find("event: removed").unwrap();
        assert!(put < removed);
    }
}

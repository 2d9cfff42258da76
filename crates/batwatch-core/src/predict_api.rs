//! Prediction API bridge: reqwest client for the external service that owns the
//! recordings, renders spectrograms and classifies species.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BatwatchError, BatwatchResult};
use crate::models::{RecordingFile, SpeciesScore};

/// The part of the prediction API the prediction runner depends on.
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    async fn list_files(&self, folder: &str) -> BatwatchResult<Vec<RecordingFile>>;

    async fn predict(&self, folder: &str, file: &str) -> BatwatchResult<Vec<SpeciesScore>>;
}

#[derive(Debug, Deserialize)]
struct FoldersResponse {
    #[serde(default)]
    folders: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<RecordingFile>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    folder: &'a str,
    file: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<SpeciesScore>,
}

/// Reference image of a species as returned by the API.
#[derive(Debug, Clone)]
pub struct SpeciesImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct PredictApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl PredictApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> BatwatchResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> BatwatchResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| BatwatchError::Invalid(format!("prediction api url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BatwatchError::Invalid("prediction api url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(res: reqwest::Response) -> BatwatchResult<reqwest::Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(BatwatchError::Api(status.as_u16(), body))
    }

    /// True when the service answers its health endpoint with a 2xx.
    pub async fn health(&self) -> BatwatchResult<bool> {
        let res = self.client.get(self.url(&["health"])?).send().await?;
        Ok(res.status().is_success())
    }

    pub async fn list_folders(&self) -> BatwatchResult<Vec<String>> {
        let res = self.client.get(self.url(&["folders"])?).send().await?;
        let parsed: FoldersResponse = Self::check(res).await?.json().await?;
        Ok(parsed.folders)
    }

    pub async fn species_image(&self, species: &str) -> BatwatchResult<SpeciesImage> {
        let res = self
            .client
            .get(self.url(&["species", species, "image"])?)
            .send()
            .await?;
        let res = Self::check(res).await?;
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = res.bytes().await?.to_vec();
        Ok(SpeciesImage {
            content_type,
            bytes,
        })
    }
}

#[async_trait]
impl PredictionBackend for PredictApiClient {
    async fn list_files(&self, folder: &str) -> BatwatchResult<Vec<RecordingFile>> {
        let res = self
            .client
            .get(self.url(&["folders", folder, "files"])?)
            .send()
            .await?;
        let parsed: FilesResponse = Self::check(res).await?.json().await?;
        Ok(parsed.files)
    }

    async fn predict(&self, folder: &str, file: &str) -> BatwatchResult<Vec<SpeciesScore>> {
        tracing::debug!(folder, file, "requesting prediction");
        let res = self
            .client
            .post(self.url(&["predict"])?)
            .json(&PredictRequest { folder, file })
            .send()
            .await?;
        let parsed: PredictResponse = Self::check(res).await?.json().await?;
        Ok(parsed.predictions)
    }
}

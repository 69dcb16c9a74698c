//! HTTP client for a classification gateway.
//!
//! The gateway fronts the remote compute platform and exposes:
//! - `GET  /catalog?source=..&start=..&end=..&min_x=..` tile coverage
//! - `POST /composites` lazy composite construction
//! - `POST /samples` stratified training samples
//! - `POST /jobs` classification + export submission
//! - `GET  /jobs/{id}` job state

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    ClassificationService, Composite, ExportTarget, JobHandle, RemoteState, TrainingSample,
};
use crate::error::ServiceError;
use crate::source::{DateWindow, Region, SourceKind, Tile, TileKey, TrainingLabels};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Classification service reached over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpClassificationService {
    api_base: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpClassificationService {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http_client: Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Reads `CLASSIFIER_API_BASE` (required) and `CLASSIFIER_API_KEY`.
    pub fn from_env() -> Result<Self, ServiceError> {
        let api_base = env::var("CLASSIFIER_API_BASE").map_err(|_| ServiceError::MissingApiBase)?;
        let api_key = env::var("CLASSIFIER_API_KEY").ok();
        Ok(Self::new(api_base, api_key))
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let request = self.authorized(self.http_client.get(&url).query(query));
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::RequestFailed(e.to_string()))?;
        decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let request = self.authorized(self.http_client.post(&url).json(body));
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::RequestFailed(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        let message = serde_json::from_str::<ApiErrorResponse>(&message)
            .map(|e| e.error)
            .unwrap_or(message);
        if code == 429 {
            return Err(ServiceError::RateLimited(message));
        }
        return Err(ServiceError::ApiError { code, message });
    }
    response
        .json()
        .await
        .map_err(|e| ServiceError::ParseError(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    tiles: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CompositeRequest<'a> {
    tile: &'a Tile,
    window: &'a DateWindow,
    cloud_cover: f64,
}

#[derive(Debug, Deserialize)]
struct CompositeResponse {
    reference: String,
    footprint_area: f64,
    scene_count: usize,
}

#[derive(Debug, Serialize)]
struct SampleRequest<'a> {
    composite: &'a str,
    labels: &'a TrainingLabels,
    consecutive_years: Vec<i32>,
    alternate_years: Vec<i32>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    composite: &'a str,
    sample: &'a str,
    export: &'a ExportTarget,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[async_trait]
impl ClassificationService for HttpClassificationService {
    async fn available_tiles(
        &self,
        source: SourceKind,
        region: &Region,
        window: &DateWindow,
    ) -> Result<Vec<TileKey>, ServiceError> {
        let bbox = region.bbox;
        let query = [
            ("source", source.to_string()),
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
            ("min_x", bbox.min_x.to_string()),
            ("min_y", bbox.min_y.to_string()),
            ("max_x", bbox.max_x.to_string()),
            ("max_y", bbox.max_y.to_string()),
        ];
        let response: CatalogResponse = self.get_json("/catalog", &query).await?;
        response
            .tiles
            .iter()
            .map(|t| t.parse::<TileKey>().map_err(ServiceError::ParseError))
            .collect()
    }

    async fn composite(
        &self,
        tile: &Tile,
        window: &DateWindow,
        cloud_cover: f64,
    ) -> Result<Composite, ServiceError> {
        let body = CompositeRequest {
            tile,
            window,
            cloud_cover,
        };
        let response: CompositeResponse = self.post_json("/composites", &body).await?;
        Ok(Composite {
            tile: tile.clone(),
            reference: response.reference,
            footprint_area: response.footprint_area,
            scene_count: response.scene_count,
        })
    }

    async fn training_sample(
        &self,
        composite: &Composite,
        labels: &TrainingLabels,
    ) -> Result<TrainingSample, ServiceError> {
        let body = SampleRequest {
            composite: &composite.reference,
            labels,
            consecutive_years: labels.consecutive_years(),
            alternate_years: labels.alternate_years(),
        };
        self.post_json("/samples", &body).await
    }

    async fn submit(
        &self,
        composite: &Composite,
        sample: &TrainingSample,
        target: &ExportTarget,
    ) -> Result<JobHandle, ServiceError> {
        let body = SubmitRequest {
            composite: &composite.reference,
            sample: &sample.reference,
            export: target,
        };
        let response: SubmitResponse = self.post_json("/jobs", &body).await?;
        Ok(JobHandle::new(response.id))
    }

    async fn status(&self, handle: &JobHandle) -> Result<RemoteState, ServiceError> {
        self.get_json(&format!("/jobs/{}", handle.as_str()), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let service = HttpClassificationService::new("https://gateway.local/api/", None);
        assert_eq!(service.api_base(), "https://gateway.local/api");
    }

    #[test]
    fn test_sample_wire_format() {
        let json = r#"{"reference":"fc/1","class_counts":{"1":40,"5":60}}"#;
        let sample: TrainingSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.total(), 100);
        assert!(sample.is_usable());
    }
}

//! HTTP implementation of the backend contracts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::item::{ItemKind, ItemStatus, Stage, StageStatus, TransientStatus, WorkItem};
use crate::metrics;

use super::sse::{SseDecoder, SseFrame};
use super::{
    BackendError, CatalogPage, EventStream, InitiateRequest, InitiateResponse, PipelineBackend,
    RawEvent, RepairResponse, WorkCatalog,
};

/// Catalog record as served by the backend.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogRecord {
    id: String,
    #[serde(default)]
    is_upload: Option<bool>,
    #[serde(default)]
    status: ItemStatus,
    #[serde(default)]
    transient_status: Option<TransientStatus>,
    #[serde(default)]
    stages: Vec<String>,
    #[serde(default)]
    analysis_complete: bool,
    #[serde(default)]
    persistent_id: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    last_message: Option<String>,
}

impl From<CatalogRecord> for WorkItem {
    fn from(record: CatalogRecord) -> Self {
        let kind = ItemKind::infer(&record.id, record.is_upload);
        let mut stages: Vec<Stage> = record
            .stages
            .iter()
            .filter_map(|tag| Stage::from_tag(tag))
            .collect();
        stages.sort();
        stages.dedup();

        WorkItem {
            id: record.id,
            kind,
            status: record.status,
            transient_status: record.transient_status,
            stages,
            analysis_complete: record.analysis_complete,
            persistent_id: record.persistent_id,
            updated_at: record.updated_at.unwrap_or_else(Utc::now),
            source_url: record.source_url,
            page_count: record.page_count,
            last_message: record.last_message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogResponse {
    #[serde(default)]
    items: Vec<CatalogRecord>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct BrokenResponse {
    #[serde(default)]
    broken: bool,
}

#[derive(Debug, Deserialize)]
struct FindBrokenResponse {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepairRequest {
    force_update: bool,
}

/// Backend client speaking JSON over HTTP plus Server-Sent Events.
pub struct HttpBackend {
    client: Client,
    /// No overall request timeout; push-streams stay open for minutes.
    stream_client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Create a new backend client.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs as u64);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                BackendError::ConnectionFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        let stream_client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                BackendError::ConnectionFailed(format!("Failed to create stream client: {}", e))
            })?;

        Ok(Self {
            client,
            stream_client,
            config,
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn item_url(&self, item_id: &str, suffix: &str) -> String {
        format!(
            "{}/api/items/{}{}",
            self.base_url(),
            urlencoding::encode(item_id),
            suffix
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: &str,
    ) -> Result<T, BackendError> {
        let started = Instant::now();
        let result = match self.client.get(url).send().await {
            Ok(response) => read_json(response).await,
            Err(e) => Err(map_request_error(e)),
        };
        metrics::record_backend_request(
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let started = Instant::now();
        let result = match self.client.post(url).json(body).send().await {
            Ok(response) => read_json(response).await,
            Err(e) => Err(map_request_error(e)),
        };
        metrics::record_backend_request(
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }
}

/// Map a transport error to a backend error.
fn map_request_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_decode() {
        BackendError::InvalidResponse(e.to_string())
    } else {
        BackendError::ConnectionFailed(e.to_string())
    }
}

/// Check the status code and decode the JSON body.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(response.url().path().to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Http {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }

    let body = response.text().await.map_err(map_request_error)?;
    serde_json::from_str(&body).map_err(|e| {
        BackendError::InvalidResponse(format!(
            "{}: {}",
            e,
            body.chars().take(100).collect::<String>()
        ))
    })
}

/// Turn an SSE response body into a stream of raw events.
fn sse_events(response: Response) -> EventStream {
    let bytes = Box::pin(response.bytes_stream());
    let state = (bytes, SseDecoder::new(), VecDeque::new(), false);

    let stream = futures::stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        pending.extend(decoder.feed(&chunk).into_iter().map(SseFrame::into_raw_event));
                    }
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err::<RawEvent, _>(BackendError::Stream(e.to_string())));
                    }
                    None => {
                        done = true;
                        if decoder.finish() {
                            debug!("Stream ended mid-frame, partial event dropped");
                        }
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

#[async_trait]
impl PipelineBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn status_check(
        &self,
        item_id: &str,
        kind: ItemKind,
    ) -> Result<StageStatus, BackendError> {
        let url = self.item_url(item_id, &format!("/status?kind={}", kind.as_str()));
        match self.get_json::<StageStatus>("status_check", &url).await {
            Err(BackendError::NotFound(_)) => {
                debug!(item_id = item_id, "Item unknown to backend, nothing done yet");
                Ok(StageStatus::default())
            }
            other => other,
        }
    }

    async fn is_broken(&self, item_id: &str) -> Result<bool, BackendError> {
        let url = self.item_url(item_id, "/broken");
        let response: BrokenResponse = self.get_json("is_broken", &url).await?;
        Ok(response.broken)
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, BackendError> {
        let url = self.item_url(&request.item_id, "/process");
        self.post_json("initiate", &url, request).await
    }

    async fn stream_processing(
        &self,
        item_id: &str,
        kind: ItemKind,
    ) -> Result<EventStream, BackendError> {
        let url = self.item_url(
            item_id,
            &format!("/process/stream?kind={}", kind.as_str()),
        );
        let started = Instant::now();

        let response = self
            .stream_client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_request_error);

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let status = response.status();
                warn!(item_id = item_id, "Push-stream rejected: HTTP {}", status);
                metrics::record_backend_request(
                    "stream_processing",
                    false,
                    started.elapsed().as_secs_f64(),
                );
                return Err(BackendError::Http {
                    status: status.as_u16(),
                    message: "push-stream rejected".to_string(),
                });
            }
            Err(e) => {
                metrics::record_backend_request(
                    "stream_processing",
                    false,
                    started.elapsed().as_secs_f64(),
                );
                return Err(e);
            }
        };

        metrics::record_backend_request(
            "stream_processing",
            true,
            started.elapsed().as_secs_f64(),
        );
        debug!(item_id = item_id, "Push-stream opened");
        Ok(sse_events(response))
    }

    async fn repair(
        &self,
        item_id: &str,
        force_update: bool,
    ) -> Result<RepairResponse, BackendError> {
        let url = self.item_url(item_id, "/repair");
        self.post_json("repair", &url, &RepairRequest { force_update })
            .await
    }

    async fn find_broken(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/items/broken", self.base_url());
        let response: FindBrokenResponse = self.get_json("find_broken", &url).await?;
        Ok(response.ids)
    }
}

#[async_trait]
impl WorkCatalog for HttpBackend {
    async fn page(&self, page: u32, page_size: u32) -> Result<CatalogPage, BackendError> {
        let url = format!(
            "{}/api/items?page={}&page_size={}",
            self.base_url(),
            page,
            page_size
        );
        let response: CatalogResponse = self.get_json("catalog_page", &url).await?;
        Ok(CatalogPage {
            items: response.items.into_iter().map(WorkItem::from).collect(),
            total_pages: response.total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(BackendConfig::new(base_url)).unwrap()
    }

    #[test]
    fn test_item_url_encodes_id() {
        let backend = backend("http://localhost:3000/");
        assert_eq!(
            backend.item_url("doc 1/2", "/status"),
            "http://localhost:3000/api/items/doc%201%2F2/status"
        );
    }

    #[test]
    fn test_catalog_record_conversion() {
        let json = r#"{
            "id": "upload-7",
            "status": "ready",
            "stages": ["folder", "analysis", "thumbnails", "folder"],
            "analysisComplete": true,
            "pageCount": 0
        }"#;
        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        let item = WorkItem::from(record);
        assert_eq!(item.kind, ItemKind::Upload);
        assert_eq!(item.status, ItemStatus::Ready);
        assert_eq!(item.stages, vec![Stage::Folder, Stage::Analysis]);
        assert_eq!(item.page_count, Some(0));
        assert!(item.transient_status.is_none());
    }

    #[test]
    fn test_catalog_record_explicit_kind_flag() {
        let json = r#"{"id": "upload-7", "isUpload": false}"#;
        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(WorkItem::from(record).kind, ItemKind::Document);
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_connection_error() {
        let backend = HttpBackend::new(BackendConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            connect_timeout_secs: 1,
        })
        .unwrap();
        let err = backend.is_broken("doc-1").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::ConnectionFailed(_) | BackendError::Timeout
        ));
    }
}

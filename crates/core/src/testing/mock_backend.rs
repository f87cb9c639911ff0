//! Mock pipeline backend for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::backend::{
    BackendError, EventStream, InitiateRequest, InitiateResponse, PipelineBackend, RawEvent,
    RepairResponse,
};
use crate::item::{ItemKind, StageStatus};

/// One scripted step of a push-stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    /// Yield an event.
    Event(RawEvent),
    /// Yield a transport error.
    Error(BackendError),
    /// Wait before the next step.
    Delay(Duration),
    /// Never yield again (until the stream is dropped).
    Hang,
}

impl StreamStep {
    pub fn event(event: RawEvent) -> Self {
        StreamStep::Event(event)
    }

    pub fn delay_ms(ms: u64) -> Self {
        StreamStep::Delay(Duration::from_millis(ms))
    }

    pub fn error(error: BackendError) -> Self {
        StreamStep::Error(error)
    }
}

/// A recorded backend call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Operation name, e.g. `"initiate"`.
    pub operation: &'static str,
    pub item_id: Option<String>,
    /// When the call was made.
    pub at: Instant,
}

/// Current and peak number of concurrent operations of one kind.
#[derive(Debug, Clone, Default)]
struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            current: Arc::clone(&self.current),
        }
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the PipelineBackend trait.
///
/// Provides controllable behavior for testing:
/// - Scripted stage status, initiate, stream and repair responses per item
/// - Per-operation delays and one-shot failures
/// - Recorded calls and concurrency high-water marks
///
/// Unscripted items report nothing done, accept initiation with
/// `processing`, stream a single `complete` event and repair successfully.
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockBackend::new();
///
/// backend.set_stream("doc-1", vec![
///     StreamStep::event(RawEvent::new("processing", json!({"progress": 50}))),
///     StreamStep::delay_ms(20),
///     StreamStep::event(RawEvent::new("complete", json!({"persistentId": "X"}))),
/// ]).await;
///
/// processor.process(&WorkItem::new("doc-1")).await?;
/// assert_eq!(backend.call_count("initiate").await, 1);
/// ```
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Status responses by item; the last one repeats.
    statuses: Arc<RwLock<HashMap<String, VecDeque<StageStatus>>>>,
    broken: Arc<RwLock<HashMap<String, bool>>>,
    initiate_responses: Arc<RwLock<HashMap<String, InitiateResponse>>>,
    streams: Arc<RwLock<HashMap<String, Vec<StreamStep>>>>,
    default_stream: Arc<RwLock<Option<Vec<StreamStep>>>>,
    repair_responses: Arc<RwLock<HashMap<String, RepairResponse>>>,
    /// Artificial latency per operation.
    delays: Arc<RwLock<HashMap<&'static str, Duration>>>,
    /// If set, the next call of that operation fails with this error.
    next_errors: Arc<RwLock<HashMap<&'static str, BackendError>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    initiate_requests: Arc<RwLock<Vec<InitiateRequest>>>,
    streams_in_flight: InFlight,
    repairs_in_flight: InFlight,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status reported for an item.
    pub async fn set_status(&self, item_id: &str, status: StageStatus) {
        self.set_statuses(item_id, vec![status]).await;
    }

    /// Set successive status responses for an item; the last one repeats.
    pub async fn set_statuses(&self, item_id: &str, statuses: Vec<StageStatus>) {
        self.statuses
            .write()
            .await
            .insert(item_id.to_string(), statuses.into());
    }

    pub async fn set_broken(&self, item_id: &str, broken: bool) {
        self.broken.write().await.insert(item_id.to_string(), broken);
    }

    /// Set the initiate response for an item.
    pub async fn set_initiate_status(&self, item_id: &str, status: &str, persistent_id: Option<&str>) {
        self.initiate_responses.write().await.insert(
            item_id.to_string(),
            InitiateResponse {
                status: status.to_string(),
                message: format!("Backend says {}", status),
                steps: Vec::new(),
                persistent_id: persistent_id.map(str::to_string),
            },
        );
    }

    /// Script the push-stream for an item. The stream ends after the last step.
    pub async fn set_stream(&self, item_id: &str, steps: Vec<StreamStep>) {
        self.streams.write().await.insert(item_id.to_string(), steps);
    }

    /// Script the push-stream for every item without its own script.
    pub async fn set_default_stream(&self, steps: Vec<StreamStep>) {
        *self.default_stream.write().await = Some(steps);
    }

    pub async fn set_repair_response(&self, item_id: &str, response: RepairResponse) {
        self.repair_responses
            .write()
            .await
            .insert(item_id.to_string(), response);
    }

    /// Delay every call of an operation.
    pub async fn set_delay(&self, operation: &'static str, delay: Duration) {
        self.delays.write().await.insert(operation, delay);
    }

    /// Make the next call of an operation fail.
    pub async fn fail_next(&self, operation: &'static str, error: BackendError) {
        self.next_errors.write().await.insert(operation, error);
    }

    /// All recorded calls, oldest first.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Recorded calls of one operation, oldest first.
    pub async fn calls_for(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls_for(operation).await.len()
    }

    /// Bodies of every initiate call.
    pub async fn initiate_requests(&self) -> Vec<InitiateRequest> {
        self.initiate_requests.read().await.clone()
    }

    /// Push-streams currently open.
    pub fn open_streams(&self) -> usize {
        self.streams_in_flight.current()
    }

    /// Most push-streams ever open at once.
    pub fn peak_streams(&self) -> usize {
        self.streams_in_flight.peak()
    }

    /// Most repair calls ever in flight at once.
    pub fn peak_repairs(&self) -> usize {
        self.repairs_in_flight.peak()
    }

    async fn record(&self, operation: &'static str, item_id: Option<&str>) {
        self.calls.write().await.push(RecordedCall {
            operation,
            item_id: item_id.map(str::to_string),
            at: Instant::now(),
        });
    }

    /// Apply the configured delay, then any pending failure.
    async fn enter(&self, operation: &'static str, item_id: Option<&str>) -> Result<(), BackendError> {
        self.record(operation, item_id).await;

        let delay = self.delays.read().await.get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_errors.write().await.remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PipelineBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn status_check(&self, item_id: &str, _kind: ItemKind) -> Result<StageStatus, BackendError> {
        self.enter("status_check", Some(item_id)).await?;

        let mut statuses = self.statuses.write().await;
        let status = match statuses.get_mut(item_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => StageStatus::default(),
        };
        Ok(status)
    }

    async fn is_broken(&self, item_id: &str) -> Result<bool, BackendError> {
        self.enter("is_broken", Some(item_id)).await?;
        Ok(self.broken.read().await.get(item_id).copied().unwrap_or(false))
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, BackendError> {
        self.enter("initiate", Some(&request.item_id)).await?;
        self.initiate_requests.write().await.push(request.clone());

        let response = self.initiate_responses.read().await.get(&request.item_id).cloned();
        Ok(response.unwrap_or_else(|| InitiateResponse {
            status: "processing".to_string(),
            message: "Processing started".to_string(),
            steps: request.steps.clone(),
            persistent_id: None,
        }))
    }

    async fn stream_processing(&self, item_id: &str, _kind: ItemKind) -> Result<EventStream, BackendError> {
        self.enter("stream_processing", Some(item_id)).await?;

        let scripted = self.streams.read().await.get(item_id).cloned();
        let steps = match scripted {
            Some(steps) => steps,
            None => self
                .default_stream
                .read()
                .await
                .clone()
                .unwrap_or_else(|| vec![StreamStep::Event(RawEvent::new("complete", json!({})))]),
        };

        let guard = self.streams_in_flight.enter();
        let stream = futures::stream::unfold(
            (VecDeque::from(steps), guard),
            |(mut steps, guard)| async move {
                loop {
                    match steps.pop_front()? {
                        StreamStep::Event(event) => return Some((Ok(event), (steps, guard))),
                        StreamStep::Error(error) => return Some((Err(error), (steps, guard))),
                        StreamStep::Delay(delay) => tokio::time::sleep(delay).await,
                        StreamStep::Hang => std::future::pending::<()>().await,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn repair(&self, item_id: &str, _force_update: bool) -> Result<RepairResponse, BackendError> {
        let _guard = self.repairs_in_flight.enter();
        self.enter("repair", Some(item_id)).await?;

        let response = self.repair_responses.read().await.get(item_id).cloned();
        Ok(response.unwrap_or_else(|| RepairResponse {
            status: "success".to_string(),
            message: "Repaired".to_string(),
            persistent_id: Some(format!("tx-{}", item_id)),
        }))
    }

    async fn find_broken(&self) -> Result<Vec<String>, BackendError> {
        self.enter("find_broken", None).await?;

        let mut ids: Vec<String> = self
            .broken
            .read()
            .await
            .iter()
            .filter(|(_, broken)| **broken)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

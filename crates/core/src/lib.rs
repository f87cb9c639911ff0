pub mod backend;
pub mod cancel;
pub mod config;
pub mod events;
pub mod item;
pub mod metrics;
pub mod probe;
pub mod processor;
pub mod repair;
pub mod scheduler;
pub mod testing;

pub use backend::{
    BackendError, CatalogPage, EventStream, HttpBackend, InitiateRequest, InitiateResponse,
    PipelineBackend, RawEvent, RepairResponse, StreamEventType, WorkCatalog,
};
pub use cancel::{ActiveCounter, CancellationController, ConnectionHandle, ConnectionRegistry};
pub use config::{
    load_config, load_config_from_str, validate_config, BackendConfig, CancellationConfig,
    Config, ConfigError, EventsConfig,
};
pub use events::{EventEnvelope, EventHandle, OrchestratorEvent, ProgressCounters};
pub use item::{
    IdentifierMap, ItemKind, ItemStatus, ProcessingUpdate, Stage, StageStatus, TransientStatus,
    UpdateType, WorkItem,
};
pub use probe::StatusProbe;
pub use processor::{
    classify, CompletionSource, FallbackPolicy, ItemProcessor, ProcessError, ProcessorConfig,
    ProcessorState, RunOutcome, Signal,
};
pub use repair::{RepairConfig, RepairError, RepairOutcome, RepairScheduler, RepairSummary, Repairer};
pub use scheduler::{
    Candidate, ConcurrentScheduler, RunSummary, SchedulerConfig, SchedulerError, SchedulerStatus,
};

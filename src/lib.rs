pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod store;
pub mod sync;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, BackendFactory, BackendKind, CaptureEngine,
    CaptureEngineConfig, ChunkRecorder, DeviceWatcher,
};
pub use config::Config;
pub use error::{CaptureError, SyncError, SyncFailureCategory};
pub use http::{create_router, AppState};
pub use lifecycle::{Recorder, RecorderConfig, RecorderState, StartOptions, StateSignal};
pub use store::{
    Chunk, JsonStore, LifecycleSnapshot, MeetingStore, MemoryStore, Note, Recording,
    RecordingStatus, SourceKind,
};
pub use sync::{BackoffPolicy, NatsProcessor, RemoteProcessor, SyncEngine, SyncOutcome};

//! Background synchronization: reassembles persisted chunks and submits
//! them to the remote processing service with retry and backoff.

mod backoff;
mod orchestrator;
mod remote;

pub use backoff::{retry_with_backoff, BackoffPolicy};
pub use orchestrator::{assemble_request, SyncEngine, SyncOutcome, SyncReport};
pub use remote::{NatsProcessor, ProcessOutcome, ProcessRequest, RemoteProcessor, SourcePayload};

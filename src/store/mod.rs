//! Local durable storage for recordings, chunks, notes and the lifecycle
//! snapshot.
//!
//! The store is the single shared mutable resource between the recorder and
//! the sync engine. All operations are atomic per record and durable on
//! return; status changes go through a compare-and-set transition so the two
//! writers cannot lose updates to each other.

mod json;
mod memory;
mod types;

pub use json::JsonStore;
pub use memory::MemoryStore;
pub use types::{
    Chunk, LifecycleSnapshot, Note, Recording, RecordingPatch, RecordingStatus, SourceKind,
};

use anyhow::Result;

#[async_trait::async_trait]
pub trait MeetingStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Recording>>;

    async fn put(&self, recording: Recording) -> Result<()>;

    /// Apply a metadata patch. Status is not part of the patch.
    async fn update_meta(&self, id: &str, patch: RecordingPatch) -> Result<()>;

    /// Compare-and-set status transition. Succeeds (returns `true`) only if
    /// the current status is one of `from` and the move to `to` is a legal
    /// transition; otherwise the record is untouched and `false` is returned.
    async fn transition_status(
        &self,
        id: &str,
        from: &[RecordingStatus],
        to: RecordingStatus,
    ) -> Result<bool>;

    /// Delete a recording, cascading to its chunks and note.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn query_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>>;

    async fn list_recordings(&self) -> Result<Vec<Recording>>;

    /// Append-only chunk insertion.
    async fn add_chunk(&self, chunk: Chunk) -> Result<()>;

    /// All chunks of a recording, ordered by source then index.
    async fn query_chunks(&self, recording_id: &str) -> Result<Vec<Chunk>>;

    /// Delete audio only; the recording and its note stay.
    async fn delete_chunks(&self, recording_id: &str) -> Result<()>;

    /// Replace the note for a recording as a whole record.
    async fn put_note(&self, note: Note) -> Result<()>;

    async fn get_note(&self, recording_id: &str) -> Result<Option<Note>>;

    /// The lifecycle snapshot lives under one well-known key.
    async fn save_snapshot(&self, snapshot: &LifecycleSnapshot) -> Result<()>;

    async fn load_snapshot(&self) -> Result<Option<LifecycleSnapshot>>;

    async fn clear_snapshot(&self) -> Result<()>;
}

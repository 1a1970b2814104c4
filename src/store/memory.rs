use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use super::types::{
    Chunk, LifecycleSnapshot, Note, Recording, RecordingPatch, RecordingStatus,
};
use super::MeetingStore;

/// In-memory store, used by tests and embedders that bring their own
/// persistence. Implements the same atomicity contract as the durable store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    recordings: HashMap<String, Recording>,
    chunks: HashMap<String, Vec<Chunk>>,
    notes: HashMap<String, Note>,
    snapshot: Option<LifecycleSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MeetingStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Recording>> {
        let inner = self.inner.lock().await;
        Ok(inner.recordings.get(id).cloned())
    }

    async fn put(&self, recording: Recording) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.recordings.insert(recording.id.clone(), recording);
        Ok(())
    }

    async fn update_meta(&self, id: &str, patch: RecordingPatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let rec = inner
            .recordings
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("recording not found: {}", id))?;
        patch.apply(rec);
        Ok(())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: &[RecordingStatus],
        to: RecordingStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let rec = inner
            .recordings
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("recording not found: {}", id))?;

        if !from.contains(&rec.status) || !rec.status.can_transition_to(to) {
            return Ok(false);
        }

        rec.status = to;
        rec.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.recordings.remove(id);
        inner.chunks.remove(id);
        inner.notes.remove(id);
        Ok(())
    }

    async fn query_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .recordings
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn list_recordings(&self) -> Result<Vec<Recording>> {
        let inner = self.inner.lock().await;
        let mut recs: Vec<Recording> = inner.recordings.values().cloned().collect();
        recs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recs)
    }

    async fn add_chunk(&self, chunk: Chunk) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .chunks
            .entry(chunk.recording_id.clone())
            .or_default()
            .push(chunk);
        Ok(())
    }

    async fn query_chunks(&self, recording_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.inner.lock().await;
        let mut chunks = inner
            .chunks
            .get(recording_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| (c.source, c.index));
        Ok(chunks)
    }

    async fn delete_chunks(&self, recording_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.chunks.remove(recording_id);
        Ok(())
    }

    async fn put_note(&self, note: Note) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.notes.insert(note.recording_id.clone(), note);
        Ok(())
    }

    async fn get_note(&self, recording_id: &str) -> Result<Option<Note>> {
        let inner = self.inner.lock().await;
        Ok(inner.notes.get(recording_id).cloned())
    }

    async fn save_snapshot(&self, snapshot: &LifecycleSnapshot) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<LifecycleSnapshot>> {
        let inner = self.inner.lock().await;
        Ok(inner.snapshot.clone())
    }

    async fn clear_snapshot(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.snapshot = None;
        Ok(())
    }
}

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{
    Chunk, LifecycleSnapshot, Note, Recording, RecordingPatch, RecordingStatus, SourceKind,
};
use super::MeetingStore;

const SNAPSHOT_FILE: &str = "lifecycle.json";

/// Filesystem-backed store: one JSON document per recording and note,
/// chunk payloads as standalone WAV files with an append-only JSONL
/// manifest per recording.
///
/// Documents are written to a temp file and renamed into place, so each
/// record is replaced atomically. Appending a manifest line is the commit
/// point for a chunk.
pub struct JsonStore {
    root: PathBuf,
    // Serializes read-modify-write cycles (patch, CAS) within this process.
    write_lock: Mutex<()>,
}

/// One manifest line per persisted chunk; the payload lives next to it.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    id: String,
    recording_id: String,
    index: u32,
    source: SourceKind,
    file: String,
    created_at: DateTime<Utc>,
}

impl JsonStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("recordings"))
            .context("Failed to create recordings directory")?;
        fs::create_dir_all(root.join("notes")).context("Failed to create notes directory")?;
        fs::create_dir_all(root.join("chunks")).context("Failed to create chunks directory")?;

        debug!("JSON store opened at {}", root.display());

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn recording_path(&self, id: &str) -> PathBuf {
        self.root.join("recordings").join(format!("{}.json", id))
    }

    fn note_path(&self, id: &str) -> PathBuf {
        self.root.join("notes").join(format!("{}.json", id))
    }

    fn chunk_dir(&self, recording_id: &str) -> PathBuf {
        self.root.join("chunks").join(recording_id)
    }

    fn manifest_path(&self, recording_id: &str) -> PathBuf {
        self.chunk_dir(recording_id).join("manifest.jsonl")
    }

    fn read_recording(&self, id: &str) -> Result<Option<Recording>> {
        read_json(&self.recording_path(id))
    }

    fn write_recording(&self, rec: &Recording) -> Result<()> {
        write_json_atomic(&self.recording_path(&rec.id), rec)
    }

    fn read_manifest(&self, recording_id: &str) -> Result<Vec<ManifestEntry>> {
        let path = self.manifest_path(recording_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read chunk manifest: {:?}", path))?;

        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<ManifestEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line means the process died mid-append; the
                // chunk never committed, so skip it.
                Err(e) => warn!("Skipping unreadable manifest line: {}", e),
            }
        }

        Ok(entries)
    }
}

#[async_trait::async_trait]
impl MeetingStore for JsonStore {
    async fn get(&self, id: &str) -> Result<Option<Recording>> {
        self.read_recording(id)
    }

    async fn put(&self, recording: Recording) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_recording(&recording)
    }

    async fn update_meta(&self, id: &str, patch: RecordingPatch) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut rec = self
            .read_recording(id)?
            .ok_or_else(|| anyhow::anyhow!("recording not found: {}", id))?;
        patch.apply(&mut rec);
        self.write_recording(&rec)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: &[RecordingStatus],
        to: RecordingStatus,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut rec = self
            .read_recording(id)?
            .ok_or_else(|| anyhow::anyhow!("recording not found: {}", id))?;

        if !from.contains(&rec.status) || !rec.status.can_transition_to(to) {
            return Ok(false);
        }

        rec.status = to;
        rec.updated_at = Utc::now();
        self.write_recording(&rec)?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.recording_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete recording: {:?}", path))?;
        }

        let note = self.note_path(id);
        if note.exists() {
            fs::remove_file(&note).with_context(|| format!("Failed to delete note: {:?}", note))?;
        }

        let chunks = self.chunk_dir(id);
        if chunks.exists() {
            fs::remove_dir_all(&chunks)
                .with_context(|| format!("Failed to delete chunks: {:?}", chunks))?;
        }

        Ok(())
    }

    async fn query_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>> {
        Ok(self
            .list_recordings()
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }

    async fn list_recordings(&self) -> Result<Vec<Recording>> {
        let dir = self.root.join("recordings");
        let mut recs = Vec::new();

        for entry in fs::read_dir(&dir).context("Failed to list recordings directory")? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(rec) = read_json::<Recording>(&path)? {
                    recs.push(rec);
                }
            }
        }

        recs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recs)
    }

    async fn add_chunk(&self, chunk: Chunk) -> Result<()> {
        let dir = self.chunk_dir(&chunk.recording_id);
        fs::create_dir_all(&dir).context("Failed to create chunk directory")?;

        let file_name = format!("{}-{:05}.wav", chunk.source, chunk.index);
        write_bytes_atomic(&dir.join(&file_name), &chunk.payload)?;

        let entry = ManifestEntry {
            id: chunk.id.clone(),
            recording_id: chunk.recording_id.clone(),
            index: chunk.index,
            source: chunk.source,
            file: file_name,
            created_at: chunk.created_at,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut manifest = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.manifest_path(&chunk.recording_id))
            .context("Failed to open chunk manifest")?;
        manifest
            .write_all(line.as_bytes())
            .context("Failed to append chunk manifest entry")?;

        Ok(())
    }

    async fn query_chunks(&self, recording_id: &str) -> Result<Vec<Chunk>> {
        let dir = self.chunk_dir(recording_id);
        let mut chunks = Vec::new();

        for entry in self.read_manifest(recording_id)? {
            let payload_path = dir.join(&entry.file);
            let payload = match fs::read(&payload_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Chunk payload missing, skipping: {:?} ({})",
                        payload_path, e
                    );
                    continue;
                }
            };

            chunks.push(Chunk {
                id: entry.id,
                recording_id: entry.recording_id,
                index: entry.index,
                source: entry.source,
                payload,
                created_at: entry.created_at,
            });
        }

        chunks.sort_by_key(|c| (c.source, c.index));
        Ok(chunks)
    }

    async fn delete_chunks(&self, recording_id: &str) -> Result<()> {
        let dir = self.chunk_dir(recording_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to delete chunks: {:?}", dir))?;
        }
        Ok(())
    }

    async fn put_note(&self, note: Note) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.note_path(&note.recording_id), &note)
    }

    async fn get_note(&self, recording_id: &str) -> Result<Option<Note>> {
        read_json(&self.note_path(recording_id))
    }

    async fn save_snapshot(&self, snapshot: &LifecycleSnapshot) -> Result<()> {
        write_json_atomic(&self.root.join(SNAPSHOT_FILE), snapshot)
    }

    async fn load_snapshot(&self) -> Result<Option<LifecycleSnapshot>> {
        read_json(&self.root.join(SNAPSHOT_FILE))
    }

    async fn clear_snapshot(&self) -> Result<()> {
        let path = self.root.join(SNAPSHOT_FILE);
        if path.exists() {
            fs::remove_file(&path).context("Failed to clear lifecycle snapshot")?;
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read record: {:?}", path))?;
    let value =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse record: {:?}", path))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write record: {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to commit record: {:?}", path))?;
    Ok(())
}

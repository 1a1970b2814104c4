use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which physical or logical audio origin a chunk came from.
///
/// `Speaker` and `Mixed` are accepted on stored data (older recordings may
/// carry them) but the capture engine only produces `Microphone` and
/// `System`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Microphone,
    System,
    Speaker,
    Mixed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Microphone => "microphone",
            SourceKind::System => "system",
            SourceKind::Speaker => "speaker",
            SourceKind::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a recording.
///
/// Transitions move forward only (`local -> queued -> sent`), except the
/// failure reset `queued -> local`. `Sent` is terminal. `Queued` doubles as
/// the mutual-exclusion flag for sync attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Local,
    Queued,
    Sent,
}

impl RecordingStatus {
    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        matches!(
            (self, next),
            (RecordingStatus::Local, RecordingStatus::Queued)
                | (RecordingStatus::Queued, RecordingStatus::Sent)
                | (RecordingStatus::Queued, RecordingStatus::Local)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Local => "local",
            RecordingStatus::Queued => "queued",
            RecordingStatus::Sent => "sent",
        }
    }
}

/// One user-initiated capture session and its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RecordingStatus,
    /// Language hint passed through to the processing service.
    pub language: Option<String>,
    /// Measured duration; canonical value from the processor wins.
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the last sync attempt finished, successful or not.
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    /// Category of the last sync failure, cleared on success.
    pub last_sync_error: Option<String>,
}

impl Recording {
    pub fn new(id: String, title: String, language: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            created_at: now,
            updated_at: now,
            status: RecordingStatus::Local,
            language,
            duration_ms: None,
            tags: Vec::new(),
            last_sync_attempt_at: None,
            last_sync_error: None,
        }
    }
}

/// Partial update applied to a recording's mutable metadata. Status changes
/// go through the compare-and-set transition instead.
#[derive(Debug, Clone, Default)]
pub struct RecordingPatch {
    pub title: Option<String>,
    pub duration_ms: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the stored error, `Some(Some(..))` replaces it.
    pub last_sync_error: Option<Option<String>>,
}

impl RecordingPatch {
    pub fn apply(self, rec: &mut Recording) {
        if let Some(title) = self.title {
            rec.title = title;
        }
        if let Some(duration_ms) = self.duration_ms {
            rec.duration_ms = Some(duration_ms);
        }
        if let Some(tags) = self.tags {
            rec.tags = tags;
        }
        if let Some(at) = self.last_sync_attempt_at {
            rec.last_sync_attempt_at = Some(at);
        }
        if let Some(err) = self.last_sync_error {
            rec.last_sync_error = err;
        }
        rec.updated_at = Utc::now();
    }
}

/// One timed slice of captured audio for one source type.
///
/// The payload is a complete WAV document so a chunk is playable on its own.
/// Chunks are read-only once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub recording_id: String,
    /// Monotonically increasing, scoped per (recording, source).
    pub index: u32,
    pub source: SourceKind,
    #[serde(with = "payload_b64")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(recording_id: &str, source: SourceKind, index: u32, payload: Vec<u8>) -> Self {
        Self {
            id: format!("{}/{}/{:05}", recording_id, source, index),
            recording_id: recording_id.to_string(),
            index,
            source,
            payload,
            created_at: Utc::now(),
        }
    }
}

mod payload_b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

/// Transcript and summary for a recording, written whole by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub recording_id: String,
    pub transcript: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// A complete note is the signal that no further sync is needed.
    pub fn is_complete(&self) -> bool {
        !self.transcript.is_empty() && !self.summary.is_empty()
    }
}

/// Persisted projection of the recorder's in-memory state, written on every
/// transition and on a fixed cadence while recording. Used only to detect
/// and recover an interrupted recording after restart; the recording's
/// `status` field stays the business source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub active: bool,
    pub recording_id: String,
    pub elapsed_ms: u64,
    /// Next chunk index per source, so a resumed recording continues the
    /// sequence instead of restarting at zero.
    pub cursors: BTreeMap<SourceKind, u32>,
    pub language: Option<String>,
    pub updated_at: DateTime<Utc>,
}

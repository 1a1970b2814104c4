//! Sync engine: drives every recording that still holds local audio toward
//! `sent`, or back to `local` for a later retry.
//!
//! `queued` is the mutual-exclusion flag: a compare-and-set from `local`
//! claims a recording before any work starts, so two concurrent attempts on
//! the same recording cannot both proceed. Work on different recordings is
//! independent and may interleave.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use super::backoff::{retry_with_backoff, BackoffPolicy};
use super::remote::{ProcessRequest, RemoteProcessor, SourcePayload};
use crate::audio::{decode_wav, encode_wav};
use crate::error::{SyncError, SyncFailureCategory};
use crate::store::{Chunk, MeetingStore, Note, RecordingPatch, RecordingStatus, SourceKind};

/// What happened to one recording during a sync pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Processed and advanced to `sent`.
    Completed,
    /// Already `sent`; no remote work was performed.
    AlreadySynced,
    /// No chunks exist yet; left `local`, non-fatal.
    NoAudio,
    /// Another attempt holds the `queued` lock.
    Locked,
    /// All attempts failed; reverted to `local` for manual retry.
    Failed {
        category: SyncFailureCategory,
        message: String,
    },
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub outcomes: Vec<(String, SyncOutcome)>,
}

pub struct SyncEngine {
    store: Arc<dyn MeetingStore>,
    remote: Arc<dyn RemoteProcessor>,
    policy: BackoffPolicy,
    concurrency: usize,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        remote: Arc<dyn RemoteProcessor>,
        policy: BackoffPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            remote,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Reset recordings stranded in `queued` by a previous process. Called
    /// once at startup, before any new sync work: no attempt can be in
    /// flight at that point, so `queued` can only be a stale lock.
    pub async fn recover_stale(&self) -> Result<usize> {
        let stale = self.store.query_by_status(RecordingStatus::Queued).await?;
        let mut recovered = 0;

        for rec in stale {
            if self
                .store
                .transition_status(&rec.id, &[RecordingStatus::Queued], RecordingStatus::Local)
                .await?
            {
                warn!("Recovered stale queued recording: {}", rec.id);
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    /// Drive one recording toward `sent`. Safe to call concurrently and to
    /// re-run on an already-synced recording.
    pub async fn sync_recording(&self, id: &str) -> Result<SyncOutcome> {
        let recording = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("recording not found: {}", id))?;

        // Idempotence: a sent recording costs zero remote calls.
        if recording.status == RecordingStatus::Sent {
            return Ok(SyncOutcome::AlreadySynced);
        }

        // Claim the recording; `queued` doubles as the lock.
        if !self
            .store
            .transition_status(id, &[RecordingStatus::Local], RecordingStatus::Queued)
            .await?
        {
            return Ok(SyncOutcome::Locked);
        }

        let chunks = match self.store.query_chunks(id).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.release(id).await;
                return Err(e);
            }
        };
        if chunks.is_empty() {
            self.release(id).await;
            info!("Recording {} has no audio yet, skipping sync", id);
            return Ok(SyncOutcome::NoAudio);
        }

        let request = match assemble_request(id, recording.language.clone(), &chunks) {
            Ok(request) => request,
            Err(e) => return Ok(self.fail(id, e).await),
        };

        let result = retry_with_backoff(&self.policy, "audio processing", |_attempt| {
            let request = &request;
            async move { self.remote.process(request).await }
        })
        .await;

        match result {
            Ok(outcome) => match self.finalize(id, outcome).await {
                Ok(()) => {
                    info!("Recording {} synced", id);
                    Ok(SyncOutcome::Completed)
                }
                Err(e) => {
                    // A local store failure must not strand the recording
                    // in queued state.
                    self.release(id).await;
                    Err(e)
                }
            },
            Err(e) => Ok(self.fail(id, e).await),
        }
    }

    /// Commit a successful processing result: note first, then metadata,
    /// then the status advance.
    async fn finalize(&self, id: &str, outcome: super::remote::ProcessOutcome) -> Result<()> {
        self.store
            .put_note(Note {
                recording_id: id.to_string(),
                transcript: outcome.transcript,
                summary: outcome.summary,
                created_at: Utc::now(),
            })
            .await?;

        let patch = RecordingPatch {
            title: outcome.title.filter(|t| !t.is_empty()),
            duration_ms: outcome.duration_ms,
            last_sync_attempt_at: Some(Utc::now()),
            last_sync_error: Some(None),
            ..Default::default()
        };
        self.store.update_meta(id, patch).await?;

        if !self
            .store
            .transition_status(id, &[RecordingStatus::Queued], RecordingStatus::Sent)
            .await?
        {
            warn!("Recording {} left queued state during sync", id);
        }

        Ok(())
    }

    /// Bulk entry point: pushes every `local` recording through sync with
    /// explicit bounded concurrency. The cancel flag is honored between
    /// units of work — in-flight units finish, queued ones are skipped.
    pub async fn sync_pending(&self, cancel: &AtomicBool) -> Result<SyncReport> {
        let candidates = self.store.query_by_status(RecordingStatus::Local).await?;
        let mut report = SyncReport::default();

        if candidates.is_empty() {
            return Ok(report);
        }

        info!(
            "Syncing {} pending recordings (concurrency {})",
            candidates.len(),
            self.concurrency
        );

        let mut results = stream::iter(candidates.into_iter().map(|rec| {
            let id = rec.id;
            async move {
                if cancel.load(Ordering::SeqCst) {
                    return (id, None);
                }
                let result = self.sync_recording(&id).await;
                (id, Some(result))
            }
        }))
        .buffer_unordered(self.concurrency);

        while let Some((id, result)) = results.next().await {
            match result {
                None => report.cancelled = true,
                Some(Ok(outcome)) => {
                    report.attempted += 1;
                    match &outcome {
                        SyncOutcome::Completed => report.completed += 1,
                        SyncOutcome::Failed { .. } => report.failed += 1,
                        _ => report.skipped += 1,
                    }
                    report.outcomes.push((id, outcome));
                }
                Some(Err(e)) => {
                    // One broken recording must not abort the rest.
                    error!("Sync pass error for {}: {}", id, e);
                    report.attempted += 1;
                    report.failed += 1;
                }
            }
        }

        info!(
            "Sync pass done: {} completed, {} failed, {} skipped",
            report.completed, report.failed, report.skipped
        );
        Ok(report)
    }

    /// Revert the `queued` claim after a failure and record the attempt.
    async fn fail(&self, id: &str, e: SyncError) -> SyncOutcome {
        let category = e.category();
        error!("Sync failed for {} ({}): {}", id, category.as_str(), e);

        self.release(id).await;

        let patch = RecordingPatch {
            last_sync_attempt_at: Some(Utc::now()),
            last_sync_error: Some(Some(category.as_str().to_string())),
            ..Default::default()
        };
        if let Err(e) = self.store.update_meta(id, patch).await {
            warn!("Failed to record sync attempt for {}: {}", id, e);
        }

        SyncOutcome::Failed {
            category,
            message: e.to_string(),
        }
    }

    async fn release(&self, id: &str) {
        match self
            .store
            .transition_status(id, &[RecordingStatus::Queued], RecordingStatus::Local)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Recording {} was not queued when releasing", id),
            Err(e) => error!("Failed to release queued recording {}: {}", id, e),
        }
    }
}

/// Reassemble chunks into one WAV document per source type, in index order.
///
/// Ordering comes from the indices alone, so retrieval order does not
/// matter. A gap in the sequence is logged and bridged rather than refused:
/// a seam in the audio beats losing the recording.
pub fn assemble_request(
    recording_id: &str,
    language: Option<String>,
    chunks: &[Chunk],
) -> Result<ProcessRequest, SyncError> {
    let mut by_source: BTreeMap<SourceKind, Vec<&Chunk>> = BTreeMap::new();
    for chunk in chunks {
        by_source.entry(chunk.source).or_default().push(chunk);
    }

    let mut payloads = Vec::new();

    for (source, mut group) in by_source {
        group.sort_by_key(|c| c.index);

        for (position, chunk) in group.iter().enumerate() {
            if chunk.index as usize != position {
                warn!(
                    "Chunk sequence for {}/{} has a gap at index {} (position {})",
                    recording_id, source, chunk.index, position
                );
                break;
            }
        }

        let mut samples: Vec<i16> = Vec::new();
        let mut sample_rate = 0u32;
        let mut channels = 0u16;

        for chunk in &group {
            let (rate, ch, mut decoded) = decode_wav(&chunk.payload)
                .map_err(|e| SyncError::BadPayload(format!("chunk {}: {}", chunk.id, e)))?;

            if sample_rate == 0 {
                sample_rate = rate;
                channels = ch;
            } else if rate != sample_rate || ch != channels {
                warn!(
                    "Chunk {} format differs ({}Hz/{}ch vs {}Hz/{}ch)",
                    chunk.id, rate, ch, sample_rate, channels
                );
            }

            samples.append(&mut decoded);
        }

        let wav = encode_wav(&samples, sample_rate, channels)
            .map_err(|e| SyncError::BadPayload(e.to_string()))?;

        payloads.push(SourcePayload { source, wav });
    }

    Ok(ProcessRequest {
        recording_id: recording_id.to_string(),
        language,
        payloads,
    })
}

//! The authoritative recording lifecycle tracker.
//!
//! One recording at a time; every mutation goes through this machine and
//! every transition is published to subscribers and persisted as a
//! lifecycle snapshot before it counts as durable. After a crash the
//! snapshot is how the system knows a recording was in progress:
//! `interrupted` is derived — snapshot says active but this process holds
//! no live capture handles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::cleanup::CleanupManager;
use crate::audio::{CaptureEngine, CaptureEngineConfig, CaptureSession, ChunkRecorder};
use crate::config::AudioConfig;
use crate::store::{
    LifecycleSnapshot, MeetingStore, Recording, RecordingPatch, SourceKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Recording,
    Stopping,
    Stopped,
}

/// Published to subscribers on every transition and on the recording tick.
#[derive(Debug, Clone, Serialize)]
pub struct StateSignal {
    pub state: RecorderState,
    pub recording_id: Option<String>,
    pub elapsed_ms: u64,
    /// True when capture runs mic-only because the system source failed.
    pub degraded: bool,
    pub warning: Option<String>,
}

impl StateSignal {
    fn idle() -> Self {
        Self {
            state: RecorderState::Idle,
            recording_id: None,
            elapsed_ms: 0,
            degraded: false,
            warning: None,
        }
    }
}

/// Recording options, resolved once at this boundary.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub mic_device_id: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    /// Attempt the best-effort system source. Defaults to on.
    pub system_audio: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            mic_device_id: None,
            language: None,
            title: None,
            system_audio: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub recording_id: String,
    pub degraded: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub recording_id: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub engine: CaptureEngineConfig,
    pub chunk_duration: Duration,
    pub flush_interval: Duration,
    pub stop_timeout: Duration,
}

impl RecorderConfig {
    pub fn from_audio(audio: &AudioConfig) -> Self {
        use crate::audio::{AudioBackendConfig, BackendKind};

        Self {
            engine: CaptureEngineConfig {
                backend: BackendKind::from_config_name(&audio.backend),
                audio: AudioBackendConfig {
                    target_sample_rate: audio.sample_rate,
                    target_channels: audio.channels,
                    buffer_duration_ms: audio.buffer_ms,
                },
                open_timeout: audio.open_timeout(),
                system_audio: audio.system_audio,
            },
            chunk_duration: audio.chunk_duration(),
            flush_interval: audio.flush_interval(),
            stop_timeout: audio.stop_timeout(),
        }
    }
}

struct ActiveSession {
    recording_id: String,
    language: Option<String>,
    session: CaptureSession,
    chunks: ChunkRecorder,
    /// Elapsed time carried over from before an interruption.
    elapsed_base_ms: u64,
    started: tokio::time::Instant,
    degraded: bool,
    warning: Option<String>,
    cadence: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn elapsed_ms(&self) -> u64 {
        self.elapsed_base_ms + self.started.elapsed().as_millis() as u64
    }
}

pub struct Recorder {
    store: Arc<dyn MeetingStore>,
    engine: CaptureEngine,
    cleanup: CleanupManager,
    config: RecorderConfig,
    state_tx: watch::Sender<StateSignal>,
    inner: Mutex<Option<ActiveSession>>,
}

impl Recorder {
    pub fn new(store: Arc<dyn MeetingStore>, config: RecorderConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(StateSignal::idle());

        Arc::new(Self {
            store,
            engine: CaptureEngine::new(config.engine.clone()),
            cleanup: CleanupManager::new(config.stop_timeout),
            config,
            state_tx,
            inner: Mutex::new(None),
        })
    }

    /// Subscribe to state transitions; the current value is readable
    /// immediately.
    pub fn subscribe(&self) -> watch::Receiver<StateSignal> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> StateSignal {
        self.state_tx.borrow().clone()
    }

    /// Live per-source levels for VU meters. Best-effort: returns an empty
    /// list rather than blocking or failing while the machine is busy.
    pub fn levels(&self) -> Vec<(SourceKind, f32)> {
        match self.inner.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|active| active.session.levels())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Start a new recording. The microphone must open; system audio is
    /// best-effort and only degrades the session.
    pub async fn start(self: &Arc<Self>, options: StartOptions) -> Result<StartOutcome> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            bail!("a recording is already in progress");
        }

        // An interrupted recording must be explicitly resumed or discarded
        // first; starting fresh would overwrite its snapshot.
        if let Some(snapshot) = self.store.load_snapshot().await? {
            if snapshot.active {
                bail!(
                    "an interrupted recording ({}) is pending resume or discard",
                    snapshot.recording_id
                );
            }
        }

        let mut session = self
            .engine
            .open(options.mic_device_id.as_deref(), options.system_audio)
            .await
            .context("Failed to open capture")?;

        let recording_id = format!("rec-{}", uuid::Uuid::new_v4());
        let title = options
            .title
            .clone()
            .unwrap_or_else(|| format!("Recording {}", Utc::now().format("%Y-%m-%d %H:%M")));

        let recording = Recording::new(recording_id.clone(), title, options.language.clone());
        if let Err(e) = self.store.put(recording).await {
            self.cleanup.force_stop(&mut session);
            return Err(e).context("Failed to create recording record");
        }

        let streams = session.take_streams();
        let chunks = ChunkRecorder::start(
            Arc::clone(&self.store),
            &recording_id,
            self.config.chunk_duration,
            streams,
            &BTreeMap::new(),
        );

        let degraded = session.degraded_warning().is_some();
        let warning = session.degraded_warning().map(|w| w.to_string());

        let mut active = ActiveSession {
            recording_id: recording_id.clone(),
            language: options.language,
            session,
            chunks,
            elapsed_base_ms: 0,
            started: tokio::time::Instant::now(),
            degraded,
            warning: warning.clone(),
            cadence: None,
        };

        // The transition is durable only once the snapshot is on disk.
        if let Err(e) = self.store.save_snapshot(&snapshot_of(&active)).await {
            self.cleanup.force_stop(&mut active.session);
            active.chunks.abort();
            return Err(e).context("Failed to persist lifecycle snapshot");
        }

        active.cadence = Some(self.spawn_cadence());
        *guard = Some(active);
        drop(guard);

        info!(
            "Recording started: {} (degraded: {})",
            recording_id, degraded
        );
        self.publish(RecorderState::Recording, Some(&recording_id), 0, degraded, warning.clone());

        Ok(StartOutcome {
            recording_id,
            degraded,
            warning,
        })
    }

    /// Stop the active recording: graceful cleanup with bounded wait, drain
    /// the chunk cutters, persist duration, then clear the snapshot.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut guard = self.inner.lock().await;
        let Some(mut active) = guard.take() else {
            bail!("no active recording");
        };

        let recording_id = active.recording_id.clone();
        let elapsed_ms = active.elapsed_ms();

        self.publish(
            RecorderState::Stopping,
            Some(&recording_id),
            elapsed_ms,
            active.degraded,
            active.warning.clone(),
        );

        // Timers first, so no periodic work writes to a dying handle.
        if let Some(cadence) = active.cadence.take() {
            cadence.abort();
        }

        self.cleanup.stop(&mut active.session).await;

        // Capture channels are closed now; cutters drain their remainder.
        active.chunks.finish().await;

        if let Err(e) = self
            .store
            .update_meta(
                &recording_id,
                RecordingPatch {
                    duration_ms: Some(elapsed_ms),
                    ..Default::default()
                },
            )
            .await
        {
            error!("Failed to persist duration for {}: {}", recording_id, e);
        }

        // Only after cleanup confirmed release may recoverability go away.
        if let Err(e) = self.store.clear_snapshot().await {
            error!("Failed to clear lifecycle snapshot: {}", e);
        }

        drop(guard);

        info!("Recording stopped: {} ({}ms)", recording_id, elapsed_ms);
        self.publish(RecorderState::Stopped, Some(&recording_id), elapsed_ms, false, None);

        Ok(StopOutcome {
            recording_id,
            duration_ms: elapsed_ms,
        })
    }

    /// Emergency stop: no graceful wait at all. For a stop that is known to
    /// be stuck (e.g. stop requested twice in a short window).
    pub async fn force_stop(&self) -> Result<Option<StopOutcome>> {
        let mut guard = self.inner.lock().await;
        let Some(mut active) = guard.take() else {
            return Ok(None);
        };

        let recording_id = active.recording_id.clone();
        let elapsed_ms = active.elapsed_ms();

        if let Some(cadence) = active.cadence.take() {
            cadence.abort();
        }
        active.chunks.abort();
        self.cleanup.force_stop(&mut active.session);

        if let Err(e) = self
            .store
            .update_meta(
                &recording_id,
                RecordingPatch {
                    duration_ms: Some(elapsed_ms),
                    ..Default::default()
                },
            )
            .await
        {
            warn!("Failed to persist duration on force stop: {}", e);
        }
        if let Err(e) = self.store.clear_snapshot().await {
            error!("Failed to clear lifecycle snapshot on force stop: {}", e);
        }

        drop(guard);

        warn!("Recording force-stopped: {}", recording_id);
        self.publish(RecorderState::Stopped, Some(&recording_id), elapsed_ms, false, None);

        Ok(Some(StopOutcome {
            recording_id,
            duration_ms: elapsed_ms,
        }))
    }

    /// An interrupted recording exists when the persisted snapshot claims
    /// active but this process holds no live capture handles.
    pub async fn is_interrupted(&self) -> Result<bool> {
        let guard = self.inner.lock().await;
        if guard.is_some() {
            return Ok(false);
        }
        Ok(self
            .store
            .load_snapshot()
            .await?
            .map(|s| s.active)
            .unwrap_or(false))
    }

    pub async fn interrupted_snapshot(&self) -> Result<Option<LifecycleSnapshot>> {
        let guard = self.inner.lock().await;
        if guard.is_some() {
            return Ok(None);
        }
        Ok(self.store.load_snapshot().await?.filter(|s| s.active))
    }

    /// Re-open devices and continue the interrupted recording under its
    /// original identifier, with chunk sequences continuing where they
    /// left off. Any failure here leaves the snapshot untouched so a
    /// transient error does not cost recoverability.
    pub async fn resume_interrupted(self: &Arc<Self>) -> Result<StartOutcome> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            bail!("a recording is already in progress");
        }

        let snapshot = self
            .store
            .load_snapshot()
            .await?
            .filter(|s| s.active)
            .ok_or_else(|| anyhow::anyhow!("no interrupted recording to resume"))?;

        let recording = self
            .store
            .get(&snapshot.recording_id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("interrupted recording {} not found", snapshot.recording_id)
            })?;

        let mut session = self
            .engine
            .open(None, true)
            .await
            .context("Failed to re-open capture for resume")?;

        let streams = session.take_streams();
        let chunks = ChunkRecorder::start(
            Arc::clone(&self.store),
            &recording.id,
            self.config.chunk_duration,
            streams,
            &snapshot.cursors,
        );

        let degraded = session.degraded_warning().is_some();
        let warning = session.degraded_warning().map(|w| w.to_string());

        let mut active = ActiveSession {
            recording_id: recording.id.clone(),
            language: snapshot.language.clone(),
            session,
            chunks,
            elapsed_base_ms: snapshot.elapsed_ms,
            started: tokio::time::Instant::now(),
            degraded,
            warning: warning.clone(),
            cadence: None,
        };

        if let Err(e) = self.store.save_snapshot(&snapshot_of(&active)).await {
            // Tear the fresh session down but keep the old snapshot: the
            // recording stays resumable.
            self.cleanup.force_stop(&mut active.session);
            active.chunks.abort();
            return Err(e).context("Failed to refresh lifecycle snapshot");
        }

        active.cadence = Some(self.spawn_cadence());
        let elapsed_ms = active.elapsed_base_ms;
        *guard = Some(active);
        drop(guard);

        info!("Recording resumed: {}", recording.id);
        self.publish(
            RecorderState::Recording,
            Some(&recording.id),
            elapsed_ms,
            degraded,
            warning.clone(),
        );

        Ok(StartOutcome {
            recording_id: recording.id,
            degraded,
            warning,
        })
    }

    /// Abandon the interrupted recording: clear the snapshot, keep all
    /// persisted chunks for manual processing.
    pub async fn clear_interrupted(&self) -> Result<()> {
        let guard = self.inner.lock().await;
        if guard.is_some() {
            bail!("cannot discard while a recording is in progress");
        }

        self.store.clear_snapshot().await?;
        info!("Interrupted recording state cleared");
        Ok(())
    }

    /// Periodic work while recording: force-flush capture buffers and
    /// re-persist the snapshot with fresh elapsed time and cursors.
    fn spawn_cadence(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let flush_interval = self.config.flush_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(recorder) = weak.upgrade() else { break };
                if !recorder.on_tick().await {
                    break;
                }
            }
        })
    }

    async fn on_tick(&self) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(active) = guard.as_mut() else {
            return false;
        };

        for handle in active.session.handles_mut().iter() {
            handle.flush();
        }

        let snapshot = snapshot_of(active);
        if let Err(e) = self.store.save_snapshot(&snapshot).await {
            warn!("Failed to re-persist lifecycle snapshot: {}", e);
        }

        let signal = StateSignal {
            state: RecorderState::Recording,
            recording_id: Some(active.recording_id.clone()),
            elapsed_ms: active.elapsed_ms(),
            degraded: active.degraded,
            warning: active.warning.clone(),
        };
        drop(guard);

        self.state_tx.send_replace(signal);
        true
    }

    fn publish(
        &self,
        state: RecorderState,
        recording_id: Option<&str>,
        elapsed_ms: u64,
        degraded: bool,
        warning: Option<String>,
    ) {
        self.state_tx.send_replace(StateSignal {
            state,
            recording_id: recording_id.map(|s| s.to_string()),
            elapsed_ms,
            degraded,
            warning,
        });
    }
}

fn snapshot_of(active: &ActiveSession) -> LifecycleSnapshot {
    LifecycleSnapshot {
        active: true,
        recording_id: active.recording_id.clone(),
        elapsed_ms: active.elapsed_ms(),
        cursors: active.chunks.cursors(),
        language: active.language.clone(),
        updated_at: Utc::now(),
    }
}

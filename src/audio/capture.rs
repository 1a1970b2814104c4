//! Dual-source capture engine.
//!
//! Opens the required microphone source and, best-effort, a system/output
//! audio source. Each source feeds two paths: the recording path (lossless
//! per-source channel consumed by the chunk recorder) and a lossy monitor
//! tap that is mixed into one signal for UI metering. Monitor failures can
//! never affect the recording path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, BackendFactory, BackendKind, AudioFrame};
use super::mixer::{MixerConfig, MonitorMixer};
use crate::error::CaptureError;
use crate::store::SourceKind;

#[derive(Debug, Clone)]
pub struct CaptureEngineConfig {
    pub backend: BackendKind,
    pub audio: AudioBackendConfig,
    /// Bound on opening one capture source.
    pub open_timeout: Duration,
    /// Whether to attempt the best-effort system source at all.
    pub system_audio: bool,
}

impl Default for CaptureEngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpal,
            audio: AudioBackendConfig::default(),
            open_timeout: Duration::from_secs(5),
            system_audio: true,
        }
    }
}

/// Last observed signal level for one source, readable without locking.
/// Reads are infallible; a missing or stopped source reads as silence.
#[derive(Clone, Default)]
pub struct LevelMeter(Arc<AtomicU32>);

impl LevelMeter {
    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Root-mean-square level of a buffer, normalized to 0.0..=1.0.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / i16::MAX as f64) as f32
}

/// One open capture source: the backend handle plus its live meter.
/// Exclusively owned by the active session; all access to the underlying
/// OS handle goes through these methods.
pub struct SourceHandle {
    pub kind: SourceKind,
    backend: Box<dyn AudioBackend>,
    level: LevelMeter,
}

impl SourceHandle {
    pub fn flush(&self) {
        self.backend.flush();
    }

    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        self.backend.stop().await
    }

    pub fn force_close(&mut self) {
        self.backend.force_close();
        self.level.set(0.0);
    }

    pub fn level(&self) -> f32 {
        self.level.get()
    }
}

/// Everything a live capture produced: handles for cleanup, per-source
/// recording streams, and the mixed monitor channel.
pub struct CaptureSession {
    handles: Vec<SourceHandle>,
    streams: Vec<(SourceKind, mpsc::Receiver<AudioFrame>)>,
    monitor: Option<mpsc::Receiver<AudioFrame>>,
    tasks: Vec<JoinHandle<()>>,
    degraded: Option<String>,
}

impl CaptureSession {
    /// Per-source recording streams; the chunk recorder takes these once.
    pub fn take_streams(&mut self) -> Vec<(SourceKind, mpsc::Receiver<AudioFrame>)> {
        std::mem::take(&mut self.streams)
    }

    /// The mixed monitor stream, if monitoring is up.
    pub fn take_monitor(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.monitor.take()
    }

    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.handles.iter().map(|h| h.kind).collect()
    }

    /// Live per-source levels. Never fails; stopped sources read as 0.
    pub fn levels(&self) -> Vec<(SourceKind, f32)> {
        self.handles.iter().map(|h| (h.kind, h.level())).collect()
    }

    /// Non-fatal warning from a degraded (mic-only) start.
    pub fn degraded_warning(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub(crate) fn handles_mut(&mut self) -> &mut Vec<SourceHandle> {
        &mut self.handles
    }

    /// Cancel forwarding and mixing tasks. Called on every teardown path so
    /// no periodic work outlives the capture handles.
    pub(crate) fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct CaptureEngine {
    config: CaptureEngineConfig,
}

impl CaptureEngine {
    pub fn new(config: CaptureEngineConfig) -> Self {
        Self { config }
    }

    /// Open up to two sources and wire the monitor mix.
    ///
    /// The microphone is required: its failure fails the whole start. The
    /// system source degrades to mic-only with a warning recorded on the
    /// session. `want_system` lets a caller opt out of system audio for one
    /// recording without reconfiguring the engine.
    pub async fn open(
        &self,
        mic_device_id: Option<&str>,
        want_system: bool,
    ) -> Result<CaptureSession, CaptureError> {
        let mut handles = Vec::new();
        let mut streams = Vec::new();
        let mut tasks = Vec::new();
        let mut degraded = None;

        // Monitor tap shared by all sources; bounded and lossy.
        let (tap_tx, tap_rx) = mpsc::channel::<AudioFrame>(64);

        let (mic_handle, mic_rx) = self
            .open_source(SourceKind::Microphone, mic_device_id)
            .await?;
        info!("Microphone source open");

        let (rec_tx, rec_rx) = mpsc::channel(64);
        tasks.push(spawn_forwarder(
            mic_rx,
            rec_tx,
            tap_tx.clone(),
            mic_handle.level.clone(),
        ));
        streams.push((SourceKind::Microphone, rec_rx));
        handles.push(mic_handle);

        if self.config.system_audio && want_system {
            match self.open_source(SourceKind::System, None).await {
                Ok((sys_handle, sys_rx)) => {
                    info!("System audio source open");
                    let (rec_tx, rec_rx) = mpsc::channel(64);
                    tasks.push(spawn_forwarder(
                        sys_rx,
                        rec_tx,
                        tap_tx.clone(),
                        sys_handle.level.clone(),
                    ));
                    streams.push((SourceKind::System, rec_rx));
                    handles.push(sys_handle);
                }
                Err(e) => {
                    warn!("System audio unavailable, continuing mic-only: {}", e);
                    degraded = Some(format!("system audio capture unavailable: {}", e));
                }
            }
        }

        drop(tap_tx);

        let sources: Vec<SourceKind> = handles.iter().map(|h| h.kind).collect();
        let mixer_config = MixerConfig {
            sample_rate: self.config.audio.target_sample_rate,
            channels: self.config.audio.target_channels,
            sources,
            ..Default::default()
        };

        let monitor = match MonitorMixer::new(mixer_config) {
            Ok(mixer) => {
                let (monitor_rx, mixer_task) = mixer.spawn(tap_rx);
                tasks.push(mixer_task);
                Some(monitor_rx)
            }
            Err(e) => {
                // Release the mixing graph and fall back to the raw
                // microphone tap as the monitor signal.
                warn!("Monitor mixing unavailable, falling back to mic tap: {}", e);
                let (monitor_rx, passthrough) = spawn_mic_passthrough(tap_rx);
                tasks.push(passthrough);
                Some(monitor_rx)
            }
        };

        Ok(CaptureSession {
            handles,
            streams,
            monitor,
            tasks,
            degraded,
        })
    }

    async fn open_source(
        &self,
        kind: SourceKind,
        device_id: Option<&str>,
    ) -> Result<(SourceHandle, mpsc::Receiver<AudioFrame>), CaptureError> {
        let mut backend = BackendFactory::create(
            &self.config.backend,
            kind,
            device_id,
            self.config.audio.clone(),
        )?;

        let rx = match tokio::time::timeout(self.config.open_timeout, backend.start()).await {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // A hung open is a definitive failure; tear down whatever
                // the backend managed to allocate.
                backend.force_close();
                return Err(CaptureError::Timeout(self.config.open_timeout));
            }
        };

        Ok((
            SourceHandle {
                kind,
                backend,
                level: LevelMeter::default(),
            },
            rx,
        ))
    }
}

/// Forward frames from a backend into the recording path, updating the
/// level meter and feeding the monitor tap on the way. The tap send is
/// lossy by design.
fn spawn_forwarder(
    mut rx: mpsc::Receiver<AudioFrame>,
    rec_tx: mpsc::Sender<AudioFrame>,
    tap_tx: mpsc::Sender<AudioFrame>,
    level: LevelMeter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            level.set(rms_level(&frame.samples));
            let _ = tap_tx.try_send(frame.clone());
            if rec_tx.send(frame).await.is_err() {
                break;
            }
        }
        level.set(0.0);
    })
}

/// Mixer fallback: only microphone frames pass through to the monitor.
fn spawn_mic_passthrough(
    mut tap_rx: mpsc::Receiver<AudioFrame>,
) -> (mpsc::Receiver<AudioFrame>, JoinHandle<()>) {
    let (out_tx, out_rx) = mpsc::channel(64);

    let task = tokio::spawn(async move {
        while let Some(frame) = tap_rx.recv().await {
            if frame.source == SourceKind::Microphone {
                let _ = out_tx.try_send(frame);
            }
        }
    });

    (out_rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_level_silence_and_full_scale() {
        assert_eq!(rms_level(&[]), 0.0);
        assert_eq!(rms_level(&[0, 0, 0]), 0.0);

        let full = vec![i16::MAX; 64];
        let level = rms_level(&full);
        assert!((level - 1.0).abs() < 1e-3, "full scale should be ~1.0, got {}", level);
    }

    #[test]
    fn test_level_meter_roundtrip() {
        let meter = LevelMeter::default();
        assert_eq!(meter.get(), 0.0);

        meter.set(0.42);
        assert!((meter.get() - 0.42).abs() < f32::EPSILON);
    }
}

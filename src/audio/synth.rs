//! Deterministic capture backend for tests and hardware-free runs.
//!
//! Generates a repeating ramp signal on the configured buffer cadence.
//! Failure modes are scripted through `SynthSpec` so degraded-capture and
//! forced-teardown paths can be exercised without real devices.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::CaptureError;
use crate::store::SourceKind;

/// Scripted behavior for the synthetic backend.
#[derive(Debug, Clone, Default)]
pub struct SynthSpec {
    /// System source fails to open with `DeviceUnavailable`.
    pub fail_system: bool,
    /// Microphone source fails to open with `PermissionDenied`.
    pub deny_microphone: bool,
    /// Opening never completes; the engine's timeout must fire.
    pub hang_on_start: bool,
    /// Graceful stop never acknowledges; cleanup must escalate.
    pub hang_on_stop: bool,
}

enum Command {
    Flush,
    Stop(oneshot::Sender<()>),
}

pub struct SynthBackend {
    source: SourceKind,
    spec: SynthSpec,
    config: AudioBackendConfig,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl SynthBackend {
    pub fn new(
        source: SourceKind,
        spec: SynthSpec,
        config: AudioBackendConfig,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            source,
            spec,
            config,
            commands: None,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for SynthBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::Backend("already capturing".into()));
        }

        match self.source {
            SourceKind::System if self.spec.fail_system => {
                return Err(CaptureError::DeviceUnavailable(
                    "no loopback source present".into(),
                ));
            }
            SourceKind::Microphone if self.spec.deny_microphone => {
                return Err(CaptureError::PermissionDenied(
                    "microphone access not granted".into(),
                ));
            }
            _ => {}
        }

        if self.spec.hang_on_start {
            // Simulates a capture primitive that never reports readiness.
            std::future::pending::<()>().await;
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

        let source = self.source;
        let hang_on_stop = self.spec.hang_on_stop;
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        let buffer_ms = self.config.buffer_duration_ms.max(1);

        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(buffer_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick completes immediately

            let mut elapsed_ms: u64 = 0;
            let mut last_emit = tokio::time::Instant::now();

            let emit = |elapsed_ms: u64, span_ms: u64| -> AudioFrame {
                let count =
                    (span_ms * sample_rate as u64 * channels as u64 / 1000) as usize;
                let samples = (0..count)
                    .map(|i| (((elapsed_ms as usize + i) % 100) as i16) * 100)
                    .collect();
                AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: elapsed_ms,
                    source,
                }
            };

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let frame = emit(elapsed_ms, buffer_ms);
                        elapsed_ms += buffer_ms;
                        last_emit = tokio::time::Instant::now();
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Flush) => {
                            // Drain whatever accrued since the last emission;
                            // often zero-length, which downstream skips.
                            let span = last_emit.elapsed().as_millis() as u64;
                            let span = span.min(buffer_ms);
                            let frame = emit(elapsed_ms, span);
                            elapsed_ms += span;
                            last_emit = tokio::time::Instant::now();
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Stop(ack)) => {
                            if hang_on_stop {
                                // Swallow the ack; the caller's bounded wait
                                // will escalate to force_close.
                                std::mem::forget(ack);
                                continue;
                            }
                            let span = last_emit.elapsed().as_millis() as u64;
                            let frame = emit(elapsed_ms, span.min(buffer_ms));
                            let _ = frame_tx.send(frame).await;
                            let _ = ack.send(());
                            break;
                        }
                        None => break,
                    }
                }
            }

            debug!("Synth generator for {} finished", source);
        });

        self.commands = Some(cmd_tx);
        self.task = Some(task);

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(commands) = self.commands.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if commands.send(Command::Stop(ack_tx)).is_err() {
            self.task = None;
            return Ok(());
        }

        // No internal deadline: the cleanup manager bounds this wait.
        let _ = ack_rx.await;

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        Ok(())
    }

    fn flush(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Flush);
        }
    }

    fn force_close(&mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "synth"
    }
}

//! cpal-backed capture for real devices.
//!
//! A cpal stream is not `Send`, so each open source runs on a dedicated
//! thread that owns the stream and forwards buffered frames into a tokio
//! channel. System/output audio is reached through loopback or monitor
//! input devices where the platform exposes one; there is no portable
//! direct tap, which is why the system source is best-effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::CaptureError;
use crate::store::SourceKind;

/// Name fragments that mark an input device as a loopback/monitor tap of
/// output audio.
const LOOPBACK_MARKERS: &[&str] = &[
    "monitor",
    "loopback",
    "blackhole",
    "soundflower",
    "stereo mix",
    "what u hear",
];

pub fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn map_device_error(err: &dyn std::error::Error) -> CaptureError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        CaptureError::PermissionDenied(text)
    } else {
        CaptureError::DeviceUnavailable(text)
    }
}

enum Command {
    Flush,
    Stop(oneshot::Sender<()>),
}

pub struct CpalBackend {
    source: SourceKind,
    device_id: Option<String>,
    config: AudioBackendConfig,
    commands: Option<std_mpsc::Sender<Command>>,
    kill: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new(
        source: SourceKind,
        device_id: Option<&str>,
        config: AudioBackendConfig,
    ) -> Result<Self, CaptureError> {
        match source {
            SourceKind::Microphone | SourceKind::System => {}
            other => {
                return Err(CaptureError::Backend(format!(
                    "cpal backend cannot capture source type: {}",
                    other
                )))
            }
        }

        Ok(Self {
            source,
            device_id: device_id.map(|s| s.to_string()),
            config,
            commands: None,
            kill: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn resolve_device(source: SourceKind, device_id: Option<&str>) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();

        if let Some(wanted) = device_id {
            let devices = host
                .input_devices()
                .map_err(|e| map_device_error(&e))?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            return Err(CaptureError::DeviceUnavailable(format!(
                "input device not found: {}",
                wanted
            )));
        }

        match source {
            SourceKind::Microphone => host.default_input_device().ok_or_else(|| {
                CaptureError::DeviceUnavailable("no default input device".into())
            }),
            SourceKind::System => {
                let devices = host
                    .input_devices()
                    .map_err(|e| map_device_error(&e))?;
                for device in devices {
                    if device.name().map(|n| is_loopback_name(&n)).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(CaptureError::DeviceUnavailable(
                    "no loopback/monitor device for system audio".into(),
                ))
            }
            _ => unreachable!("validated in new()"),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::Backend("already capturing".into()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        self.kill.store(false, Ordering::SeqCst);
        let kill = Arc::clone(&self.kill);
        let source = self.source;
        let device_id = self.device_id.clone();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name(format!("capture-{}", source))
            .spawn(move || {
                capture_thread(source, device_id, config, frame_tx, cmd_rx, ready_tx, kill)
            })
            .map_err(|e| CaptureError::Backend(format!("failed to spawn capture thread: {}", e)))?;

        // The thread reports whether the stream actually opened.
        match ready_rx.await {
            Ok(Ok(())) => {
                self.commands = Some(cmd_tx);
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Backend("capture thread died during open".into()))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(commands) = self.commands.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if commands.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }

        if let Some(thread) = self.thread.take() {
            // Joining a finished thread is quick; do it off the runtime.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        Ok(())
    }

    fn flush(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Flush);
        }
    }

    fn force_close(&mut self) {
        self.kill.store(true, Ordering::SeqCst);
        self.commands = None;
        // The thread observes the kill flag, drops the stream and exits;
        // it is detached rather than joined.
        self.thread = None;
    }

    fn is_capturing(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn capture_thread(
    source: SourceKind,
    device_id: Option<String>,
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    cmd_rx: std_mpsc::Receiver<Command>,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
    kill: Arc<AtomicBool>,
) {
    let device = match CpalBackend::resolve_device(source, device_id.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let device_config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(map_device_error(&e)));
            return;
        }
    };

    let native_rate = device_config.sample_rate().0;
    let native_channels = device_config.channels();

    let (raw_tx, raw_rx) = std_mpsc::channel::<Vec<i16>>();
    let err_fn = |e| warn!("Capture stream error: {}", e);

    let build_result = match device_config.sample_format() {
        cpal::SampleFormat::F32 => {
            let raw_tx = raw_tx.clone();
            device.build_input_stream(
                &device_config.into(),
                move |data: &[f32], _| {
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    let _ = raw_tx.send(samples);
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let raw_tx = raw_tx.clone();
            device.build_input_stream(
                &device_config.into(),
                move |data: &[i16], _| {
                    let _ = raw_tx.send(data.to_vec());
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(CaptureError::Backend(format!(
                "unsupported sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match build_result {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(map_device_error(&e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Backend(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    debug!("Capture thread running for {} ({}Hz native)", source, native_rate);

    let started = Instant::now();
    let buffer_samples = (config.buffer_duration_ms * config.target_sample_rate as u64
        * config.target_channels as u64
        / 1000) as usize;
    let mut pending: Vec<i16> = Vec::with_capacity(buffer_samples * 2);

    let deliver = |pending: &mut Vec<i16>| {
        if pending.is_empty() {
            return;
        }
        let frame = AudioFrame {
            samples: std::mem::take(pending),
            sample_rate: config.target_sample_rate,
            channels: config.target_channels,
            timestamp_ms: started.elapsed().as_millis() as u64,
            source,
        };
        if frame_tx.try_send(frame).is_err() {
            warn!("Dropping capture frame, channel full or closed");
        }
    };

    loop {
        if kill.load(Ordering::SeqCst) {
            break;
        }

        match cmd_rx.try_recv() {
            Ok(Command::Flush) => deliver(&mut pending),
            Ok(Command::Stop(ack)) => {
                deliver(&mut pending);
                drop(stream);
                let _ = ack.send(());
                return;
            }
            Err(std_mpsc::TryRecvError::Disconnected) => break,
            Err(std_mpsc::TryRecvError::Empty) => {}
        }

        match raw_rx.recv_timeout(Duration::from_millis(5)) {
            Ok(raw) => {
                pending.extend(convert(
                    &raw,
                    native_rate,
                    native_channels,
                    config.target_sample_rate,
                    config.target_channels,
                ));
                if pending.len() >= buffer_samples {
                    deliver(&mut pending);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    debug!("Capture thread for {} exited", source);
}

/// Convert a raw device buffer to the target rate and channel count.
/// Downsampling is plain decimation, stereo collapse is a clamped sum;
/// upsampling is not attempted.
fn convert(
    samples: &[i16],
    native_rate: u32,
    native_channels: u16,
    target_rate: u32,
    target_channels: u16,
) -> Vec<i16> {
    let mut out: Vec<i16>;

    if native_channels == 2 && target_channels == 1 {
        out = samples
            .chunks_exact(2)
            .map(|pair| {
                let sum = pair[0] as i32 + pair[1] as i32;
                sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
            })
            .collect();
    } else {
        out = samples.to_vec();
    }

    if native_rate > target_rate && target_rate > 0 {
        let ratio = (native_rate / target_rate).max(1) as usize;
        out = out.into_iter().step_by(ratio).collect();
    }

    out
}

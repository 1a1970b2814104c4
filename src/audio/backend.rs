use tokio::sync::mpsc;

use crate::error::CaptureError;
use crate::store::SourceKind;

/// Audio sample data (16-bit PCM, interleaved).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Which source produced this frame
    pub source: SourceKind,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / (self.sample_rate as u64 * self.channels as u64)
    }
}

/// Configuration for a capture backend.
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will downsample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_duration_ms: 100,
        }
    }
}

/// Audio capture backend.
///
/// Implementations:
/// - cpal: real devices — microphone input and loopback/monitor devices for
///   system audio, where the platform exposes one
/// - synth: deterministic generator for tests and machines without hardware
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive audio frames.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing gracefully, draining buffered audio first.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Ask the backend to deliver any buffered-but-undelivered audio now.
    /// Best-effort; never blocks.
    fn flush(&self);

    /// Emergency teardown: release OS handles without waiting for
    /// acknowledgment. Must not panic, must be safe to call twice.
    fn force_close(&mut self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Which backend family to instantiate.
#[derive(Debug, Clone)]
pub enum BackendKind {
    Cpal,
    Synth(crate::audio::synth::SynthSpec),
}

impl BackendKind {
    pub fn from_config_name(name: &str) -> Self {
        match name {
            "synth" => BackendKind::Synth(Default::default()),
            _ => BackendKind::Cpal,
        }
    }
}

/// Creates capture backends for a source type.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        kind: &BackendKind,
        source: SourceKind,
        device_id: Option<&str>,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, CaptureError> {
        match kind {
            BackendKind::Cpal => {
                let backend =
                    crate::audio::cpal::CpalBackend::new(source, device_id, config)?;
                Ok(Box::new(backend))
            }
            BackendKind::Synth(spec) => {
                let backend =
                    crate::audio::synth::SynthBackend::new(source, spec.clone(), config)?;
                Ok(Box::new(backend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0i16; 1600],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            source: SourceKind::Microphone,
        };
        assert_eq!(frame.duration_ms(), 100);

        let stereo = AudioFrame {
            samples: vec![0i16; 3200],
            sample_rate: 16000,
            channels: 2,
            timestamp_ms: 0,
            source: SourceKind::System,
        };
        assert_eq!(stereo.duration_ms(), 100);
    }

    #[test]
    fn test_backend_config_default() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.target_sample_rate, 16000);
        assert_eq!(config.target_channels, 1);
        assert_eq!(config.buffer_duration_ms, 100);
    }
}

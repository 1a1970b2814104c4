// Monitor mixer: combines per-source monitor taps into one mixed signal.
//
// This feeds UI monitoring only. The recording data path consumes each
// source separately; a mixer failure therefore degrades monitoring, never
// recording.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::AudioFrame;
use crate::error::CaptureError;
use crate::store::SourceKind;

#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Expected sample rate of incoming frames
    pub sample_rate: u32,
    /// Expected channel count of incoming frames
    pub channels: u16,
    /// Frames older than this relative to the mix position are dropped
    /// to prevent unbounded buffering (default: 200ms)
    pub max_buffer_delay_ms: u64,
    /// Sources expected to contribute to the mix
    pub sources: Vec<SourceKind>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
            sources: vec![SourceKind::Microphone, SourceKind::System],
        }
    }
}

/// Streaming mixer over a tagged frame channel.
pub struct MonitorMixer {
    config: MixerConfig,
    buffers: HashMap<SourceKind, VecDeque<AudioFrame>>,
    position_ms: u64,
}

impl MonitorMixer {
    pub fn new(config: MixerConfig) -> Result<Self, CaptureError> {
        if config.sources.is_empty() {
            return Err(CaptureError::MixingFailed("no sources to mix".into()));
        }
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(CaptureError::MixingFailed(format!(
                "invalid mix format: {}Hz, {} channels",
                config.sample_rate, config.channels
            )));
        }

        let mut buffers = HashMap::new();
        for source in &config.sources {
            buffers.insert(*source, VecDeque::new());
        }

        Ok(Self {
            config,
            buffers,
            position_ms: 0,
        })
    }

    /// Run the mixer as a task: frames in, mixed monitor frames out.
    /// Ends when the input channel closes.
    pub fn spawn(
        mut self,
        mut rx: mpsc::Receiver<AudioFrame>,
    ) -> (mpsc::Receiver<AudioFrame>, JoinHandle<()>) {
        let (out_tx, out_rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                self.push(frame);
                while let Some(mixed) = self.next_mixed() {
                    // Monitoring is lossy on purpose; a slow consumer must
                    // not stall capture.
                    if out_tx.try_send(mixed).is_err() {
                        debug!("Monitor consumer behind, dropping mixed frame");
                    }
                }
            }

            while let Some(mixed) = self.next_mixed() {
                let _ = out_tx.try_send(mixed);
            }

            debug!("Monitor mixer finished");
        });

        (out_rx, task)
    }

    fn push(&mut self, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate
            || frame.channels != self.config.channels
        {
            warn!(
                "Dropping monitor frame with mismatched format: {}Hz/{}ch (expected {}Hz/{}ch)",
                frame.sample_rate, frame.channels,
                self.config.sample_rate, self.config.channels
            );
            return;
        }

        if let Some(buffer) = self.buffers.get_mut(&frame.source) {
            buffer.push_back(frame);
        }

        self.drop_stale();
    }

    fn drop_stale(&mut self) {
        let cutoff = self
            .position_ms
            .saturating_sub(self.config.max_buffer_delay_ms);

        for buffer in self.buffers.values_mut() {
            while buffer.front().map(|f| f.timestamp_ms < cutoff).unwrap_or(false) {
                buffer.pop_front();
            }
        }
    }

    /// Pop one frame from every source that has data and mix them. Returns
    /// None when no buffer has data.
    fn next_mixed(&mut self) -> Option<AudioFrame> {
        let frames: Vec<AudioFrame> = self
            .buffers
            .values_mut()
            .filter_map(|b| b.pop_front())
            .collect();

        if frames.is_empty() {
            return None;
        }

        let mixed = mix_frames(&frames, self.config.sample_rate, self.config.channels);
        self.position_ms = mixed.timestamp_ms;
        Some(mixed)
    }
}

/// Saturating sample-wise sum over frames, sized to the longest input.
fn mix_frames(frames: &[AudioFrame], sample_rate: u32, channels: u16) -> AudioFrame {
    let timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);
    let len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);

    let mut samples = Vec::with_capacity(len);
    for i in 0..len {
        let sum: i32 = frames
            .iter()
            .map(|f| f.samples.get(i).copied().unwrap_or(0) as i32)
            .sum();
        samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp_ms,
        source: SourceKind::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(source: SourceKind, timestamp_ms: u64, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    #[test]
    fn test_mixer_rejects_empty_source_list() {
        let config = MixerConfig {
            sources: vec![],
            ..Default::default()
        };
        assert!(MonitorMixer::new(config).is_err());
    }

    #[test]
    fn test_mix_frames_sums_samples() {
        let mixed = mix_frames(
            &[
                frame(SourceKind::Microphone, 0, vec![100, 200, 300]),
                frame(SourceKind::System, 0, vec![50, 100, 150]),
            ],
            16000,
            1,
        );

        assert_eq!(mixed.samples, vec![150, 300, 450]);
        assert_eq!(mixed.source, SourceKind::Mixed);
    }

    #[test]
    fn test_mix_frames_clips_overflow() {
        let mixed = mix_frames(
            &[
                frame(SourceKind::Microphone, 0, vec![i16::MAX - 100]),
                frame(SourceKind::System, 0, vec![200]),
            ],
            16000,
            1,
        );

        assert_eq!(mixed.samples[0], i16::MAX);
    }

    #[test]
    fn test_mix_frames_pads_shorter_frame() {
        let mixed = mix_frames(
            &[
                frame(SourceKind::Microphone, 0, vec![100, 200]),
                frame(SourceKind::System, 0, vec![50, 100, 150, 200]),
            ],
            16000,
            1,
        );

        assert_eq!(mixed.samples, vec![150, 300, 150, 200]);
    }

    #[test]
    fn test_push_drops_mismatched_format() {
        let mut mixer = MonitorMixer::new(MixerConfig::default()).unwrap();
        mixer.push(AudioFrame {
            samples: vec![1, 2, 3],
            sample_rate: 44100,
            channels: 1,
            timestamp_ms: 0,
            source: SourceKind::Microphone,
        });

        assert!(mixer.next_mixed().is_none());
    }

    #[tokio::test]
    async fn test_streaming_mix_two_sources() {
        let mixer = MonitorMixer::new(MixerConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (mut out_rx, task) = mixer.spawn(rx);

        tx.send(frame(SourceKind::Microphone, 0, vec![10, 20])).await.unwrap();
        tx.send(frame(SourceKind::System, 0, vec![1, 2])).await.unwrap();
        drop(tx);

        task.await.unwrap();

        let mut got = Vec::new();
        while let Some(f) = out_rx.recv().await {
            got.push(f);
        }

        // Either mixed in one step or drained as two singles, depending on
        // arrival interleaving; total energy is preserved either way.
        let total: i32 = got
            .iter()
            .flat_map(|f| f.samples.iter())
            .map(|&s| s as i32)
            .sum();
        assert_eq!(total, 33);
    }
}

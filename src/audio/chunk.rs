//! Chunk recorder: turns continuous per-source signals into persisted,
//! independently indexed chunk sequences.
//!
//! Each open source gets its own cutter task so microphone and system audio
//! are persisted as parallel streams rather than one pre-mixed signal,
//! preserving separability for speaker-aware processing downstream.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::AudioFrame;
use crate::store::{Chunk, MeetingStore, SourceKind};

/// Encode PCM samples as a complete in-memory WAV document.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV document back to PCM samples and its format.
pub fn decode_wav(bytes: &[u8]) -> Result<(u32, u16, Vec<i16>)> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("Failed to open WAV data")?;
    let spec = reader.spec();
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read WAV samples")?;

    Ok((spec.sample_rate, spec.channels, samples))
}

/// Runs one cutter task per source stream and tracks their index cursors.
pub struct ChunkRecorder {
    cursors: BTreeMap<SourceKind, Arc<AtomicU32>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChunkRecorder {
    /// Start cutting the given streams into persisted chunks.
    ///
    /// `seed_cursors` carries the next index per source when resuming an
    /// interrupted recording, so sequences continue instead of restarting.
    pub fn start(
        store: Arc<dyn MeetingStore>,
        recording_id: &str,
        chunk_duration: Duration,
        streams: Vec<(SourceKind, mpsc::Receiver<AudioFrame>)>,
        seed_cursors: &BTreeMap<SourceKind, u32>,
    ) -> Self {
        let mut cursors = BTreeMap::new();
        let mut tasks = Vec::new();

        for (source, rx) in streams {
            let cursor = Arc::new(AtomicU32::new(
                seed_cursors.get(&source).copied().unwrap_or(0),
            ));
            cursors.insert(source, Arc::clone(&cursor));

            tasks.push(spawn_cutter(
                Arc::clone(&store),
                recording_id.to_string(),
                source,
                chunk_duration,
                cursor,
                rx,
            ));
        }

        Self { cursors, tasks }
    }

    /// Current next-index per source, persisted into the lifecycle snapshot.
    pub fn cursors(&self) -> BTreeMap<SourceKind, u32> {
        self.cursors
            .iter()
            .map(|(k, v)| (*k, v.load(Ordering::SeqCst)))
            .collect()
    }

    /// Wait for every cutter to drain and persist its remainder. Only
    /// meaningful after the upstream frame channels closed.
    pub async fn finish(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Chunk cutter task panicked: {}", e);
            }
        }
    }

    /// Emergency teardown: drop cutters without draining.
    pub fn abort(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_cutter(
    store: Arc<dyn MeetingStore>,
    recording_id: String,
    source: SourceKind,
    chunk_duration: Duration,
    cursor: Arc<AtomicU32>,
    mut rx: mpsc::Receiver<AudioFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let chunk_ms = chunk_duration.as_millis() as u64;
        let mut pending: Vec<i16> = Vec::new();
        let mut sample_rate = 0u32;
        let mut channels = 0u16;

        debug!("Chunk cutter started for {} ({}ms chunks)", source, chunk_ms);

        while let Some(frame) = rx.recv().await {
            // Empty buffers come from force-flush over a quiet source.
            if frame.samples.is_empty() {
                continue;
            }

            if sample_rate == 0 {
                sample_rate = frame.sample_rate;
                channels = frame.channels;
            }

            pending.extend_from_slice(&frame.samples);

            let pending_ms = buffered_ms(pending.len(), sample_rate, channels);
            if pending_ms >= chunk_ms {
                persist(
                    &*store,
                    &recording_id,
                    source,
                    &cursor,
                    &mut pending,
                    sample_rate,
                    channels,
                )
                .await;
            }
        }

        // Source closed: persist whatever is left.
        if !pending.is_empty() {
            persist(
                &*store,
                &recording_id,
                source,
                &cursor,
                &mut pending,
                sample_rate,
                channels,
            )
            .await;
        }

        info!(
            "Chunk cutter finished for {}: next index {}",
            source,
            cursor.load(Ordering::SeqCst)
        );
    })
}

fn buffered_ms(samples: usize, sample_rate: u32, channels: u16) -> u64 {
    if sample_rate == 0 || channels == 0 {
        return 0;
    }
    (samples as u64 * 1000) / (sample_rate as u64 * channels as u64)
}

/// Cut the pending buffer into one chunk. The counter advances only after
/// the store accepts the chunk; on failure the samples stay buffered so no
/// audio is lost, at the cost of a longer next chunk.
async fn persist(
    store: &dyn MeetingStore,
    recording_id: &str,
    source: SourceKind,
    cursor: &AtomicU32,
    pending: &mut Vec<i16>,
    sample_rate: u32,
    channels: u16,
) {
    let index = cursor.load(Ordering::SeqCst);

    let payload = match encode_wav(pending, sample_rate, channels) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode chunk {}/{}: {}", source, index, e);
            return;
        }
    };

    let chunk = Chunk::new(recording_id, source, index, payload);
    match store.add_chunk(chunk).await {
        Ok(()) => {
            pending.clear();
            cursor.fetch_add(1, Ordering::SeqCst);
            debug!("Persisted chunk {}/{} for {}", source, index, recording_id);
        }
        Err(e) => {
            error!(
                "Failed to persist chunk {}/{} for {}: {}",
                source, index, recording_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_roundtrip() {
        let samples: Vec<i16> = (0..1600).map(|i| (i % 200) as i16).collect();
        let bytes = encode_wav(&samples, 16000, 1).unwrap();
        let (rate, channels, decoded) = decode_wav(&bytes).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(channels, 1);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_buffered_ms() {
        assert_eq!(buffered_ms(16000, 16000, 1), 1000);
        assert_eq!(buffered_ms(1600, 16000, 1), 100);
        assert_eq!(buffered_ms(3200, 16000, 2), 100);
        assert_eq!(buffered_ms(100, 0, 1), 0);
    }
}

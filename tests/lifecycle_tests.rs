// Integration tests for the recording state machine
//
// These drive the full lifecycle against the synthetic capture backend:
// start/stop, degraded mic-only capture, interruption detection and
// recovery, and forced teardown when a source refuses to stop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use huddle::audio::{AudioBackendConfig, BackendKind, CaptureEngineConfig, SynthSpec};
use huddle::lifecycle::{Recorder, RecorderConfig, RecorderState, StartOptions};
use huddle::store::{
    LifecycleSnapshot, MeetingStore, MemoryStore, Recording, RecordingStatus, SourceKind,
};

fn test_recorder(
    store: Arc<dyn MeetingStore>,
    spec: SynthSpec,
    stop_timeout: Duration,
) -> Arc<Recorder> {
    let config = RecorderConfig {
        engine: CaptureEngineConfig {
            backend: BackendKind::Synth(spec),
            audio: AudioBackendConfig {
                target_sample_rate: 16000,
                target_channels: 1,
                buffer_duration_ms: 10,
            },
            open_timeout: Duration::from_secs(5),
            system_audio: true,
        },
        chunk_duration: Duration::from_millis(200),
        flush_interval: Duration::from_millis(50),
        stop_timeout,
    };
    Recorder::new(store, config)
}

fn active_snapshot(recording_id: &str, cursors: BTreeMap<SourceKind, u32>) -> LifecycleSnapshot {
    LifecycleSnapshot {
        active: true,
        recording_id: recording_id.to_string(),
        elapsed_ms: 5000,
        cursors,
        language: None,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_full_recording_cycle() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let recorder = test_recorder(Arc::clone(&store), SynthSpec::default(), Duration::from_secs(2));

    assert_eq!(recorder.current_state().state, RecorderState::Idle);

    let outcome = recorder.start(StartOptions::default()).await?;
    assert_eq!(recorder.current_state().state, RecorderState::Recording);

    // The transition is durable: the snapshot is on disk before start returns.
    let snapshot = store.load_snapshot().await?.expect("snapshot must exist");
    assert!(snapshot.active);
    assert_eq!(snapshot.recording_id, outcome.recording_id);

    let recording = store.get(&outcome.recording_id).await?.expect("recording record");
    assert_eq!(recording.status, RecordingStatus::Local);

    tokio::time::sleep(Duration::from_millis(250)).await;

    let stopped = recorder.stop().await?;
    assert_eq!(stopped.recording_id, outcome.recording_id);
    assert!(stopped.duration_ms > 0);
    assert_eq!(recorder.current_state().state, RecorderState::Stopped);

    // Snapshot cleared only after cleanup; no interrupted state remains.
    assert!(store.load_snapshot().await?.is_none());
    assert!(!recorder.is_interrupted().await?);

    // Audio made it to the store as contiguous per-source sequences.
    let chunks = store.query_chunks(&outcome.recording_id).await?;
    assert!(!chunks.is_empty(), "stop must persist the remainder chunk");
    for source in [SourceKind::Microphone, SourceKind::System] {
        let indices: Vec<u32> = chunks
            .iter()
            .filter(|c| c.source == source)
            .map(|c| c.index)
            .collect();
        let expected: Vec<u32> = (0..indices.len() as u32).collect();
        assert_eq!(indices, expected, "indices for {} must be 0..n-1", source);
    }

    // Status is unchanged by stopping; sync is a separate step.
    let recording = store.get(&outcome.recording_id).await?.unwrap();
    assert_eq!(recording.status, RecordingStatus::Local);
    assert_eq!(recording.duration_ms, Some(stopped.duration_ms));

    Ok(())
}

#[tokio::test]
async fn test_system_source_failure_degrades_to_mic_only() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let spec = SynthSpec {
        fail_system: true,
        ..Default::default()
    };
    let recorder = test_recorder(Arc::clone(&store), spec, Duration::from_secs(2));

    // Start must succeed despite the system source failing.
    let outcome = recorder.start(StartOptions::default()).await?;
    assert!(outcome.degraded);
    assert!(outcome.warning.is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    recorder.stop().await?;

    let chunks = store.query_chunks(&outcome.recording_id).await?;
    assert!(!chunks.is_empty());
    assert!(
        chunks.iter().all(|c| c.source == SourceKind::Microphone),
        "a degraded recording carries only microphone chunks"
    );

    Ok(())
}

#[tokio::test]
async fn test_microphone_failure_aborts_start() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let spec = SynthSpec {
        deny_microphone: true,
        ..Default::default()
    };
    let recorder = test_recorder(Arc::clone(&store), spec, Duration::from_secs(2));

    let result = recorder.start(StartOptions::default()).await;
    assert!(result.is_err(), "no recording without a microphone");
    assert_eq!(recorder.current_state().state, RecorderState::Idle);
    assert!(store.load_snapshot().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_interrupted_detection_and_discard() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());

    store
        .put(Recording::new("rec-int".into(), "Interrupted".into(), None))
        .await?;
    store
        .save_snapshot(&active_snapshot("rec-int", BTreeMap::new()))
        .await?;

    // A fresh process: snapshot says active, no live handles.
    let recorder = test_recorder(Arc::clone(&store), SynthSpec::default(), Duration::from_secs(2));
    assert!(recorder.is_interrupted().await?);

    // Starting fresh is refused until the user chooses.
    assert!(recorder.start(StartOptions::default()).await.is_err());

    recorder.clear_interrupted().await?;
    assert!(!recorder.is_interrupted().await?);
    assert!(store.load_snapshot().await?.is_none());

    // Chunks are left intact for manual processing (none here, but the
    // recording record itself must survive the discard).
    assert!(store.get("rec-int").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_resume_continues_chunk_sequence() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());

    store
        .put(Recording::new("rec-res".into(), "Resumable".into(), None))
        .await?;
    let mut cursors = BTreeMap::new();
    cursors.insert(SourceKind::Microphone, 3u32);
    store
        .save_snapshot(&active_snapshot("rec-res", cursors))
        .await?;

    // Mic-only on resume keeps the index assertion simple.
    let spec = SynthSpec {
        fail_system: true,
        ..Default::default()
    };
    let recorder = test_recorder(Arc::clone(&store), spec, Duration::from_secs(2));

    let outcome = recorder.resume_interrupted().await?;
    assert_eq!(outcome.recording_id, "rec-res");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let stopped = recorder.stop().await?;

    // Elapsed time carries over from before the interruption.
    assert!(stopped.duration_ms >= 5000);

    let indices: Vec<u32> = store
        .query_chunks("rec-res")
        .await?
        .iter()
        .filter(|c| c.source == SourceKind::Microphone)
        .map(|c| c.index)
        .collect();

    assert!(!indices.is_empty());
    assert_eq!(indices[0], 3, "sequence must continue at the persisted cursor");
    for (offset, index) in indices.iter().enumerate() {
        assert_eq!(*index as usize, 3 + offset, "no gaps across resume");
    }

    assert!(store.load_snapshot().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_failed_resume_leaves_snapshot_intact() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());

    store
        .put(Recording::new("rec-keep".into(), "Keep me".into(), None))
        .await?;
    store
        .save_snapshot(&active_snapshot("rec-keep", BTreeMap::new()))
        .await?;

    let spec = SynthSpec {
        deny_microphone: true,
        ..Default::default()
    };
    let recorder = test_recorder(Arc::clone(&store), spec, Duration::from_secs(2));

    let result = recorder.resume_interrupted().await;
    assert!(result.is_err());

    // A transient device error must not cost recoverability.
    assert!(recorder.is_interrupted().await?);
    let snapshot = store.load_snapshot().await?.expect("snapshot preserved");
    assert!(snapshot.active);
    assert_eq!(snapshot.recording_id, "rec-keep");

    Ok(())
}

#[tokio::test]
async fn test_hung_stop_escalates_to_forced_teardown() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let spec = SynthSpec {
        hang_on_stop: true,
        ..Default::default()
    };
    // Short bounded wait so the test escalates quickly.
    let recorder = test_recorder(Arc::clone(&store), spec, Duration::from_millis(150));

    let outcome = recorder.start(StartOptions::default()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The graceful stop never acks; the bounded wait must force teardown
    // rather than hanging forever.
    let stopped =
        tokio::time::timeout(Duration::from_secs(5), recorder.stop()).await??;
    assert_eq!(stopped.recording_id, outcome.recording_id);

    assert_eq!(recorder.current_state().state, RecorderState::Stopped);
    assert!(store.load_snapshot().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_force_stop_without_graceful_wait() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let recorder = test_recorder(Arc::clone(&store), SynthSpec::default(), Duration::from_secs(2));

    let outcome = recorder.start(StartOptions::default()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped = recorder.force_stop().await?.expect("active recording");
    assert_eq!(stopped.recording_id, outcome.recording_id);
    assert!(store.load_snapshot().await?.is_none());

    // Force stop on an idle recorder is a no-op, not an error.
    assert!(recorder.force_stop().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_levels_are_best_effort() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let recorder = test_recorder(Arc::clone(&store), SynthSpec::default(), Duration::from_secs(2));

    assert!(recorder.levels().is_empty(), "idle recorder reads no levels");

    recorder.start(StartOptions::default()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let levels = recorder.levels();
    assert!(!levels.is_empty(), "recording exposes per-source levels");

    recorder.stop().await?;
    assert!(recorder.levels().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_subscription_publishes_transitions() -> Result<()> {
    let store: Arc<dyn MeetingStore> = Arc::new(MemoryStore::new());
    let recorder = test_recorder(Arc::clone(&store), SynthSpec::default(), Duration::from_secs(2));

    let rx = recorder.subscribe();
    assert_eq!(rx.borrow().state, RecorderState::Idle);

    recorder.start(StartOptions::default()).await?;
    assert_eq!(rx.borrow().state, RecorderState::Recording);
    assert!(rx.borrow().recording_id.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    recorder.stop().await?;
    assert_eq!(rx.borrow().state, RecorderState::Stopped);

    Ok(())
}

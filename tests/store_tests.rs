// Integration tests for the filesystem-backed store
//
// These verify durability across a simulated process restart (a second
// store instance over the same directory), per-record atomicity conventions,
// the compare-and-set status transition, and cascade deletion.

use anyhow::Result;
use chrono::Utc;
use huddle::store::{
    Chunk, JsonStore, LifecycleSnapshot, MeetingStore, Note, Recording, RecordingPatch,
    RecordingStatus, SourceKind,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn chunk(recording_id: &str, source: SourceKind, index: u32) -> Chunk {
    Chunk::new(recording_id, source, index, vec![index as u8; 64])
}

#[tokio::test]
async fn test_recording_roundtrip_and_patch() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    let rec = Recording::new("rec-1".into(), "Standup".into(), Some("en".into()));
    store.put(rec).await?;

    let loaded = store.get("rec-1").await?.expect("recording should load");
    assert_eq!(loaded.title, "Standup");
    assert_eq!(loaded.status, RecordingStatus::Local);
    assert_eq!(loaded.language.as_deref(), Some("en"));
    assert!(loaded.duration_ms.is_none());

    store
        .update_meta(
            "rec-1",
            RecordingPatch {
                duration_ms: Some(42_000),
                tags: Some(vec!["weekly".into()]),
                ..Default::default()
            },
        )
        .await?;

    let patched = store.get("rec-1").await?.unwrap();
    assert_eq!(patched.duration_ms, Some(42_000));
    assert_eq!(patched.tags, vec!["weekly".to_string()]);
    assert_eq!(patched.title, "Standup", "patch must not clobber other fields");

    assert!(store.get("missing").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_status_cas_enforces_legal_transitions() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store
        .put(Recording::new("rec-2".into(), "t".into(), None))
        .await?;

    // local -> sent is not a legal move.
    assert!(
        !store
            .transition_status("rec-2", &[RecordingStatus::Local], RecordingStatus::Sent)
            .await?
    );

    assert!(
        store
            .transition_status("rec-2", &[RecordingStatus::Local], RecordingStatus::Queued)
            .await?
    );

    // Expected-from mismatch leaves the record untouched.
    assert!(
        !store
            .transition_status("rec-2", &[RecordingStatus::Local], RecordingStatus::Queued)
            .await?
    );

    assert!(
        store
            .transition_status("rec-2", &[RecordingStatus::Queued], RecordingStatus::Sent)
            .await?
    );

    // Sent is terminal: no transition out, ever.
    assert!(
        !store
            .transition_status("rec-2", &[RecordingStatus::Sent], RecordingStatus::Local)
            .await?
    );
    assert!(
        !store
            .transition_status("rec-2", &[RecordingStatus::Sent], RecordingStatus::Queued)
            .await?
    );
    assert_eq!(store.get("rec-2").await?.unwrap().status, RecordingStatus::Sent);

    Ok(())
}

#[tokio::test]
async fn test_chunks_query_ordered_regardless_of_insertion() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store
        .put(Recording::new("rec-3".into(), "t".into(), None))
        .await?;

    // Insert out of order, interleaving sources.
    store.add_chunk(chunk("rec-3", SourceKind::System, 1)).await?;
    store.add_chunk(chunk("rec-3", SourceKind::Microphone, 2)).await?;
    store.add_chunk(chunk("rec-3", SourceKind::Microphone, 0)).await?;
    store.add_chunk(chunk("rec-3", SourceKind::System, 0)).await?;
    store.add_chunk(chunk("rec-3", SourceKind::Microphone, 1)).await?;

    let chunks = store.query_chunks("rec-3").await?;
    let order: Vec<(SourceKind, u32)> = chunks.iter().map(|c| (c.source, c.index)).collect();

    assert_eq!(
        order,
        vec![
            (SourceKind::Microphone, 0),
            (SourceKind::Microphone, 1),
            (SourceKind::Microphone, 2),
            (SourceKind::System, 0),
            (SourceKind::System, 1),
        ]
    );

    // Payloads survive the trip through the payload files.
    assert_eq!(chunks[0].payload, vec![0u8; 64]);
    assert_eq!(chunks[2].payload, vec![2u8; 64]);

    Ok(())
}

#[tokio::test]
async fn test_delete_cascades_to_chunks_and_note() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store
        .put(Recording::new("rec-4".into(), "t".into(), None))
        .await?;
    store.add_chunk(chunk("rec-4", SourceKind::Microphone, 0)).await?;
    store
        .put_note(Note {
            recording_id: "rec-4".into(),
            transcript: "words".into(),
            summary: "gist".into(),
            created_at: Utc::now(),
        })
        .await?;

    store.delete("rec-4").await?;

    assert!(store.get("rec-4").await?.is_none());
    assert!(store.get_note("rec-4").await?.is_none());
    assert!(store.query_chunks("rec-4").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_chunks_keeps_recording_and_note() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store
        .put(Recording::new("rec-5".into(), "t".into(), None))
        .await?;
    store.add_chunk(chunk("rec-5", SourceKind::Microphone, 0)).await?;
    store
        .put_note(Note {
            recording_id: "rec-5".into(),
            transcript: "words".into(),
            summary: "gist".into(),
            created_at: Utc::now(),
        })
        .await?;

    store.delete_chunks("rec-5").await?;

    assert!(store.query_chunks("rec-5").await?.is_empty());
    assert!(store.get("rec-5").await?.is_some());
    assert!(store.get_note("rec-5").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_note_is_replaced_whole() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store
        .put_note(Note {
            recording_id: "rec-6".into(),
            transcript: "first pass".into(),
            summary: String::new(),
            created_at: Utc::now(),
        })
        .await?;

    store
        .put_note(Note {
            recording_id: "rec-6".into(),
            transcript: "second pass".into(),
            summary: "now complete".into(),
            created_at: Utc::now(),
        })
        .await?;

    let note = store.get_note("rec-6").await?.unwrap();
    assert_eq!(note.transcript, "second pass");
    assert_eq!(note.summary, "now complete");
    assert!(note.is_complete());

    Ok(())
}

#[tokio::test]
async fn test_snapshot_save_load_clear() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    assert!(store.load_snapshot().await?.is_none());

    let mut cursors = BTreeMap::new();
    cursors.insert(SourceKind::Microphone, 7u32);
    cursors.insert(SourceKind::System, 4u32);

    store
        .save_snapshot(&LifecycleSnapshot {
            active: true,
            recording_id: "rec-7".into(),
            elapsed_ms: 90_000,
            cursors: cursors.clone(),
            language: Some("de".into()),
            updated_at: Utc::now(),
        })
        .await?;

    let snapshot = store.load_snapshot().await?.expect("snapshot should load");
    assert!(snapshot.active);
    assert_eq!(snapshot.recording_id, "rec-7");
    assert_eq!(snapshot.cursors, cursors);

    store.clear_snapshot().await?;
    assert!(store.load_snapshot().await?.is_none());
    // Clearing twice is fine.
    store.clear_snapshot().await?;

    Ok(())
}

#[tokio::test]
async fn test_data_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;

    {
        let store = JsonStore::open(dir.path())?;
        store
            .put(Recording::new("rec-8".into(), "Persistent".into(), None))
            .await?;
        store.add_chunk(chunk("rec-8", SourceKind::Microphone, 0)).await?;
        store.add_chunk(chunk("rec-8", SourceKind::Microphone, 1)).await?;
        store
            .save_snapshot(&LifecycleSnapshot {
                active: true,
                recording_id: "rec-8".into(),
                elapsed_ms: 1000,
                cursors: BTreeMap::new(),
                language: None,
                updated_at: Utc::now(),
            })
            .await?;
    }

    // Simulated restart: a fresh store over the same directory.
    let store = JsonStore::open(dir.path())?;

    let rec = store.get("rec-8").await?.expect("recording survives restart");
    assert_eq!(rec.title, "Persistent");

    let chunks = store.query_chunks("rec-8").await?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].index, 0);
    assert_eq!(chunks[1].index, 1);

    let snapshot = store.load_snapshot().await?.expect("snapshot survives restart");
    assert!(snapshot.active);
    assert_eq!(snapshot.recording_id, "rec-8");

    Ok(())
}

#[tokio::test]
async fn test_query_by_status_filters() -> Result<()> {
    let dir = TempDir::new()?;
    let store = JsonStore::open(dir.path())?;

    store.put(Recording::new("a".into(), "t".into(), None)).await?;
    store.put(Recording::new("b".into(), "t".into(), None)).await?;
    store.put(Recording::new("c".into(), "t".into(), None)).await?;

    store
        .transition_status("b", &[RecordingStatus::Local], RecordingStatus::Queued)
        .await?;
    store
        .transition_status("c", &[RecordingStatus::Local], RecordingStatus::Queued)
        .await?;
    store
        .transition_status("c", &[RecordingStatus::Queued], RecordingStatus::Sent)
        .await?;

    let local = store.query_by_status(RecordingStatus::Local).await?;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, "a");

    let queued = store.query_by_status(RecordingStatus::Queued).await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, "b");

    let sent = store.query_by_status(RecordingStatus::Sent).await?;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, "c");

    assert_eq!(store.list_recordings().await?.len(), 3);

    Ok(())
}

use super::state::AppState;
use crate::audio::{self, DeviceInfo};
use crate::lifecycle::{RecorderState, StartOptions, StateSignal};
use crate::store::{Note, Recording, SourceKind};
use crate::sync::SyncOutcome;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct StartRecordingRequest {
    /// Preferred microphone device id (default input when omitted)
    pub mic_device_id: Option<String>,

    /// Language hint forwarded to the processing service
    pub language: Option<String>,

    /// Display title (a timestamped default is derived when omitted)
    pub title: Option<String>,

    /// Attempt the best-effort system-audio source (default: true)
    pub system_audio: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RecorderStateResponse {
    #[serde(flatten)]
    pub signal: StateSignal,
    pub interrupted: bool,
}

#[derive(Debug, Serialize)]
pub struct LevelReading {
    pub source: SourceKind,
    pub level: f32,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub inputs: Vec<DeviceInfo>,
    pub output_capable: Vec<DeviceInfo>,
}

#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    #[serde(flatten)]
    pub recording: Recording,
    pub note: Option<Note>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub meeting_id: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Recorder handlers
// ============================================================================

/// POST /recorder/start
/// Start a new recording session
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    if state.recorder.current_state().state == RecorderState::Recording {
        return error_response(StatusCode::CONFLICT, "a recording is already in progress");
    }

    let options = StartOptions {
        mic_device_id: req.mic_device_id,
        language: req.language,
        title: req.title,
        system_audio: req.system_audio.unwrap_or(true),
    };

    match state.recorder.start(options).await {
        Ok(outcome) => {
            info!("Recording started via HTTP: {}", outcome.recording_id);
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            error!("Failed to start recording: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to start recording: {:#}", e),
            )
        }
    }
}

/// POST /recorder/stop
/// Stop the active recording session
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.recorder.stop().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            error!("Failed to stop recording: {:#}", e);
            error_response(StatusCode::CONFLICT, format!("{:#}", e))
        }
    }
}

/// POST /recorder/force-stop
/// Emergency teardown of the active recording, without graceful wait
pub async fn force_stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.recorder.force_stop().await {
        Ok(Some(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(None) => error_response(StatusCode::CONFLICT, "no active recording"),
        Err(e) => {
            error!("Force stop failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// POST /recorder/resume
/// Resume an interrupted recording under its original identifier
pub async fn resume_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.recorder.resume_interrupted().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            error!("Failed to resume recording: {:#}", e);
            error_response(StatusCode::CONFLICT, format!("{:#}", e))
        }
    }
}

/// POST /recorder/discard
/// Abandon the interrupted recording; persisted chunks are kept
pub async fn discard_interrupted(State(state): State<AppState>) -> impl IntoResponse {
    match state.recorder.clear_interrupted().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, format!("{:#}", e)),
    }
}

/// GET /recorder/state
/// Current state machine signal plus the interrupted flag
pub async fn recorder_state(State(state): State<AppState>) -> impl IntoResponse {
    let signal = state.recorder.current_state();
    let interrupted = state.recorder.is_interrupted().await.unwrap_or(false);

    (
        StatusCode::OK,
        Json(RecorderStateResponse {
            signal,
            interrupted,
        }),
    )
        .into_response()
}

/// GET /recorder/levels
/// Live per-source signal levels for VU meters. Best-effort; never fails.
pub async fn recorder_levels(State(state): State<AppState>) -> impl IntoResponse {
    let levels: Vec<LevelReading> = state
        .recorder
        .levels()
        .into_iter()
        .map(|(source, level)| LevelReading { source, level })
        .collect();

    (StatusCode::OK, Json(levels))
}

// ============================================================================
// Device handlers
// ============================================================================

/// GET /devices
/// Enumerate input devices and output-capable (loopback) sources
pub async fn list_devices() -> impl IntoResponse {
    let result = tokio::task::spawn_blocking(|| {
        let inputs = audio::list_input_devices()?;
        let output_capable = audio::list_output_capable_sources()?;
        Ok::<_, crate::error::CaptureError>(DeviceListResponse {
            inputs,
            output_capable,
        })
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Meeting handlers
// ============================================================================

/// GET /meetings
/// List all recordings, newest first
pub async fn list_meetings(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_recordings().await {
        Ok(recordings) => (StatusCode::OK, Json(recordings)).into_response(),
        Err(e) => {
            error!("Failed to list recordings: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// GET /meetings/:meeting_id
/// One recording with its note, if processing completed
pub async fn get_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> impl IntoResponse {
    let recording = match state.store.get(&meeting_id).await {
        Ok(Some(rec)) => rec,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("Meeting {} not found", meeting_id),
            )
        }
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    };

    let note = state.store.get_note(&meeting_id).await.unwrap_or(None);

    (StatusCode::OK, Json(MeetingResponse { recording, note })).into_response()
}

/// DELETE /meetings/:meeting_id
/// Delete a recording, cascading to its chunks and note
pub async fn delete_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&meeting_id).await {
        Ok(()) => {
            info!("Deleted meeting {}", meeting_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            error!("Failed to delete meeting {}: {:#}", meeting_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// DELETE /meetings/:meeting_id/audio
/// Delete audio chunks only; recording metadata and note stay
pub async fn delete_meeting_audio(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_chunks(&meeting_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Failed to delete audio for {}: {:#}", meeting_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

// ============================================================================
// Sync handlers
// ============================================================================

/// POST /meetings/:meeting_id/sync
/// Submit one recording to the processing service
pub async fn sync_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
) -> impl IntoResponse {
    match state.sync.sync_recording(&meeting_id).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SyncResponse {
                meeting_id,
                outcome,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Sync failed for {}: {:#}", meeting_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// POST /meetings/sync
/// Sync every pending recording
pub async fn sync_all(State(state): State<AppState>) -> impl IntoResponse {
    let cancel = AtomicBool::new(false);

    match state.sync.sync_pending(&cancel).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Bulk sync failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

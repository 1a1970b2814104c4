//! The remote processing collaborator: an opaque, potentially slow RPC that
//! turns reassembled audio into a transcript and summary.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::store::SourceKind;

/// One reassembled audio document for one source type.
#[derive(Debug, Clone)]
pub struct SourcePayload {
    pub source: SourceKind,
    /// Complete WAV document.
    pub wav: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub recording_id: String,
    pub language: Option<String>,
    pub payloads: Vec<SourcePayload>,
}

impl ProcessRequest {
    pub fn total_bytes(&self) -> usize {
        self.payloads.iter().map(|p| p.wav.len()).sum()
    }
}

/// Successful processing result; canonical duration and title are optional
/// refinements over locally measured values.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub transcript: String,
    pub summary: String,
    pub duration_ms: Option<u64>,
    pub title: Option<String>,
}

#[async_trait::async_trait]
pub trait RemoteProcessor: Send + Sync {
    async fn process(&self, request: &ProcessRequest) -> Result<ProcessOutcome, SyncError>;
}

// ============================================================================
// NATS request/reply implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct ProcessRequestMessage {
    recording_id: String,
    language: Option<String>,
    sources: Vec<SourcePayloadMessage>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct SourcePayloadMessage {
    source: SourceKind,
    /// Base64-encoded WAV bytes
    wav: String,
}

#[derive(Debug, Deserialize)]
struct ProcessReplyMessage {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    summary: String,
    duration_ms: Option<u64>,
    title: Option<String>,
    /// Set when the service rejected the request.
    error: Option<String>,
}

pub struct NatsProcessor {
    client: async_nats::Client,
    subject: String,
    max_payload_bytes: usize,
}

impl NatsProcessor {
    pub async fn connect(
        url: &str,
        subject: &str,
        max_payload_bytes: usize,
    ) -> anyhow::Result<Self> {
        info!("Connecting to processing service at {}", url);

        let client = async_nats::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to NATS: {}", e))?;

        info!("Connected to processing service");

        Ok(Self {
            client,
            subject: subject.to_string(),
            max_payload_bytes,
        })
    }
}

#[async_trait::async_trait]
impl RemoteProcessor for NatsProcessor {
    async fn process(&self, request: &ProcessRequest) -> Result<ProcessOutcome, SyncError> {
        let size = request.total_bytes();
        if size > self.max_payload_bytes {
            return Err(SyncError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        let message = ProcessRequestMessage {
            recording_id: request.recording_id.clone(),
            language: request.language.clone(),
            sources: request
                .payloads
                .iter()
                .map(|p| SourcePayloadMessage {
                    source: p.source,
                    wav: base64::engine::general_purpose::STANDARD.encode(&p.wav),
                })
                .collect(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let body = serde_json::to_vec(&message)
            .map_err(|e| SyncError::BadPayload(e.to_string()))?;

        debug!(
            "Submitting {} ({} sources, {} audio bytes) to {}",
            request.recording_id,
            request.payloads.len(),
            size,
            self.subject
        );

        let reply = self
            .client
            .request(self.subject.clone(), body.into())
            .await
            .map_err(|e| match e.kind() {
                async_nats::RequestErrorKind::TimedOut
                | async_nats::RequestErrorKind::NoResponders => {
                    SyncError::Unreachable(e.to_string())
                }
                _ => SyncError::Server(e.to_string()),
            })?;

        let parsed: ProcessReplyMessage = serde_json::from_slice(&reply.payload)
            .map_err(|e| SyncError::Server(format!("unparseable reply: {}", e)))?;

        if let Some(error) = parsed.error {
            let lower = error.to_lowercase();
            return Err(if lower.contains("unauthorized") || lower.contains("auth") {
                SyncError::Unauthorized
            } else if lower.contains("too large") || lower.contains("payload") {
                SyncError::PayloadTooLarge {
                    size,
                    limit: self.max_payload_bytes,
                }
            } else {
                SyncError::Server(error)
            });
        }

        Ok(ProcessOutcome {
            transcript: parsed.transcript,
            summary: parsed.summary,
            duration_ms: parsed.duration_ms,
            title: parsed.title,
        })
    }
}

use std::sync::Arc;

use crate::lifecycle::Recorder;
use crate::store::MeetingStore;
use crate::sync::SyncEngine;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<Recorder>,
    pub sync: Arc<SyncEngine>,
    pub store: Arc<dyn MeetingStore>,
}

impl AppState {
    pub fn new(
        recorder: Arc<Recorder>,
        sync: Arc<SyncEngine>,
        store: Arc<dyn MeetingStore>,
    ) -> Self {
        Self {
            recorder,
            sync,
            store,
        }
    }
}

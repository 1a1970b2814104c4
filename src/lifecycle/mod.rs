//! Recording lifecycle: the state machine, crash recovery via the
//! persisted snapshot, and guaranteed release of capture resources.

mod cleanup;
mod recorder;

pub use cleanup::CleanupManager;
pub use recorder::{
    Recorder, RecorderConfig, RecorderState, StartOptions, StartOutcome, StateSignal, StopOutcome,
};

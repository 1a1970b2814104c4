//! HTTP surface exposed to the UI/host shell.
//!
//! The UI itself lives elsewhere; this module only carries the imperative
//! entry points (start/stop/resume/discard), the state subscription
//! endpoint, and read accessors for meetings and live levels.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

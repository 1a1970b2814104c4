//! Resource cleanup manager.
//!
//! Guarantees OS audio handles are released even when a stop primitive
//! hangs: graceful stop races a bounded timeout, and on expiry every handle
//! is force-closed directly. Cleanup errors are logged and swallowed —
//! releasing resources best-effort always beats crashing the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::audio::CaptureSession;
use crate::error::CaptureError;

pub struct CleanupManager {
    stop_timeout: Duration,
    in_flight: AtomicBool,
    done: Notify,
}

impl CleanupManager {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            stop_timeout,
            in_flight: AtomicBool::new(false),
            done: Notify::new(),
        }
    }

    /// Graceful teardown: final flush, stop signal, bounded wait, escalate.
    ///
    /// Concurrent callers collapse into the one in-flight cleanup: they wait
    /// for it to finish instead of racing a second teardown.
    pub async fn stop(&self, session: &mut CaptureSession) {
        let notified = self.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Cleanup already in flight, waiting for it");
            notified.await;
            return;
        }

        // Drain buffered audio before asking the sources to stop.
        for handle in session.handles_mut().iter() {
            handle.flush();
        }

        for handle in session.handles_mut().iter_mut() {
            let kind = handle.kind;
            match tokio::time::timeout(self.stop_timeout, handle.stop()).await {
                Ok(Ok(())) => debug!("Source {} stopped cleanly", kind),
                Ok(Err(e)) => {
                    warn!("Source {} failed to stop ({}), force-closing", kind, e);
                    handle.force_close();
                }
                Err(_) => {
                    warn!("Source {}: {}", kind, CaptureError::CleanupTimeout);
                    handle.force_close();
                }
            }
        }

        // Forwarders and the monitor mixer exit on their own once the
        // backend channels close; nothing periodic may outlive the handles.
        session.handles_mut().clear();

        info!("Capture resources released");

        self.in_flight.store(false, Ordering::SeqCst);
        self.done.notify_waiters();
    }

    /// Emergency teardown: close every handle without waiting for any
    /// acknowledgment. For when the graceful path is known to be stuck.
    pub fn force_stop(&self, session: &mut CaptureSession) {
        warn!("Forced capture teardown");

        for handle in session.handles_mut().iter_mut() {
            handle.force_close();
        }
        session.handles_mut().clear();
        session.abort_tasks();

        self.in_flight.store(false, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

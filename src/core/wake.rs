//! Wake signalling for the background sweeper.
//!
//! Completions and cancellations raise a flag and notify a `Condvar`; the
//! sweeper thread waits on it with the sweep interval as timeout, so it runs
//! immediately on events and periodically as a safety net.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why a sweeper wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Someone asked for a sweep.
    Requested,
    /// The interval elapsed with no request.
    Timer,
    /// Shutdown was signalled.
    Shutdown,
}

#[derive(Debug, Default)]
struct WakeState {
    sweep_requested: bool,
    shutdown: bool,
}

/// Flag + condvar pair shared by the engine, the facade and the sweeper.
#[derive(Debug, Default)]
pub struct SweepSignal {
    state: Mutex<WakeState>,
    condvar: Condvar,
}

impl SweepSignal {
    /// New signal with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a sweep.
    pub fn notify(&self) {
        self.state.lock().sweep_requested = true;
        self.condvar.notify_one();
    }

    /// Tell the sweeper to exit.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Wait for a request, shutdown, or `interval` to pass. Consumes a
    /// pending request.
    pub fn wait(&self, interval: Duration) -> WakeReason {
        let mut state = self.state.lock();
        if !state.sweep_requested && !state.shutdown {
            let _ = self.condvar.wait_for(&mut state, interval);
        }
        if state.shutdown {
            return WakeReason::Shutdown;
        }
        if std::mem::take(&mut state.sweep_requested) {
            WakeReason::Requested
        } else {
            WakeReason::Timer
        }
    }
}

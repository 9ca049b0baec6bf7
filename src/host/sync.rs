//! Blocking synchronization flags for the boot/shutdown handshake.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A manual-reset signal flag.
///
/// Once set, the flag stays set and every current and future waiter is
/// released. The host uses one pair per addin: the runner sets the *boot*
/// flag once in-context boot finished, and the supervisor sets the
/// *shutdown* flag to request cooperative teardown.
#[derive(Default)]
pub struct SignalFlag {
    state: Mutex<bool>,
    cond: Condvar,
}

impl SignalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all waiters.
    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Block until the flag is set.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        self.cond.wait_while(&mut state, |set| !*set);
    }

    /// Block until the flag is set or `timeout` elapses.
    ///
    /// Returns `true` if the flag was set within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let result = self.cond.wait_while_for(&mut state, |set| !*set, timeout);
        !result.timed_out()
    }
}

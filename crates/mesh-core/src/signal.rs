//! Latched signal flags: the event loop polls these
//! once per tick rather than acting inside a signal handler. Each flag
//! latches until explicitly taken, so a signal delivered between polls is
//! never lost.

use std::cell::Cell;
use std::rc::Rc;

/// What a caught signal asks the event loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRequest {
    /// `SIGUSR1`: soft restart — halt every instance but keep listening,
    /// re-reading configuration on the next accept cycle.
    SoftRestart,
    /// `SIGHUP`: hard restart — drain every instance and exit, the same as
    /// `Terminate`, expecting an external supervisor to re-exec the process
    /// with freshly read configuration.
    Reload,
    /// `SIGTERM`/`SIGINT`: drain every instance and exit once the last one
    /// closes.
    Terminate,
}

#[derive(Default)]
struct Flags {
    soft_restart: Cell<bool>,
    reload: Cell<bool>,
    terminate: Cell<bool>,
}

/// A cheaply cloned handle shared between the OS signal-handling tasks and
/// the event loop's per-tick poll.
#[derive(Clone, Default)]
pub struct SignalLatch {
    flags: Rc<Flags>,
}

impl SignalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_soft_restart(&self) {
        self.flags.soft_restart.set(true);
    }

    pub fn request_reload(&self) {
        self.flags.reload.set(true);
    }

    pub fn request_terminate(&self) {
        self.flags.terminate.set(true);
    }

    /// Drains every latched request, in priority order (terminate first: a
    /// shutdown request outranks a reload that raced it).
    pub fn take_all(&self) -> Vec<SignalRequest> {
        let mut out = Vec::new();
        if self.flags.terminate.replace(false) {
            out.push(SignalRequest::Terminate);
        }
        if self.flags.soft_restart.replace(false) {
            out.push(SignalRequest::SoftRestart);
        }
        if self.flags.reload.replace(false) {
            out.push(SignalRequest::Reload);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        !self.flags.terminate.get() && !self.flags.soft_restart.get() && !self.flags.reload.get()
    }
}

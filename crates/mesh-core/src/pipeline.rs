//! The core's contract with the opaque cryptographic/packet-processing
//! context. The core never inspects ciphertext or plaintext payloads
//! itself — it only calls these five entry points and reacts to the
//! [`PipelineAction`] each reports.

use std::time::Instant;

/// What the core should do in response to a context call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineAction {
    /// Continue normally.
    Ok,
    /// Keep the connection, but discard any queued state.
    SoftReset,
    /// Terminate the instance.
    HardFail,
    /// Advisory only — the core takes no action.
    RekeyRequested,
}

/// What a context wants the event loop to do on its behalf before its next
/// scheduled wake-up (stream-mode I/O interest).
#[derive(Debug, Clone, Copy)]
pub struct PreSelect {
    pub next_wake: Option<Instant>,
    pub wants_read: bool,
    pub wants_write: bool,
}

/// The opaque per-client cryptographic/compression/fragmentation state. A
/// concrete implementation owns the TLS control channel, AEAD/HMAC packet
/// transforms, and any compression — none of which the core is specified to
/// understand; it only drives these entry points.
pub trait CipherContext {
    /// Consumes a ciphertext frame read from the link. Returns a plaintext
    /// inner frame when the record was a data packet, `None` for a
    /// control/handshake record.
    fn process_incoming_link(&mut self, buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction);

    /// Consumes a plaintext inner frame read from the TUN/TAP device, queuing
    /// ciphertext internally for a later [`Self::process_outgoing_link`] call.
    fn process_incoming_tun(&mut self, inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction);

    /// Serializes whatever ciphertext is currently pending, if any.
    fn process_outgoing_link(&mut self) -> Option<Vec<u8>>;

    /// Serializes whatever plaintext inner frame is currently pending, if any.
    fn process_outgoing_tun(&mut self) -> Option<Vec<u8>>;

    /// Reports when this context next needs CPU and what I/O interest it has.
    fn pre_select(&mut self, now: Instant) -> PreSelect;

    /// Whether the handshake has completed and data flow is permitted.
    fn connection_established(&self) -> bool;
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A context that never produces output and is always established;
    /// sufficient for exercising registry/scheduler/routing behavior without
    /// a real cryptographic implementation.
    pub struct NoopContext;

    impl CipherContext for NoopContext {
        fn process_incoming_link(&mut self, _buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (None, PipelineAction::Ok)
        }

        fn process_incoming_tun(&mut self, _inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (None, PipelineAction::Ok)
        }

        fn process_outgoing_link(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn process_outgoing_tun(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn pre_select(&mut self, now: Instant) -> PreSelect {
            // Never expires on its own; exercises registry/scheduler/routing
            // behavior without a context that models a real keepalive policy.
            PreSelect {
                next_wake: Some(now + std::time::Duration::from_secs(3600)),
                wants_read: false,
                wants_write: false,
            }
        }

        fn connection_established(&self) -> bool {
            true
        }
    }

    /// A context that echoes whatever inner frame it receives straight back
    /// out as its own ciphertext, used to simulate a peer that is always
    /// ready to produce link output (for broadcaster/C2C tests).
    pub struct EchoContext {
        pending_link: Option<Vec<u8>>,
    }

    impl Default for EchoContext {
        fn default() -> Self {
            Self { pending_link: None }
        }
    }

    impl CipherContext for EchoContext {
        fn process_incoming_link(&mut self, buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (Some(buf.to_vec()), PipelineAction::Ok)
        }

        fn process_incoming_tun(&mut self, inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            self.pending_link = Some(inner.to_vec());
            (None, PipelineAction::Ok)
        }

        fn process_outgoing_link(&mut self) -> Option<Vec<u8>> {
            self.pending_link.take()
        }

        fn process_outgoing_tun(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn pre_select(&mut self, now: Instant) -> PreSelect {
            PreSelect {
                next_wake: Some(now + std::time::Duration::from_secs(3600)),
                wants_read: false,
                wants_write: false,
            }
        }

        fn connection_established(&self) -> bool {
            true
        }
    }

    /// A context that behaves like [`EchoContext`] for link traffic but
    /// reports [`PipelineAction::HardFail`] the moment it is asked to carry a
    /// forwarded C2C frame, simulating a peer whose cryptographic state
    /// cannot accept client-to-client traffic.
    #[derive(Default)]
    pub struct HardFailOnTunContext {
        pending_link: Option<Vec<u8>>,
    }

    impl CipherContext for HardFailOnTunContext {
        fn process_incoming_link(&mut self, buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (Some(buf.to_vec()), PipelineAction::Ok)
        }

        fn process_incoming_tun(&mut self, _inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (None, PipelineAction::HardFail)
        }

        fn process_outgoing_link(&mut self) -> Option<Vec<u8>> {
            self.pending_link.take()
        }

        fn process_outgoing_tun(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn pre_select(&mut self, now: Instant) -> PreSelect {
            PreSelect {
                next_wake: Some(now + std::time::Duration::from_secs(3600)),
                wants_read: false,
                wants_write: false,
            }
        }

        fn connection_established(&self) -> bool {
            true
        }
    }

    /// A context that reassembles one incoming link record into several
    /// plaintext inner frames, queued for `process_outgoing_tun` rather than
    /// returned directly from `process_incoming_link` — exercises the drain
    /// loop that pulls every pending frame off a context, not just the one
    /// returned inline.
    #[derive(Default)]
    pub struct FragmentingContext {
        pending_tun: std::collections::VecDeque<Vec<u8>>,
    }

    impl FragmentingContext {
        pub fn queue_tun_frame(&mut self, frame: Vec<u8>) {
            self.pending_tun.push_back(frame);
        }
    }

    impl CipherContext for FragmentingContext {
        fn process_incoming_link(&mut self, _buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (None, PipelineAction::Ok)
        }

        fn process_incoming_tun(&mut self, _inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
            (None, PipelineAction::Ok)
        }

        fn process_outgoing_link(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn process_outgoing_tun(&mut self) -> Option<Vec<u8>> {
            self.pending_tun.pop_front()
        }

        fn pre_select(&mut self, now: Instant) -> PreSelect {
            PreSelect {
                next_wake: Some(now + std::time::Duration::from_secs(3600)),
                wants_read: false,
                wants_write: false,
            }
        }

        fn connection_established(&self) -> bool {
            true
        }
    }
}

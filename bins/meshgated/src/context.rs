//! The default [`CipherContext`]: a cleartext pass-through. Building a real
//! TLS/AEAD control channel is out of scope for this crate;
//! this context lets the event loop, routing, and broadcast machinery run
//! end to end against a trusted transport (e.g. a wireguard-protected
//! underlay, or a lab network) until a real one is wired in.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use mesh_core::{CipherContext, PipelineAction, PreSelect};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct PassthroughContext {
    pending_link: VecDeque<Vec<u8>>,
    pending_tun: VecDeque<Vec<u8>>,
}

impl CipherContext for PassthroughContext {
    fn process_incoming_link(&mut self, buf: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
        (Some(buf.to_vec()), PipelineAction::Ok)
    }

    fn process_incoming_tun(&mut self, inner: &[u8]) -> (Option<Vec<u8>>, PipelineAction) {
        self.pending_link.push_back(inner.to_vec());
        (None, PipelineAction::Ok)
    }

    fn process_outgoing_link(&mut self) -> Option<Vec<u8>> {
        self.pending_link.pop_front()
    }

    fn process_outgoing_tun(&mut self) -> Option<Vec<u8>> {
        self.pending_tun.pop_front()
    }

    fn pre_select(&mut self, now: Instant) -> PreSelect {
        PreSelect {
            next_wake: Some(now + KEEPALIVE_INTERVAL),
            wants_read: false,
            wants_write: false,
        }
    }

    fn connection_established(&self) -> bool {
        true
    }
}

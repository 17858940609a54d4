use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::addr::{InnerAddr, OuterAddr};
use crate::pipeline::CipherContext;
use crate::transport::StreamReassembler;

/// Monotonically increasing identity for a [`ClientInstance`], used as the
/// key in the scheduler's back-index and the deferred-buffer set — cheaper
/// to hash and compare than cloning the instance's [`OuterAddr`] everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Read/write interest a stream-mode instance currently has registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoInterest {
    pub read: bool,
    pub write: bool,
}

/// Per-[`ClientInstance`] lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, no virtual address assigned yet.
    Unassigned,
    /// The cipher context is performing its handshake.
    Authenticating,
    /// Data flow is active.
    Established,
    /// `halt` is set; draining references before being freed.
    Halting,
}

/// One live client session: its cryptographic context, virtual address, and
/// scheduler entry. Shared via [`InstanceHandle`] between the registry's
/// three views, the scheduler, and any routes that name it — Rust's `Rc`
/// strong count stands in for an explicit refcount, so nothing
/// separate is tracked for it.
pub struct ClientInstance {
    id: InstanceId,
    pub real: OuterAddr,
    pub vaddr: Option<InnerAddr>,
    pub state: InstanceState,
    pub halt: bool,
    pub created: Instant,
    pub wakeup: Instant,
    /// Back-index into the scheduler's heap array, so `update`/`remove` run
    /// in O(log N) instead of scanning for this instance's entry.
    pub heap_index: Option<usize>,

    pub tcp_rwflags: IoInterest,
    pub tcp_queue_len: usize,
    /// Present only when this instance's real address is reached over a
    /// stream transport; `None` for datagram peers.
    pub reassembler: Option<StreamReassembler>,

    pub connection_established: bool,
    pub did_open_context: bool,

    pub context: Box<dyn CipherContext>,
    pub msg_prefix: String,

    pub bytes_in: u64,
    pub bytes_out: u64,
    pub format_errors: u64,
    /// Frames dropped because a destination's deferred-write queue was
    /// already at `tcp_queue_limit`, or because the broadcaster's copy to
    /// this instance overflowed it.
    pub backpressure_drops: u64,
}

/// Shared ownership handle. The final `Rc` release drops the instance's
/// arena (its `context` and any buffers it still owned).
pub type InstanceHandle = Rc<RefCell<ClientInstance>>;

impl ClientInstance {
    pub fn new(real: OuterAddr, context: Box<dyn CipherContext>, now: Instant) -> InstanceHandle {
        let id = InstanceId::next();
        let msg_prefix = format!("{real}");
        Rc::new(RefCell::new(Self {
            id,
            real,
            vaddr: None,
            state: InstanceState::Unassigned,
            halt: false,
            created: now,
            wakeup: now,
            heap_index: None,
            tcp_rwflags: IoInterest::default(),
            tcp_queue_len: 0,
            connection_established: false,
            did_open_context: false,
            context,
            msg_prefix,
            bytes_in: 0,
            bytes_out: 0,
            format_errors: 0,
            backpressure_drops: 0,
        }))
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        !self.halt
    }

    pub fn mark_halt(&mut self) {
        self.halt = true;
        self.state = InstanceState::Halting;
    }
}

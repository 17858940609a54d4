//! Per-instance deferred write queues. When a stream-mode link socket
//! can't absorb a whole ciphertext record in one write, the remainder is
//! queued here and retried the next time the event loop sees the socket as
//! writable, FIFO within each instance.

use std::collections::{HashMap, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::instance::InstanceId;

/// Holds each instance's pending outbound records, enforcing a per-instance
/// cap so one slow peer can't grow memory without bound.
pub struct DeferredBufferSet {
    queues: HashMap<InstanceId, VecDeque<Vec<u8>>>,
    queue_limit: usize,
}

impl DeferredBufferSet {
    pub fn new(queue_limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            queue_limit,
        }
    }

    /// Appends `record` to `id`'s queue. Fails with
    /// [`CoreError::DeferredQueueOverflow`] once the queue is already at
    /// its limit — the caller is expected to halt that instance.
    pub fn push(&mut self, id: InstanceId, record: Vec<u8>) -> CoreResult<()> {
        let queue = self.queues.entry(id).or_default();
        if queue.len() >= self.queue_limit {
            return Err(CoreError::DeferredQueueOverflow);
        }
        queue.push_back(record);
        Ok(())
    }

    /// Pops the oldest pending record for `id`, if any.
    pub fn pop_front(&mut self, id: InstanceId) -> Option<Vec<u8>> {
        let record = self.queues.get_mut(&id).and_then(VecDeque::pop_front);
        if self.queues.get(&id).is_some_and(VecDeque::is_empty) {
            self.queues.remove(&id);
        }
        record
    }

    pub fn has_pending(&self, id: InstanceId) -> bool {
        self.queues.get(&id).is_some_and(|q| !q.is_empty())
    }

    pub fn queue_len(&self, id: InstanceId) -> usize {
        self.queues.get(&id).map(VecDeque::len).unwrap_or(0)
    }

    /// Drops `id`'s entire queue, e.g. when the instance halts.
    pub fn clear(&mut self, id: InstanceId) {
        self.queues.remove(&id);
    }
}

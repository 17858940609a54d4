use std::time::Instant;

use crate::instance::InstanceHandle;

/// A min-heap over client instances keyed by their absolute wake-up time.
/// Each instance carries its own position in the heap array
/// ([`crate::instance::ClientInstance::heap_index`]), so [`Self::update`] and
/// [`Self::remove`] run in O(log N) instead of a linear scan.
#[derive(Default)]
pub struct Scheduler {
    heap: Vec<InstanceHandle>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts `instance` with wake-up time `at`. The instance must not
    /// already have a scheduler entry (use [`Self::update`] for that).
    pub fn insert(&mut self, instance: InstanceHandle, at: Instant) {
        instance.borrow_mut().wakeup = at;
        let idx = self.heap.len();
        self.heap.push(instance.clone());
        instance.borrow_mut().heap_index = Some(idx);
        self.sift_up(idx);
    }

    /// Reschedules `instance` to wake up at `at`, relocating its existing
    /// heap entry in place. Inserts a new entry if the instance had none.
    pub fn update(&mut self, instance: &InstanceHandle, at: Instant) {
        instance.borrow_mut().wakeup = at;
        let idx = instance.borrow().heap_index;
        let Some(idx) = idx else {
            self.insert(instance.clone(), at);
            return;
        };
        self.sift_up(idx);
        self.sift_down(idx);
    }

    /// Removes `instance`'s scheduler entry, if it has one. A no-op otherwise.
    pub fn remove(&mut self, instance: &InstanceHandle) {
        let Some(idx) = instance.borrow_mut().heap_index.take() else {
            return;
        };
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        self.heap.pop();
        if idx < self.heap.len() {
            self.set_index(idx, idx);
            self.sift_up(idx);
            self.sift_down(idx);
        }
    }

    /// Returns the instance with the earliest wake-up time, or `None` if the
    /// scheduler is empty. Does not remove the entry.
    pub fn peek_earliest(&self) -> Option<(InstanceHandle, Instant)> {
        self.heap.first().map(|h| {
            let at = h.borrow().wakeup;
            (h.clone(), at)
        })
    }

    fn wakeup_at(&self, idx: usize) -> Instant {
        self.heap[idx].borrow().wakeup
    }

    fn set_index(&mut self, idx: usize, value: usize) {
        self.heap[idx].borrow_mut().heap_index = Some(value);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.wakeup_at(idx) < self.wakeup_at(parent) {
                self.heap.swap(idx, parent);
                self.set_index(idx, idx);
                self.set_index(parent, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.wakeup_at(left) < self.wakeup_at(smallest) {
                smallest = left;
            }
            if right < len && self.wakeup_at(right) < self.wakeup_at(smallest) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.heap.swap(idx, smallest);
            self.set_index(idx, idx);
            self.set_index(smallest, smallest);
            idx = smallest;
        }
    }
}

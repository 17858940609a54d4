//! The three views over live client instances: by real address, by
//! assigned virtual address, and the full iteration set used by the
//! broadcaster and the reaper.

use std::collections::HashMap;
use std::time::Instant;

use crate::addr::{InnerAddr, OuterAddr};
use crate::instance::{ClientInstance, InstanceHandle};
use crate::pipeline::CipherContext;

/// Owns every live [`ClientInstance`] and the lookup maps into it. The
/// registry is the only thing that constructs or drops instances; routes and
/// the scheduler only ever hold clones of handles it hands out.
#[derive(Default)]
pub struct ClientInstanceRegistry {
    by_real: HashMap<OuterAddr, InstanceHandle>,
    by_vaddr: HashMap<InnerAddr, InstanceHandle>,
    all: Vec<InstanceHandle>,
}

impl ClientInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Creates and registers a new instance keyed by its real address.
    /// Returns `None` if `real` is already registered — callers must look up
    /// and reuse the existing instance instead of double-creating one.
    pub fn create_instance(
        &mut self,
        real: OuterAddr,
        context: Box<dyn CipherContext>,
        now: Instant,
    ) -> Option<InstanceHandle> {
        if self.by_real.contains_key(&real) {
            return None;
        }
        let handle = ClientInstance::new(real.clone(), context, now);
        self.by_real.insert(real, handle.clone());
        self.all.push(handle.clone());
        Some(handle)
    }

    /// Records `instance`'s virtual address assignment. Replaces any prior
    /// holder of that address in the by-vaddr view (a stale entry from a
    /// reconnecting client that hasn't been explicitly closed yet).
    pub fn attach_vaddr(&mut self, instance: &InstanceHandle, vaddr: InnerAddr) {
        instance.borrow_mut().vaddr = Some(vaddr);
        self.by_vaddr.insert(vaddr, instance.clone());
    }

    pub fn lookup_real(&self, real: &OuterAddr) -> Option<InstanceHandle> {
        self.by_real.get(real).cloned()
    }

    pub fn lookup_vaddr(&self, vaddr: &InnerAddr) -> Option<InstanceHandle> {
        self.by_vaddr.get(vaddr).cloned()
    }

    /// Iterates every live instance, for the broadcaster and periodic
    /// housekeeping. Order is insertion order, not wake-up order.
    pub fn iter(&self) -> impl Iterator<Item = &InstanceHandle> {
        self.all.iter()
    }

    /// Removes `instance` from all three views. The instance's own `Rc` may
    /// still be held elsewhere (the scheduler, a route) until those release
    /// it too; this only ends the registry's ownership.
    pub fn close_instance(&mut self, instance: &InstanceHandle) {
        let (real, vaddr) = {
            let inst = instance.borrow();
            (inst.real.clone(), inst.vaddr)
        };
        self.by_real.remove(&real);
        if let Some(vaddr) = vaddr {
            if let Some(owner) = self.by_vaddr.get(&vaddr) {
                if std::rc::Rc::ptr_eq(owner, instance) {
                    self.by_vaddr.remove(&vaddr);
                }
            }
        }
        self.all.retain(|h| !std::rc::Rc::ptr_eq(h, instance));
    }
}

//! The broadcaster and client-to-client (C2C) forwarder: when a TUN
//! frame addresses a broadcast/multicast destination, or a routed unicast
//! destination happens to be another client instance rather than the TUN
//! device itself, the frame is handed to every other live instance's cipher
//! context instead of (or in addition to) being written to the TUN device.

use std::rc::Rc;

use crate::addr::AddrClass;
use crate::instance::InstanceHandle;
use crate::registry::ClientInstanceRegistry;

/// What the event loop should do with a TUN-received frame after routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Deliver to exactly this one instance (client-to-client unicast).
    Unicast,
    /// Deliver to every other live instance.
    Flood,
}

pub fn delivery_plan_for(class: AddrClass) -> DeliveryPlan {
    match class {
        AddrClass::Unicast => DeliveryPlan::Unicast,
        AddrClass::Broadcast | AddrClass::Multicast => DeliveryPlan::Flood,
    }
}

/// Queues `inner` into every live instance other than `exclude` (if given)
/// via [`crate::pipeline::CipherContext::process_incoming_tun`]. Instances
/// that are still mid-handshake are skipped — there is no cipher context
/// ready to carry the frame yet.
pub fn flood(registry: &ClientInstanceRegistry, inner: &[u8], exclude: Option<&InstanceHandle>) {
    for handle in registry.iter() {
        if let Some(excluded) = exclude {
            if Rc::ptr_eq(handle, excluded) {
                continue;
            }
        }
        let mut inst = handle.borrow_mut();
        if !inst.is_live() || !inst.connection_established {
            continue;
        }
        let _ = inst.context.process_incoming_tun(inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::OuterAddr;
    use crate::pipeline::test_support::EchoContext;
    use std::time::Instant;

    fn peer(registry: &mut ClientInstanceRegistry, n: u8, now: Instant) -> InstanceHandle {
        let addr = OuterAddr::from_socket_addr(format!("10.0.0.{n}:1194").parse().unwrap(), None);
        let handle = registry
            .create_instance(addr, Box::new(EchoContext::default()), now)
            .unwrap();
        handle.borrow_mut().connection_established = true;
        handle
    }

    #[test]
    fn delivery_plan_matches_address_class() {
        assert_eq!(delivery_plan_for(AddrClass::Unicast), DeliveryPlan::Unicast);
        assert_eq!(delivery_plan_for(AddrClass::Broadcast), DeliveryPlan::Flood);
        assert_eq!(delivery_plan_for(AddrClass::Multicast), DeliveryPlan::Flood);
    }

    #[test]
    fn flood_skips_the_excluded_instance() {
        let mut registry = ClientInstanceRegistry::new();
        let now = Instant::now();
        let a = peer(&mut registry, 1, now);
        let b = peer(&mut registry, 2, now);

        flood(&registry, b"hello", Some(&a));

        assert!(a.borrow_mut().context.process_outgoing_link().is_none());
        assert_eq!(
            b.borrow_mut().context.process_outgoing_link(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn flood_skips_instances_without_an_established_connection() {
        let mut registry = ClientInstanceRegistry::new();
        let now = Instant::now();
        let addr = OuterAddr::from_socket_addr("10.0.0.9:1194".parse().unwrap(), None);
        let pending = registry
            .create_instance(addr, Box::new(EchoContext::default()), now)
            .unwrap();

        flood(&registry, b"hello", None);
        assert!(pending.borrow_mut().context.process_outgoing_link().is_none());
    }
}

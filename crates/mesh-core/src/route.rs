//! The routing/learning table: maps an [`InnerAddr`] key — a learned
//! host address or a configured CIDR prefix — to the [`InstanceHandle`] that
//! owns it.

use std::collections::HashMap;
use std::time::Instant;

use crate::addr::InnerAddr;
use crate::constants::HOST_ROUTE_BUCKET_COUNT;
use crate::instance::InstanceHandle;

/// Whether a route was learned from traffic or configured as a static iroute,
/// and whether it is subject to the reaper's idle sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFlags {
    /// Learned from a TUN-received frame's source address. Ages out if idle.
    Cache,
    /// Configured explicitly (an iroute, or a client's negotiated address).
    /// Never reaped by age alone.
    Static,
}

struct Route {
    instance: InstanceHandle,
    flags: RouteFlags,
    cache_generation: u64,
    last_reference: Instant,
}

/// The learning/routing table. Host routes are sharded across a fixed number
/// of hash buckets (independent of how many routes are actually stored) so
/// the reaper can bound a single sweep to a handful of buckets rather than
/// the whole table. CIDR routes are bucketed by prefix length so
/// lookup can walk from longest to shortest prefix; `active_lengths` mirrors
/// the set of populated CIDR buckets in descending order so that walk never
/// has to probe an empty length.
pub struct RoutingTable {
    hosts: Vec<HashMap<InnerAddr, Route>>,
    cidrs: HashMap<u8, HashMap<InnerAddr, Route>>,
    active_lengths: Vec<u8>,
    cache_generation: u64,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::with_bucket_count(HOST_ROUTE_BUCKET_COUNT)
    }

    /// Builds a table with an explicit host-bucket count, mainly so tests can
    /// force every host route into a single bucket.
    pub fn with_bucket_count(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            hosts: (0..bucket_count).map(|_| HashMap::new()).collect(),
            cidrs: HashMap::new(),
            active_lengths: Vec::new(),
            cache_generation: 0,
        }
    }

    pub fn cache_generation(&self) -> u64 {
        self.cache_generation
    }

    pub fn bucket_count(&self) -> usize {
        self.hosts.len()
    }

    fn bucket_of(&self, key: &InnerAddr) -> usize {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.hosts.len()
    }

    fn bump_generation(&mut self) {
        self.cache_generation += 1;
    }

    fn note_active_length(&mut self, prefix_bits: u8) {
        if !self.active_lengths.contains(&prefix_bits) {
            self.active_lengths.push(prefix_bits);
            self.active_lengths.sort_unstable_by(|a, b| b.cmp(a));
            self.bump_generation();
        }
    }

    fn drop_length_if_empty(&mut self, prefix_bits: u8) {
        if self
            .cidrs
            .get(&prefix_bits)
            .map(|m| m.is_empty())
            .unwrap_or(true)
        {
            self.cidrs.remove(&prefix_bits);
            self.active_lengths.retain(|&l| l != prefix_bits);
            self.bump_generation();
        }
    }

    /// Learns or refreshes a host route. Later insertions of the same key
    /// win over earlier ones (a client's address can be re-learned after a
    /// roam without needing an explicit delete first).
    pub fn insert_host(&mut self, key: InnerAddr, instance: InstanceHandle, flags: RouteFlags, now: Instant) {
        let key = key.as_host_key();
        let idx = self.bucket_of(&key);
        let generation = self.cache_generation;
        self.hosts[idx].insert(
            key,
            Route {
                instance,
                flags,
                cache_generation: generation,
                last_reference: now,
            },
        );
    }

    /// Installs a static CIDR route (a configured iroute).
    pub fn insert_iroute(&mut self, prefix: InnerAddr, instance: InstanceHandle, now: Instant) {
        let Some(bits) = prefix.prefix_bits() else {
            // Callers are expected to pass a masked prefix key; a host key
            // here is still handled sanely by falling through to the host
            // table rather than panicking.
            self.insert_host(prefix, instance, RouteFlags::Static, now);
            return;
        };
        self.note_active_length(bits);
        self.cidrs.entry(bits).or_default().insert(
            prefix,
            Route {
                instance,
                flags: RouteFlags::Static,
                cache_generation: self.cache_generation,
                last_reference: now,
            },
        );
    }

    /// Looks up the instance that owns `key`: an exact host match first,
    /// then the longest matching CIDR prefix. Routes pointing at a halted
    /// instance are treated as absent (the reaper has not yet swept them), as
    /// is a `Cache` route stamped with a generation the table has since
    /// superseded — it is stale until relearned or reaped.
    pub fn lookup(&mut self, key: &InnerAddr, now: Instant) -> Option<InstanceHandle> {
        let host_key = key.as_host_key();
        let idx = self.bucket_of(&host_key);
        let generation = self.cache_generation;
        if let Some(route) = self.hosts[idx].get_mut(&host_key) {
            let stale = route.flags == RouteFlags::Cache && route.cache_generation != generation;
            if !stale && route.instance.borrow().is_live() {
                route.last_reference = now;
                return Some(route.instance.clone());
            }
        }

        let lengths = self.active_lengths.clone();
        for bits in lengths {
            let masked = key.masked_to(bits);
            if let Some(bucket) = self.cidrs.get_mut(&bits) {
                if let Some(route) = bucket.get_mut(&masked) {
                    if route.instance.borrow().is_live() {
                        route.last_reference = now;
                        return Some(route.instance.clone());
                    }
                }
            }
        }
        None
    }

    /// Removes the exact-match route for `key`, host or CIDR.
    pub fn delete(&mut self, key: &InnerAddr) {
        if key.is_host() {
            let host_key = key.as_host_key();
            let idx = self.bucket_of(&host_key);
            self.hosts[idx].remove(&host_key);
            return;
        }
        let Some(bits) = key.prefix_bits() else {
            return;
        };
        if let Some(bucket) = self.cidrs.get_mut(&bits) {
            bucket.remove(key);
        }
        self.drop_length_if_empty(bits);
    }

    /// Removes every route (host or CIDR) owned by `instance`, e.g. when an
    /// instance halts. Returns how many routes were dropped.
    pub fn delete_all_for(&mut self, instance: &InstanceHandle) -> usize {
        let mut removed = 0;
        for bucket in self.hosts.iter_mut() {
            bucket.retain(|_, r| {
                let keep = !std::rc::Rc::ptr_eq(&r.instance, instance);
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        let mut emptied = Vec::new();
        for (&bits, bucket) in self.cidrs.iter_mut() {
            bucket.retain(|_, r| {
                let keep = !std::rc::Rc::ptr_eq(&r.instance, instance);
                if !keep {
                    removed += 1;
                }
                keep
            });
            if bucket.is_empty() {
                emptied.push(bits);
            }
        }
        for bits in emptied {
            self.drop_length_if_empty(bits);
        }
        removed
    }

    /// Scans `count` host-route buckets starting at `start` (wrapping around
    /// the table) and returns the keys the reaper should drop: a halted
    /// instance's route, or a [`RouteFlags::Cache`] route that has either
    /// gone idle past `cutoff` or was stamped with a generation the table
    /// has since superseded. CIDR (static) routes are never aged
    /// out, and bounding the scan to `count` buckets keeps a single sweep's
    /// cost independent of how many routes currently exist.
    pub fn reapable_host_keys(&self, start: usize, count: usize, cutoff: Instant) -> Vec<InnerAddr> {
        let n = self.hosts.len();
        let mut out = Vec::new();
        for i in 0..count.min(n) {
            let idx = (start + i) % n;
            for (key, route) in &self.hosts[idx] {
                let halted = !route.instance.borrow().is_live();
                let stale = route.flags == RouteFlags::Cache
                    && (route.last_reference < cutoff || route.cache_generation != self.cache_generation);
                if halted || stale {
                    out.push(*key);
                }
            }
        }
        out
    }

    pub fn host_count(&self) -> usize {
        self.hosts.iter().map(|bucket| bucket.len()).sum()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::OuterAddr;
    use crate::instance::ClientInstance;
    use crate::pipeline::test_support::NoopContext;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn instance() -> InstanceHandle {
        ClientInstance::new(OuterAddr::unix("/x"), Box::new(NoopContext), Instant::now())
    }

    #[test]
    fn host_route_is_exact_match() {
        let mut table = RoutingTable::new();
        let inst = instance();
        let now = Instant::now();
        table.insert_host(
            InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)),
            inst.clone(),
            RouteFlags::Cache,
            now,
        );
        let found = table
            .lookup(&InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)), now)
            .unwrap();
        assert!(std::rc::Rc::ptr_eq(&found, &inst));
    }

    #[test]
    fn host_route_dominates_overlapping_cidr() {
        let mut table = RoutingTable::new();
        let host_owner = instance();
        let cidr_owner = instance();
        let now = Instant::now();
        table.insert_iroute(
            InnerAddr::ipv4_prefix(Ipv4Addr::new(10, 8, 0, 0), 24),
            cidr_owner.clone(),
            now,
        );
        table.insert_host(
            InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)),
            host_owner.clone(),
            RouteFlags::Cache,
            now,
        );
        let found = table
            .lookup(&InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)), now)
            .unwrap();
        assert!(std::rc::Rc::ptr_eq(&found, &host_owner));
    }

    #[test]
    fn longest_prefix_wins_among_cidr_routes() {
        let mut table = RoutingTable::new();
        let wide = instance();
        let narrow = instance();
        let now = Instant::now();
        table.insert_iroute(InnerAddr::ipv4_prefix(Ipv4Addr::new(10, 0, 0, 0), 8), wide, now);
        table.insert_iroute(
            InnerAddr::ipv4_prefix(Ipv4Addr::new(10, 8, 0, 0), 24),
            narrow.clone(),
            now,
        );
        let found = table
            .lookup(&InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)), now)
            .unwrap();
        assert!(std::rc::Rc::ptr_eq(&found, &narrow));
    }

    #[test]
    fn later_insertion_of_same_host_key_wins() {
        let mut table = RoutingTable::new();
        let first = instance();
        let second = instance();
        let now = Instant::now();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        table.insert_host(key, first, RouteFlags::Cache, now);
        table.insert_host(key, second.clone(), RouteFlags::Cache, now);
        let found = table.lookup(&key, now).unwrap();
        assert!(std::rc::Rc::ptr_eq(&found, &second));
    }

    #[test]
    fn halted_instance_route_is_treated_as_absent() {
        let mut table = RoutingTable::new();
        let inst = instance();
        let now = Instant::now();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        table.insert_host(key, inst.clone(), RouteFlags::Cache, now);
        inst.borrow_mut().mark_halt();
        assert!(table.lookup(&key, now).is_none());
    }

    #[test]
    fn delete_all_for_removes_host_and_cidr_routes() {
        let mut table = RoutingTable::new();
        let inst = instance();
        let now = Instant::now();
        table.insert_host(
            InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)),
            inst.clone(),
            RouteFlags::Cache,
            now,
        );
        table.insert_iroute(
            InnerAddr::ipv4_prefix(Ipv4Addr::new(192, 168, 1, 0), 24),
            inst.clone(),
            now,
        );
        let removed = table.delete_all_for(&inst);
        assert_eq!(removed, 2);
        assert_eq!(table.host_count(), 0);
        assert!(table.active_lengths.is_empty());
    }

    #[test]
    fn ageable_keys_respect_cutoff_and_flags() {
        let mut table = RoutingTable::new();
        let inst = instance();
        let base = Instant::now();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        table.insert_host(key, inst.clone(), RouteFlags::Cache, base);

        let static_key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 9));
        table.insert_host(static_key, inst, RouteFlags::Static, base);

        let cutoff = base + Duration::from_secs(60);
        let ageable = table.reapable_host_keys(0, table.bucket_count(), cutoff);
        assert_eq!(ageable, vec![key]);
    }

    #[test]
    fn stale_generation_cache_route_is_reapable_and_refused_at_lookup() {
        let mut table = RoutingTable::new();
        let inst = instance();
        let now = Instant::now();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        table.insert_host(key, inst.clone(), RouteFlags::Cache, now);

        // Any CIDR structural change bumps the table's generation, stranding
        // the host route's stamped generation behind.
        table.insert_iroute(InnerAddr::ipv4_prefix(Ipv4Addr::new(192, 168, 1, 0), 24), inst, now);

        assert!(table.lookup(&key, now).is_none());
        let reapable = table.reapable_host_keys(0, table.bucket_count(), now);
        assert_eq!(reapable, vec![key]);
    }

    #[test]
    fn reapable_host_keys_only_scans_requested_buckets() {
        let mut table = RoutingTable::with_bucket_count(4);
        let inst = instance();
        let now = Instant::now();
        let cutoff = now + Duration::from_secs(60);
        for i in 0..4u8 {
            table.insert_host(
                InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, i)),
                inst.clone(),
                RouteFlags::Cache,
                now,
            );
        }
        // One bucket's worth of work should never find more than everything
        // stuffed into a single bucket by `with_bucket_count(1)`'s callers,
        // but here it must not exceed the table's own host count either.
        let partial = table.reapable_host_keys(0, 1, cutoff);
        assert!(partial.len() <= table.host_count());
        let full = table.reapable_host_keys(0, 4, cutoff);
        assert_eq!(full.len(), 4);
    }
}

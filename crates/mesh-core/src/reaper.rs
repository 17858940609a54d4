//! Periodic housekeeping: ages out idle learned routes, drops cache
//! routes stranded by a routing-generation change, and closes instances that
//! have finished halting — a fixed slice of host-route buckets at a time so
//! a single housekeeping tick never scans the entire table.

use std::time::{Duration, Instant};

use crate::constants::{
    DEFAULT_MROUTE_AGEABLE_TTL_SECS, REAP_DIVISOR, REAP_MAX, REAP_MIN,
};
use crate::registry::ClientInstanceRegistry;
use crate::route::RoutingTable;

/// Clamps the per-pass bucket count to `[reap_min, reap_max]`, scaling with
/// the table's (fixed) bucket count via `reap_divisor` so a single tick's
/// sweep cost is bounded independent of how many routes are actually
/// populated.
fn buckets_for(total_buckets: usize, reap_divisor: usize, reap_min: usize, reap_max: usize) -> usize {
    (total_buckets / reap_divisor.max(1)).clamp(reap_min, reap_max)
}

pub struct Reaper {
    ageable_ttl: Duration,
    reap_divisor: usize,
    reap_min: usize,
    reap_max: usize,
    /// Index of the next host-route bucket this sweep should start at,
    /// advancing (and wrapping) by `buckets_per_pass` every call so
    /// consecutive ticks cover the whole table over time.
    bucket_base: usize,
}

impl Reaper {
    pub fn new() -> Self {
        Self {
            ageable_ttl: Duration::from_secs(DEFAULT_MROUTE_AGEABLE_TTL_SECS),
            reap_divisor: REAP_DIVISOR,
            reap_min: REAP_MIN,
            reap_max: REAP_MAX,
            bucket_base: 0,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ageable_ttl: ttl,
            ..Self::new()
        }
    }

    /// Builds a reaper with every tunable taken from configuration
    /// rather than the compiled-in defaults.
    pub fn with_params(ttl: Duration, reap_divisor: usize, reap_min: usize, reap_max: usize) -> Self {
        Self {
            ageable_ttl: ttl,
            reap_divisor,
            reap_min,
            reap_max,
            bucket_base: 0,
        }
    }

    /// Sweeps a `buckets_per_pass`-bounded slice of host-route buckets,
    /// dropping routes idle since before `now - ttl`, routes stamped with a
    /// superseded routing generation, and routes pointing at a halted
    /// instance, then drops any instance the registry still holds once it
    /// has finished halting. Returns the number of routes removed.
    pub fn sweep(&mut self, routes: &mut RoutingTable, registry: &mut ClientInstanceRegistry, now: Instant) -> usize {
        let cutoff = now - self.ageable_ttl;
        let total_buckets = routes.bucket_count();
        let quota = buckets_for(total_buckets, self.reap_divisor, self.reap_min, self.reap_max);
        let candidates = routes.reapable_host_keys(self.bucket_base, quota, cutoff);
        if total_buckets > 0 {
            self.bucket_base = (self.bucket_base + quota) % total_buckets;
        }

        let mut removed = 0;
        for key in &candidates {
            routes.delete(key);
            removed += 1;
        }

        let halted: Vec<_> = registry
            .iter()
            .filter(|h| h.borrow().halt)
            .cloned()
            .collect();
        for instance in halted {
            routes.delete_all_for(&instance);
            registry.close_instance(&instance);
        }

        removed
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{InnerAddr, OuterAddr};
    use crate::pipeline::test_support::NoopContext;
    use crate::route::RouteFlags;
    use std::net::Ipv4Addr;

    #[test]
    fn buckets_for_clamps_to_min_and_max() {
        assert_eq!(buckets_for(0, REAP_DIVISOR, REAP_MIN, REAP_MAX), REAP_MIN);
        assert_eq!(
            buckets_for(usize::MAX / REAP_DIVISOR * REAP_DIVISOR, REAP_DIVISOR, REAP_MIN, REAP_MAX),
            REAP_MAX
        );
    }

    #[test]
    fn sweep_ages_out_idle_cache_routes() {
        let mut registry = ClientInstanceRegistry::new();
        // A single bucket guarantees the sweep's bounded quota still covers
        // the whole (tiny) table in one pass.
        let mut routes = RoutingTable::with_bucket_count(1);
        let base = Instant::now();
        let handle = registry
            .create_instance(
                OuterAddr::from_socket_addr("10.0.0.1:1194".parse().unwrap(), None),
                Box::new(NoopContext),
                base,
            )
            .unwrap();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        routes.insert_host(key, handle, RouteFlags::Cache, base);

        let mut reaper = Reaper::with_ttl(Duration::from_secs(60));
        let later = base + Duration::from_secs(120);
        let removed = reaper.sweep(&mut routes, &mut registry, later);
        assert_eq!(removed, 1);
        assert_eq!(routes.host_count(), 0);
    }

    #[test]
    fn sweep_drops_stale_generation_cache_routes() {
        let mut registry = ClientInstanceRegistry::new();
        let mut routes = RoutingTable::with_bucket_count(1);
        let now = Instant::now();
        let handle = registry
            .create_instance(
                OuterAddr::from_socket_addr("10.0.0.1:1194".parse().unwrap(), None),
                Box::new(NoopContext),
                now,
            )
            .unwrap();
        let key = InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6));
        routes.insert_host(key, handle.clone(), RouteFlags::Cache, now);
        routes.insert_iroute(InnerAddr::ipv4_prefix(Ipv4Addr::new(192, 168, 1, 0), 24), handle, now);

        let mut reaper = Reaper::with_ttl(Duration::from_secs(3600));
        let removed = reaper.sweep(&mut routes, &mut registry, now);
        assert_eq!(removed, 1);
        assert_eq!(routes.host_count(), 0);
    }

    #[test]
    fn sweep_closes_halted_instances() {
        let mut registry = ClientInstanceRegistry::new();
        let mut routes = RoutingTable::with_bucket_count(1);
        let now = Instant::now();
        let handle = registry
            .create_instance(
                OuterAddr::from_socket_addr("10.0.0.1:1194".parse().unwrap(), None),
                Box::new(NoopContext),
                now,
            )
            .unwrap();
        handle.borrow_mut().mark_halt();

        let mut reaper = Reaper::new();
        reaper.sweep(&mut routes, &mut registry, now);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sweep_advances_and_wraps_bucket_base() {
        let mut registry = ClientInstanceRegistry::new();
        let mut routes = RoutingTable::with_bucket_count(4);
        let now = Instant::now();
        let mut reaper = Reaper::with_params(Duration::from_secs(60), 1, 1, 1);
        for expected_base in [1usize, 2, 3, 0] {
            reaper.sweep(&mut routes, &mut registry, now);
            assert_eq!(reaper.bucket_base, expected_base);
        }
    }
}

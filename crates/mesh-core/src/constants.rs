/// Default per-instance idle budget before an ageable route is reaped, in seconds.
pub const DEFAULT_MROUTE_AGEABLE_TTL_SECS: u64 = 60;

/// Upper bound on how long the event loop will block waiting for I/O even if
/// no client instance has an earlier scheduled wake-up, so housekeeping still runs.
pub const REAP_MAX_WAKEUP_SECS: u64 = 10;

pub const REAP_MIN: usize = 16;
pub const REAP_MAX: usize = 1024;
pub const REAP_DIVISOR: usize = 10;

/// Fixed number of hash buckets the host-route table is sharded into, so the
/// reaper's per-tick `buckets_per_pass` bounds real work regardless of how
/// many routes are currently populated.
pub const HOST_ROUTE_BUCKET_COUNT: usize = 1024;

/// Default cap on a single instance's deferred stream-write queue.
pub const DEFAULT_TCP_QUEUE_LIMIT: usize = 64;

/// Length, in bytes, of the big-endian record-length prefix used to frame
/// ciphertext records on a stream transport.
pub const STREAM_LENGTH_PREFIX_BYTES: usize = 2;

/// Session identifiers carried by the opaque cipher context are fixed at 8 bytes.
pub const SESSION_ID_LEN: usize = 8;

/// Maximum byte length of an [`crate::addr::InnerAddr`] payload (room for an
/// IPv6 address plus room to spare, matching the widest address family we route on).
pub const MAX_INNER_ADDR_LEN: usize = 20;

use chain::config::EPOCH_SPAN;
use tokio::time::Duration;

/// Peer reports older than this stop being considered sync sources.
pub const PEER_STALENESS_WINDOW: Duration = Duration::from_secs(10);

/// Deadline for one steady-state streaming fetch.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Most heights requested from one peer in one pass.
pub const MAX_REQUEST_WINDOW: u64 = 350;

/// Buffered blocks are flushed into the chain at this size.
pub const INSERT_FLUSH_SIZE: usize = 128;

/// ...or after this long since the previous flush.
pub const INSERT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Driver sleep after a pass in which no peer had anything new.
pub const IDLE_BACKOFF: Duration = Duration::from_secs(5);

/// Cadence of the driver loop.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Lifetime of one resynchronized range in the bounded cache.
pub const RESYNC_CACHE_TTL: Duration = Duration::from_secs(30);

/// Fetch attempts per missing sub-range before surfacing the gap.
pub const RESYNC_MAX_RETRIES: u32 = 5;

/// Delay before requeueing a request the network was not ready for.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Pool sweeps only run once the pool holds more entries than this.
pub const POOL_EVICTION_THRESHOLD: usize = 1_000;

/// How often a shard driver re-checks a beacon reference it is waiting on.
pub const BEACON_GATE_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub staleness: Duration,
    pub stream_timeout: Duration,
    pub max_request_window: u64,
    pub flush_size: usize,
    pub flush_interval: Duration,
    pub idle_backoff: Duration,
    pub tick_interval: Duration,
    pub resync_ttl: Duration,
    pub resync_retries: u32,
    pub requeue_delay: Duration,
    pub pool_eviction_threshold: usize,
    /// Upper bound on one covered range in the range tracker; one epoch's
    /// worth of blocks.
    pub range_merge_span: u64,
    pub beacon_gate_poll: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness: PEER_STALENESS_WINDOW,
            stream_timeout: STREAM_TIMEOUT,
            max_request_window: MAX_REQUEST_WINDOW,
            flush_size: INSERT_FLUSH_SIZE,
            flush_interval: INSERT_FLUSH_INTERVAL,
            idle_backoff: IDLE_BACKOFF,
            tick_interval: TICK_INTERVAL,
            resync_ttl: RESYNC_CACHE_TTL,
            resync_retries: RESYNC_MAX_RETRIES,
            requeue_delay: REQUEUE_DELAY,
            pool_eviction_threshold: POOL_EVICTION_THRESHOLD,
            range_merge_span: EPOCH_SPAN,
            beacon_gate_poll: BEACON_GATE_POLL,
        }
    }
}

impl SyncConfig {
    /// Short timers for tests.
    pub fn fast() -> Self {
        Self {
            staleness: Duration::from_millis(200),
            stream_timeout: Duration::from_millis(500),
            flush_interval: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(20),
            tick_interval: Duration::from_millis(10),
            resync_ttl: Duration::from_millis(100),
            requeue_delay: Duration::from_millis(20),
            beacon_gate_poll: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

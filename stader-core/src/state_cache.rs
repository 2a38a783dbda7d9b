//! # Snapshot Cache
//!
//! [`StateCache`] holds the most recently assembled [`Snapshot`] and serves it to any number
//! of concurrent readers (status requests, metrics scrapes) without ever making them wait
//! on a refresh.
//!
//! ## Thread Safety
//! - **Reads** ([`StateCache::get_state`]) are a single atomic load of an `Arc<Snapshot>`
//!   through `ArcSwapOption`. A reader always gets one complete snapshot.
//! - **Refreshes** are serialised by an async mutex. At most one assembly runs at a time;
//!   a caller of [`StateCache::refresh`] that arrives while another refresh is in flight
//!   waits for it and shares its outcome instead of assembling again.
//!   [`StateCache::try_refresh`] rejects with [`CacheError::RefreshInProgress`] instead.
//! - **Publication** is one pointer swap, performed only after a successful assembly. A
//!   failed, timed-out or cancelled refresh leaves the previous snapshot in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use snafu::Snafu;
use tokio::task::JoinHandle;

use crate::assembler::{AssembleError, SnapshotAssembler};
use crate::snapshot::Snapshot;

/// Errors reported to the caller of a refresh. Readers never see them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CacheError {
    /// The assembly pass failed.
    #[snafu(display("snapshot refresh failed (serving stale snapshot: {stale}): {source}"))]
    Assembly {
        /// The assembly error, shared with every caller that joined the refresh.
        source: Arc<AssembleError>,
        /// Whether an older snapshot is still being served.
        stale: bool,
    },

    /// The assembly pass did not finish in time and was abandoned.
    #[snafu(display("snapshot refresh timed out after {timeout:?} (serving stale snapshot: {stale})"))]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
        /// Whether an older snapshot is still being served.
        stale: bool,
    },

    /// Another refresh is already running.
    #[snafu(display("a snapshot refresh is already in progress"))]
    RefreshInProgress,
}

impl CacheError {
    /// Whether a previous snapshot remains visible to readers.
    pub fn is_stale(&self) -> bool {
        match self {
            CacheError::Assembly { stale, .. } | CacheError::Timeout { stale, .. } => *stale,
            CacheError::RefreshInProgress => false,
        }
    }
}

/// Result alias for cache operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// What a reader sees.
#[derive(Clone, Debug)]
pub enum CacheState {
    /// No refresh has succeeded yet.
    Uninitialized,
    /// The latest successfully assembled snapshot.
    Ready(Arc<Snapshot>),
}

impl CacheState {
    /// The snapshot, if any.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            CacheState::Uninitialized => None,
            CacheState::Ready(snapshot) => Some(snapshot),
        }
    }
}

/// Refresh bookkeeping exposed alongside the snapshot.
#[derive(Clone, Debug, Default)]
pub struct RefreshStats {
    /// Wall-clock time of the last successful refresh.
    pub last_success: Option<SystemTime>,
    /// Duration of the last completed assembly, successful or not.
    pub last_duration: Option<Duration>,
    /// Failed refreshes since the last success.
    pub consecutive_failures: u32,
}

/// Failure recorded for callers that join an in-flight refresh.
#[derive(Clone, Debug)]
enum RefreshFailure {
    /// The assembly returned an error.
    Assembly(Arc<AssembleError>),
    /// The assembly was abandoned after the timeout.
    TimedOut(Duration),
}

/// Refresh state guarded by the single-flight mutex.
#[derive(Default)]
struct RefreshGate {
    /// Outcome of the last finished refresh.
    last: Option<std::result::Result<Arc<Snapshot>, RefreshFailure>>,
}

/// Concurrency-safe holder of the latest [`Snapshot`].
pub struct StateCache {
    /// Builds new snapshots.
    assembler: SnapshotAssembler,
    /// The published snapshot.
    published: ArcSwapOption<Snapshot>,
    /// Single-flight guard for refreshes.
    gate: tokio::sync::Mutex<RefreshGate>,
    /// Refreshes that ran to completion, successful or not. Only written under `gate`.
    finished: AtomicU64,
    /// Refresh bookkeeping.
    stats: Mutex<RefreshStats>,
}

impl StateCache {
    /// Creates an empty cache. Nothing is assembled until the first refresh.
    pub fn new(assembler: SnapshotAssembler) -> Self {
        Self {
            assembler,
            published: ArcSwapOption::empty(),
            gate: tokio::sync::Mutex::new(RefreshGate::default()),
            finished: AtomicU64::new(0),
            stats: Mutex::new(RefreshStats::default()),
        }
    }

    /// Returns the latest published snapshot. Never waits on a refresh.
    pub fn get_state(&self) -> CacheState {
        match self.published.load_full() {
            Some(snapshot) => CacheState::Ready(snapshot),
            None => CacheState::Uninitialized,
        }
    }

    /// Refresh bookkeeping.
    pub fn stats(&self) -> RefreshStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Assembles and publishes a new snapshot, or joins the refresh already in flight.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        self.refresh_inner(None).await
    }

    /// Like [`StateCache::refresh`], abandoning the assembly once `timeout` elapses.
    pub async fn refresh_with_timeout(&self, timeout: Duration) -> Result<Arc<Snapshot>> {
        self.refresh_inner(Some(timeout)).await
    }

    /// Assembles and publishes a new snapshot unless a refresh is already in flight.
    pub async fn try_refresh(&self) -> Result<Arc<Snapshot>> {
        let mut gate = self
            .gate
            .try_lock()
            .map_err(|_| CacheError::RefreshInProgress)?;
        self.run_refresh(&mut gate, None).await
    }

    /// Spawns a task that refreshes immediately and then every `interval`, logging failures.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh_with_timeout(interval).await {
                    error!("❌ Scheduled snapshot refresh failed: {e}");
                }
            }
        })
    }

    /// Shared path of the joining refresh variants.
    async fn refresh_inner(&self, timeout: Option<Duration>) -> Result<Arc<Snapshot>> {
        let observed = self.finished.load(Ordering::Acquire);
        let mut gate = self.gate.lock().await;

        // A refresh finished while we were queued: its reads are at least as fresh as ours
        // would have been when we asked.
        if self.finished.load(Ordering::Acquire) != observed {
            if let Some(outcome) = gate.last.clone() {
                debug!("Joined the outcome of an in-flight snapshot refresh");
                return outcome.map_err(|failure| self.to_error(failure));
            }
        }

        self.run_refresh(&mut gate, timeout).await
    }

    /// Runs one assembly while holding the gate and publishes on success.
    ///
    /// If the returned future is dropped mid-assembly nothing is published or recorded.
    async fn run_refresh(
        &self,
        gate: &mut RefreshGate,
        timeout: Option<Duration>,
    ) -> Result<Arc<Snapshot>> {
        let started = Instant::now();
        let assembled = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.assembler.assemble()).await {
                Ok(result) => result.map_err(|e| RefreshFailure::Assembly(Arc::new(e))),
                Err(_) => Err(RefreshFailure::TimedOut(limit)),
            },
            None => self
                .assembler
                .assemble()
                .await
                .map_err(|e| RefreshFailure::Assembly(Arc::new(e))),
        };
        let elapsed = started.elapsed();

        let outcome = assembled.map(Arc::new);
        if let Ok(snapshot) = &outcome {
            self.published.store(Some(snapshot.clone()));
        }
        self.record(&outcome, elapsed);
        gate.last = Some(outcome.clone());
        self.finished.fetch_add(1, Ordering::Release);

        outcome.map_err(|failure| self.to_error(failure))
    }

    /// Updates the refresh bookkeeping.
    fn record(
        &self,
        outcome: &std::result::Result<Arc<Snapshot>, RefreshFailure>,
        elapsed: Duration,
    ) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        stats.last_duration = Some(elapsed);
        match outcome {
            Ok(snapshot) => {
                stats.last_success = Some(SystemTime::now());
                stats.consecutive_failures = 0;
                info!(
                    "✅ Published snapshot for block {} ({:?})",
                    snapshot.captured_at_block, elapsed
                );
            }
            Err(_) => {
                stats.consecutive_failures += 1;
                warn!(
                    "⚠️ Snapshot refresh failed {} time(s) in a row",
                    stats.consecutive_failures
                );
            }
        }
    }

    /// Converts a recorded failure into the caller-facing error.
    fn to_error(&self, failure: RefreshFailure) -> CacheError {
        let stale = self.published.load().is_some();
        match failure {
            RefreshFailure::Assembly(source) => CacheError::Assembly { source, stale },
            RefreshFailure::TimedOut(timeout) => CacheError::Timeout { timeout, stale },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::assembler::{AssemblerConfig, Collaborators};
    use crate::mock::{FakeBeacon, FakeChain, MemoryProofStore};

    fn cache(chain: Arc<FakeChain>) -> Arc<StateCache> {
        Arc::new(StateCache::new(SnapshotAssembler::new(
            Collaborators {
                chain,
                beacon: Arc::new(FakeBeacon::default()),
                proofs: Arc::new(MemoryProofStore::default()),
            },
            AssemblerConfig {
                node_address: FakeChain::NODE,
            },
        )))
    }

    fn assert_consistent(snapshot: &Snapshot) {
        let block = snapshot.captured_at_block;
        assert_eq!(snapshot.account.eth_balance, FakeChain::eth_at(block));
        assert_eq!(snapshot.account.token_balance, FakeChain::sd_at(block));
        for validator in &snapshot.validators {
            assert_eq!(validator.deposit_block, block);
        }
    }

    #[tokio::test]
    async fn uninitialized_until_first_success() {
        let chain = Arc::new(FakeChain::with_validators(1));
        chain.fail_on("operator id");
        let cache = cache(chain.clone());

        assert!(matches!(cache.get_state(), CacheState::Uninitialized));
        let err = cache.refresh().await.unwrap_err();
        assert!(!err.is_stale());
        assert!(matches!(cache.get_state(), CacheState::Uninitialized));

        chain.clear_failure();
        cache.refresh().await.unwrap();
        assert!(matches!(cache.get_state(), CacheState::Ready(_)));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let chain = Arc::new(FakeChain::with_validators(2));
        let cache = cache(chain.clone());
        let first = cache.refresh().await.unwrap();

        chain.fail_on("validator info");
        let err = cache.refresh().await.unwrap_err();
        assert!(err.is_stale());
        assert!(matches!(err, CacheError::Assembly { .. }));

        let served = cache.get_state().snapshot().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &served));
        assert_eq!(cache.stats().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_assembly() {
        let chain = Arc::new(FakeChain::with_validators(2));
        chain.set_delay(Duration::from_millis(50));
        let cache = cache(chain.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.refresh());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(chain.assemblies_started(), 1);
    }

    #[tokio::test]
    async fn try_refresh_rejects_while_in_flight() {
        let chain = Arc::new(FakeChain::with_validators(1));
        chain.set_delay(Duration::from_millis(50));
        let cache = cache(chain.clone());

        let (first, second) = tokio::join!(cache.refresh(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.try_refresh().await
        });

        first.unwrap();
        assert!(matches!(second, Err(CacheError::RefreshInProgress)));
        assert_eq!(chain.assemblies_started(), 1);
    }

    #[tokio::test]
    async fn readers_never_see_a_mixed_snapshot() {
        let chain = Arc::new(FakeChain::with_validators(3));
        let cache = cache(chain.clone());
        cache.refresh().await.unwrap();
        chain.set_delay(Duration::from_millis(5));

        let done = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let done = done.clone();
            readers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    if let CacheState::Ready(snapshot) = cache.get_state() {
                        assert_consistent(&snapshot);
                        seen += 1;
                    }
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        for _ in 0..5 {
            cache.refresh().await.unwrap();
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn timed_out_refresh_publishes_nothing() {
        let chain = Arc::new(FakeChain::with_validators(1));
        let cache = cache(chain.clone());
        let first = cache.refresh().await.unwrap();

        chain.set_delay(Duration::from_millis(200));
        let err = cache
            .refresh_with_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout { stale: true, .. }));

        let served = cache.get_state().snapshot().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &served));
    }

    #[tokio::test]
    async fn cancelled_refresh_leaves_cache_untouched() {
        let chain = Arc::new(FakeChain::with_validators(1));
        let cache = cache(chain.clone());
        let first = cache.refresh().await.unwrap();

        chain.set_delay(Duration::from_millis(200));
        let aborted = tokio::time::timeout(Duration::from_millis(20), cache.refresh()).await;
        assert!(aborted.is_err());

        let served = cache.get_state().snapshot().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &served));

        chain.set_delay(Duration::ZERO);
        let next = cache.refresh().await.unwrap();
        assert!(next.captured_at_block > first.captured_at_block);
    }

    #[tokio::test]
    async fn refresh_loop_populates_the_cache() {
        let chain = Arc::new(FakeChain::with_validators(1));
        let cache = cache(chain);
        let handle = cache.clone().spawn_refresh_loop(Duration::from_secs(60));

        for _ in 0..50 {
            if cache.get_state().snapshot().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(cache.get_state().snapshot().is_some());
        assert!(cache.stats().last_success.is_some());
    }
}

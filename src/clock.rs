//! Virtual clock adapters.
//!
//! Every session in a run shares one [`VirtualClock`]. The transaction driver
//! asks it to advance after sending a command and pumps it with
//! `advance(Ticks::ZERO)` while polling for output, so simulated devices get
//! a chance to react without the scenario being fast-forwarded.
//!
//! Two adapters are provided:
//!
//! - [`WallClock`] maps ticks onto real time. Advancing sleeps; a zero
//!   advance yields to the runtime.
//! - [`LogicalClock`] keeps a single logical time shared by all sessions.
//!   Simulated devices schedule wakeups with [`LogicalClock::sleep_until`]
//!   and only run when some session advances the clock.
//!
//! # Pump contract
//!
//! For [`LogicalClock`], `advance(n)` returns only after every wakeup due at
//! or before `now() + n` has been fired, in deadline order, with `now()`
//! reporting each wakeup's deadline while it fires, and after yielding to the
//! scheduler once per fired wakeup. `advance(Ticks::ZERO)` therefore delivers
//! every event already due and lets the woken tasks run before the caller
//! reads its channel again. Concurrent advances are serialized, so observed
//! time is globally non-decreasing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Opaque unit of virtual progress, counted in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub const fn from_micros(us: u64) -> Self {
        Ticks(us)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Ticks(ms * 1_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Ticks(secs * 1_000_000)
    }

    pub fn from_duration(d: Duration) -> Self {
        Ticks(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Shared notion of device-observed time.
#[async_trait]
pub trait VirtualClock: Send + Sync {
    /// Move time forward by `ticks`. Zero still lets due events fire.
    async fn advance(&self, ticks: Ticks);

    /// Current virtual time.
    fn now(&self) -> Ticks;
}

/// Real-time clock: ticks elapse as wall-clock time.
#[derive(Debug)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VirtualClock for WallClock {
    async fn advance(&self, ticks: Ticks) {
        if ticks.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(ticks.as_duration()).await;
        }
    }

    fn now(&self) -> Ticks {
        Ticks::from_duration(self.origin.elapsed())
    }
}

/// Cooperative logical clock shared by every session of a run.
#[derive(Debug, Default)]
pub struct LogicalClock {
    now: AtomicU64,
    seq: AtomicU64,
    advancing: tokio::sync::Mutex<()>,
    wakeups: Mutex<BTreeMap<(Ticks, u64), oneshot::Sender<()>>>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the clock reaches `deadline`.
    ///
    /// Returns immediately if the deadline has already passed.
    pub async fn sleep_until(&self, deadline: Ticks) {
        let rx = {
            let mut wakeups = self.wakeups.lock().unwrap_or_else(|e| e.into_inner());
            if deadline <= self.now() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            wakeups.insert((deadline, seq), tx);
            rx
        };
        // A dropped sender means the clock went away; nothing left to wait for.
        let _ = rx.await;
    }

    /// Suspend until `ticks` of virtual time have elapsed.
    pub async fn sleep(&self, ticks: Ticks) {
        self.sleep_until(self.now().saturating_add(ticks)).await;
    }

    /// Number of wakeups not yet fired.
    pub fn pending(&self) -> usize {
        self.wakeups.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn pop_due(&self, target: Ticks) -> Option<(Ticks, oneshot::Sender<()>)> {
        let mut wakeups = self.wakeups.lock().unwrap_or_else(|e| e.into_inner());
        let key = *wakeups.keys().next()?;
        if key.0 > target {
            return None;
        }
        wakeups.remove(&key).map(|tx| (key.0, tx))
    }
}

#[async_trait]
impl VirtualClock for LogicalClock {
    async fn advance(&self, ticks: Ticks) {
        let _serial = self.advancing.lock().await;
        let target = self.now().saturating_add(ticks);

        while let Some((deadline, tx)) = self.pop_due(target) {
            self.now.fetch_max(deadline.0, Ordering::SeqCst);
            let _ = tx.send(());
            tokio::task::yield_now().await;
        }

        self.now.fetch_max(target.0, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Ticks {
        Ticks(self.now.load(Ordering::SeqCst))
    }
}

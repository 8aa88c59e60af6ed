//! Slotted sliding-window byte accounting
//!
//! The speed meter keeps 30 one-second slots. Downloader tasks call
//! [`SpeedMeter::add_bytes`] from many tasks concurrently; the hot path is a
//! couple of atomic operations, never a lock. Readers tolerate a one-slot skew
//! while the window head advances.
//!
//! Besides the windowed current speed, the meter carries session counters
//! (total bytes this session) used by the RPC List response.
//!
//! The public methods read the process monotonic clock; the `_at` variants
//! take the second explicitly so tests can drive slot rollover across
//! simulated time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Number of one-second slots in the sliding window
const SLOT_COUNT: usize = 30;

/// Global speed meter shared by all downloader tasks
///
/// Cloning is cheap and every clone observes the same counters.
#[derive(Clone)]
pub struct SpeedMeter {
    inner: Arc<Inner>,
}

struct Inner {
    /// Per-second byte counters
    slots: [AtomicU64; SLOT_COUNT],
    /// Running sum over the window (kept incrementally, corrected periodically)
    total: AtomicU64,
    /// Second index (since meter epoch) the head slot belongs to
    head_second: AtomicU64,
    /// Index of the head slot within `slots`
    head_slot: AtomicUsize,
    /// Bytes downloaded this session
    session_bytes: AtomicU64,
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedMeter {
    /// Create an idle meter.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: std::array::from_fn(|_| AtomicU64::new(0)),
                total: AtomicU64::new(0),
                head_second: AtomicU64::new(Self::now_secs()),
                head_slot: AtomicUsize::new(0),
                session_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Record `n` downloaded bytes in the current slot.
    pub fn add_bytes(&self, n: u64) {
        self.add_bytes_at(n, Self::now_secs());
    }

    fn add_bytes_at(&self, n: u64, now: u64) {
        if n == 0 {
            return;
        }
        self.advance_to(now);
        let slot = self.inner.head_slot.load(Ordering::Acquire);
        self.inner.slots[slot].fetch_add(n, Ordering::Relaxed);
        self.inner.total.fetch_add(n, Ordering::Relaxed);
        self.inner.session_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Current speed in bytes per second, averaged over the window.
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps_at(Self::now_secs())
    }

    fn speed_bps_at(&self, now: u64) -> u64 {
        self.advance_to(now);
        let total = self.inner.total.load(Ordering::Relaxed);
        total / SLOT_COUNT as u64
    }

    /// Total bytes recorded this session.
    pub fn session_bytes(&self) -> u64 {
        self.inner.session_bytes.load(Ordering::Relaxed)
    }

    /// Re-sum the window total from the slot counters.
    ///
    /// The incremental add/expire arithmetic can drift under concurrent slot
    /// turnover; the scheduler calls this once per second.
    pub fn correct(&self) {
        self.advance_to(Self::now_secs());
        let sum: u64 = self
            .inner
            .slots
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum();
        self.inner.total.store(sum, Ordering::Relaxed);
    }

    /// Advance the window head to `now`, expiring old slots.
    fn advance_to(&self, now: u64) {
        loop {
            let head = self.inner.head_second.load(Ordering::Acquire);
            if now <= head {
                return;
            }
            // claim the advance; losers retry and observe the new head
            if self
                .inner
                .head_second
                .compare_exchange(head, now, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            let steps = ((now - head) as usize).min(SLOT_COUNT);
            let mut slot = self.inner.head_slot.load(Ordering::Acquire);
            for _ in 0..steps {
                slot = (slot + 1) % SLOT_COUNT;
                let expired = self.inner.slots[slot].swap(0, Ordering::Relaxed);
                if expired > 0 {
                    // saturate rather than wrap if a writer raced the expiry
                    let mut total = self.inner.total.load(Ordering::Relaxed);
                    loop {
                        let next = total.saturating_sub(expired);
                        match self.inner.total.compare_exchange_weak(
                            total,
                            next,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        ) {
                            Ok(_) => break,
                            Err(actual) => total = actual,
                        }
                    }
                }
            }
            self.inner.head_slot.store(slot, Ordering::Release);
            return;
        }
    }

    /// Seconds since an arbitrary process-wide monotonic epoch.
    fn now_secs() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_secs()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// The second the meter considers "now" at construction; simulated
    /// clocks in these tests tick forward from here.
    fn base_second(meter: &SpeedMeter) -> u64 {
        meter.inner.head_second.load(Ordering::Acquire)
    }

    #[test]
    fn idle_meter_reports_zero() {
        let meter = SpeedMeter::new();
        assert_eq!(meter.speed_bps(), 0, "a meter nobody wrote to must read 0");
        assert_eq!(meter.session_bytes(), 0);
    }

    #[test]
    fn add_bytes_accumulates_session_total() {
        let meter = SpeedMeter::new();
        meter.add_bytes(100);
        meter.add_bytes(150);
        assert_eq!(meter.session_bytes(), 250);
    }

    #[test]
    fn windowed_speed_reflects_recent_bytes() {
        let meter = SpeedMeter::new();
        meter.add_bytes(30_000);
        // 30k over a 30-slot window = 1000 B/s average
        assert_eq!(meter.speed_bps(), 1_000);
    }

    #[test]
    fn constant_rate_writer_reads_within_five_percent_after_one_window() {
        let meter = SpeedMeter::new();
        let base = base_second(&meter);
        // a steady 1000 B/s writer, one add per simulated second, for longer
        // than the window
        for second in 1..=(SLOT_COUNT as u64 + 5) {
            meter.add_bytes_at(1_000, base + second);
        }
        let speed = meter.speed_bps_at(base + SLOT_COUNT as u64 + 5);
        assert!(
            (950..=1_050).contains(&speed),
            "constant 1000 B/s must read within ±5% after one window, got {speed}"
        );
    }

    #[test]
    fn window_decays_to_zero_when_the_writer_stops() {
        let meter = SpeedMeter::new();
        let base = base_second(&meter);
        meter.add_bytes_at(5_000, base + 1);
        assert!(meter.speed_bps_at(base + 1) > 0);

        // more than a full window later every slot has been expired; this
        // also drives the expiry step cap
        assert_eq!(
            meter.speed_bps_at(base + 1 + SLOT_COUNT as u64 + 10),
            0,
            "a silent writer must decay to zero after one window"
        );
        assert_eq!(
            meter.inner.total.load(Ordering::Relaxed),
            0,
            "expiry must return the running total to zero"
        );
    }

    #[test]
    fn expiry_drops_only_slots_that_left_the_window() {
        let meter = SpeedMeter::new();
        let base = base_second(&meter);
        meter.add_bytes_at(3_000, base + 1);
        meter.add_bytes_at(600, base + 5);

        // at base+32 the window covers seconds 3..=32: the first burst is
        // gone, the second is still in
        let speed = meter.speed_bps_at(base + 32);
        assert_eq!(meter.inner.total.load(Ordering::Relaxed), 600);
        assert_eq!(speed, 600 / SLOT_COUNT as u64);
    }

    #[test]
    fn expiry_saturates_against_a_stale_total() {
        let meter = SpeedMeter::new();
        let base = base_second(&meter);
        meter.add_bytes_at(1_000, base + 1);
        // simulate a racing writer leaving the total behind the slot sum
        meter.inner.total.store(400, Ordering::Relaxed);

        // expiring the 1000-byte slot must clamp at zero, not wrap
        let speed = meter.speed_bps_at(base + 1 + SLOT_COUNT as u64 + 1);
        assert_eq!(speed, 0);
        assert_eq!(
            meter.inner.total.load(Ordering::Relaxed),
            0,
            "saturating expiry must leave the total at zero"
        );
    }

    #[test]
    fn correct_resyncs_total_with_slots() {
        let meter = SpeedMeter::new();
        meter.add_bytes(3_000);
        // sabotage the running total to simulate drift
        meter.inner.total.store(999_999, Ordering::Relaxed);
        meter.correct();
        assert_eq!(
            meter.inner.total.load(Ordering::Relaxed),
            3_000,
            "correct() must rebuild the total from slot counters"
        );
    }

    #[test]
    fn clone_shares_counters() {
        let meter = SpeedMeter::new();
        let clone = meter.clone();
        clone.add_bytes(42);
        assert_eq!(
            meter.session_bytes(),
            42,
            "clones share the same Arc'd state"
        );
    }

    #[test]
    fn concurrent_writers_lose_no_bytes() {
        let meter = SpeedMeter::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let m = meter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        m.add_bytes(7);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(
            meter.session_bytes(),
            8 * 1_000 * 7,
            "session counter must not drop bytes under contention"
        );
    }

    #[test]
    fn concurrent_writers_across_rolling_seconds_stay_consistent() {
        let meter = SpeedMeter::new();
        let base = base_second(&meter);
        // writers race each other across a rolling simulated clock so slot
        // turnover and the claim/retry path in advance_to get real contention
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let m = meter.clone();
                std::thread::spawn(move || {
                    for second in 1..=80u64 {
                        m.add_bytes_at(250, base + second);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        meter.correct();
        let total = meter.inner.total.load(Ordering::Relaxed);
        let slot_sum: u64 = meter
            .inner
            .slots
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum();
        assert_eq!(
            total, slot_sum,
            "after a correction pass the total must equal the slot sum"
        );
        assert_eq!(meter.session_bytes(), 4 * 80 * 250);
    }
}

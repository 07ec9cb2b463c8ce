//! Network-adjusted clock (C7): blends local time with timestamp samples
//! gathered from connected peers' version messages, so a single peer (or a
//! colluding set) can't bias block-timestamp checks past a bounded offset.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::PeerId;

/// Maximum number of samples retained.
pub const MAX_SAMPLES: usize = 200;
/// Minimum number of samples required before any adjustment is applied.
pub const MIN_SAMPLES: usize = 5;
/// Maximum offset, in seconds, the adjusted clock may diverge from local
/// wall-clock time.
pub const MAX_OFFSET_SECS: i64 = 70 * 60;

/// Read-only view of the current time, adjusted for network skew.
pub trait Clock: Send + Sync {
    /// Current adjusted Unix time, in seconds.
    fn adjusted_time(&self) -> i64;
}

/// A [`Clock`] that also accepts timestamp samples from peers.
pub trait AdjustedClock: Clock {
    /// Record a timestamp sample advertised by `peer` in its version message.
    fn add_sample(&self, peer: PeerId, timestamp: i64);
}

/// Default network-adjusted clock (C7).
///
/// Thread-safe: sampling happens from per-peer handshake threads while the
/// validator reads the adjusted time from work-manager threads.
pub struct MedianTime {
    samples: Mutex<VecDeque<(PeerId, i64)>>,
}

impl MedianTime {
    /// Construct a clock with no samples yet; reports unadjusted local time
    /// until [`MIN_SAMPLES`] samples have been recorded.
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    fn local_unix_time() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is set before the Unix epoch")
            .as_secs() as i64
    }

    /// Median offset (peer time - local time) across the retained samples,
    /// clamped to `MAX_OFFSET_SECS`. Zero if fewer than [`MIN_SAMPLES`] are
    /// recorded.
    fn offset(&self) -> i64 {
        let samples = self.samples.lock().unwrap();
        if samples.len() < MIN_SAMPLES {
            return 0;
        }
        let local = Self::local_unix_time();
        let mut offsets: Vec<i64> = samples.iter().map(|(_, t)| t - local).collect();
        offsets.sort_unstable();
        let median = offsets[offsets.len() / 2];
        median.clamp(-MAX_OFFSET_SECS, MAX_OFFSET_SECS)
    }
}

impl Default for MedianTime {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MedianTime {
    fn adjusted_time(&self) -> i64 {
        Self::local_unix_time() + self.offset()
    }
}

impl AdjustedClock for MedianTime {
    fn add_sample(&self, peer: PeerId, timestamp: i64) {
        let mut samples = self.samples.lock().unwrap();
        // One sample per peer: a later version message from the same peer
        // replaces its earlier sample instead of adding more influence.
        if let Some(existing) = samples.iter_mut().find(|(addr, _)| *addr == peer) {
            existing.1 = timestamp;
            return;
        }
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back((peer, timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_local_time_below_min_samples() {
        let clock = MedianTime::new();
        let local = MedianTime::local_unix_time();
        assert!((clock.adjusted_time() - local).abs() <= 1);
    }

    #[test]
    fn adjusts_towards_peer_median_once_enough_samples() {
        let clock = MedianTime::new();
        let local = MedianTime::local_unix_time();
        for i in 0..MIN_SAMPLES {
            let addr: PeerId = format!("peer-{}", i);
            clock.add_sample(addr, local + 1000);
        }
        assert_eq!(clock.adjusted_time(), local + 1000);
    }

    #[test]
    fn clamps_offset_to_max() {
        let clock = MedianTime::new();
        let local = MedianTime::local_unix_time();
        for i in 0..MIN_SAMPLES {
            let addr: PeerId = format!("peer-{}", i);
            clock.add_sample(addr, local + MAX_OFFSET_SECS * 10);
        }
        assert_eq!(clock.adjusted_time(), local + MAX_OFFSET_SECS);
    }

    #[test]
    fn later_sample_from_same_peer_replaces_earlier_one() {
        let clock = MedianTime::new();
        let local = MedianTime::local_unix_time();
        let addr: PeerId = "peer-fixed".to_string();
        for i in 1..MIN_SAMPLES {
            let a: PeerId = format!("peer-other-{}", i);
            clock.add_sample(a, local);
        }
        clock.add_sample(addr.clone(), local + 500);
        clock.add_sample(addr, local + 5000);
        assert_eq!(clock.samples.lock().unwrap().len(), MIN_SAMPLES);
    }
}

//! Variable difficulty control: per-session moving window of accept
//! timestamps, retargeted at most once per ring-full so the expected
//! share interval stays near `target_share_secs`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RING_SIZE: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct VardiffConfig {
    pub target_share_secs: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self {
            target_share_secs: 10.0,
            min_difficulty: 0.001,
            max_difficulty: 1_000_000.0,
        }
    }
}

/// Per-session ring of accept timestamps. Holds no difficulty of its own —
/// the caller (the session) owns the current difficulty and applies
/// whatever this state recommends.
#[derive(Debug, Clone)]
pub struct VardiffState {
    ring: VecDeque<Instant>,
}

impl VardiffState {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_SIZE),
        }
    }

    /// Record an accepted share. Once the ring holds `RING_SIZE` entries,
    /// compute the mean inter-share interval, evaluate the retarget rule,
    /// and clear the ring so the next window starts fresh. Returns the new
    /// difficulty if one is warranted.
    pub fn record_accept(
        &mut self,
        now: Instant,
        current_difficulty: f64,
        config: &VardiffConfig,
    ) -> Option<f64> {
        self.ring.push_back(now);
        if self.ring.len() < RING_SIZE {
            return None;
        }

        let mean_interval = mean_interval(&self.ring);
        self.ring.clear();

        let target = config.target_share_secs;
        // The property tests in the spec pin the halving floor at
        // max(1, min_difficulty), not min_difficulty alone.
        let floor = config.min_difficulty.max(1.0);

        if mean_interval < target / 2.0 {
            let doubled = (current_difficulty * 2.0).min(config.max_difficulty);
            if doubled != current_difficulty {
                return Some(doubled);
            }
        } else if mean_interval > target * 2.0 {
            let halved = (current_difficulty / 2.0).max(floor);
            if halved != current_difficulty {
                return Some(halved);
            }
        }

        None
    }
}

impl Default for VardiffState {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_interval(ring: &VecDeque<Instant>) -> f64 {
    let first = *ring.front().expect("ring is full");
    let last = *ring.back().expect("ring is full");
    let span = last.saturating_duration_since(first).as_secs_f64();
    let gaps = (ring.len() - 1).max(1) as f64;
    span / gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VardiffConfig {
        VardiffConfig {
            target_share_secs: 10.0,
            min_difficulty: 0.001,
            max_difficulty: 1_000_000.0,
        }
    }

    #[test]
    fn no_adjustment_before_ring_is_full() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        for i in 0..RING_SIZE - 1 {
            let result = state.record_accept(start + Duration::from_secs(i as u64), 100.0, &config());
            assert!(result.is_none());
        }
    }

    #[test]
    fn doubles_when_shares_arrive_at_quarter_target() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        let step = Duration::from_secs_f64(2.5); // target/4
        let mut result = None;
        for i in 0..RING_SIZE {
            result = state.record_accept(start + step * i as u32, 100.0, &config());
        }
        assert_eq!(result, Some(200.0));
    }

    #[test]
    fn halves_when_shares_arrive_at_triple_target() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        let step = Duration::from_secs(30); // target*3
        let mut result = None;
        for i in 0..RING_SIZE {
            result = state.record_accept(start + step * i as u32, 100.0, &config());
        }
        assert_eq!(result, Some(50.0));
    }

    #[test]
    fn doubling_is_capped_by_max_difficulty() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        let step = Duration::from_secs_f64(2.5);
        let mut result = None;
        for i in 0..RING_SIZE {
            result = state.record_accept(start + step * i as u32, 900_000.0, &config());
        }
        assert_eq!(result, Some(1_000_000.0));
    }

    #[test]
    fn halving_is_floored_at_one_when_min_difficulty_is_lower() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        let step = Duration::from_secs(30);
        let mut result = None;
        for i in 0..RING_SIZE {
            result = state.record_accept(start + step * i as u32, 1.2, &config());
        }
        assert_eq!(result, Some(1.0));
    }

    #[test]
    fn ring_resets_after_evaluation() {
        let mut state = VardiffState::new();
        let start = Instant::now();
        let step = Duration::from_secs(10); // exactly on target, no adjustment
        for i in 0..RING_SIZE {
            state.record_accept(start + step * i as u32, 100.0, &config());
        }
        assert!(state.ring.is_empty());
    }
}

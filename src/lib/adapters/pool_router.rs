//! Pool router: an optional front of multiple Stratum adapters for one
//! logical pool with a hot-standby endpoint list (spec §4.10).

/// `failover` iterates in order and returns the first adapter with work;
/// `round_robin` rotates a cursor, advancing past the producing adapter on
/// success (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStrategy {
    Failover,
    RoundRobin,
}

/// Picks among a fixed set of adapter indices by polling each with
/// `has_work`, per the chosen strategy. Held separately from the adapters
/// themselves so it stays a pure index-selection policy.
pub struct PoolRouter {
    strategy: RouterStrategy,
    len: usize,
    cursor: usize,
}

impl PoolRouter {
    pub fn new(strategy: RouterStrategy, len: usize) -> Self {
        PoolRouter { strategy, len, cursor: 0 }
    }

    /// Select the next adapter index to poll, given a closure reporting
    /// whether the adapter at a given index currently has work queued.
    /// Returns `None` if none of the `len` adapters have work.
    pub fn select(&mut self, has_work: impl Fn(usize) -> bool) -> Option<usize> {
        if self.len == 0 {
            return None;
        }

        match self.strategy {
            RouterStrategy::Failover => (0..self.len).find(|&i| has_work(i)),
            RouterStrategy::RoundRobin => {
                for step in 0..self.len {
                    let idx = (self.cursor + step) % self.len;
                    if has_work(idx) {
                        self.cursor = (idx + 1) % self.len;
                        return Some(idx);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failover_always_prefers_the_lowest_index_with_work() {
        let mut router = PoolRouter::new(RouterStrategy::Failover, 3);
        assert_eq!(router.select(|i| i == 1 || i == 2), Some(1));
        assert_eq!(router.select(|i| i == 1 || i == 2), Some(1));
    }

    #[test]
    fn failover_returns_none_when_nothing_has_work() {
        let mut router = PoolRouter::new(RouterStrategy::Failover, 3);
        assert_eq!(router.select(|_| false), None);
    }

    #[test]
    fn round_robin_advances_past_the_producing_adapter_on_success() {
        let mut router = PoolRouter::new(RouterStrategy::RoundRobin, 3);
        assert_eq!(router.select(|_| true), Some(0));
        assert_eq!(router.select(|_| true), Some(1));
        assert_eq!(router.select(|_| true), Some(2));
        assert_eq!(router.select(|_| true), Some(0));
    }

    #[test]
    fn round_robin_skips_adapters_with_no_work_without_moving_the_cursor_past_them() {
        let mut router = PoolRouter::new(RouterStrategy::RoundRobin, 3);
        // index 1 never has work; cursor should keep landing on 0 then 2.
        assert_eq!(router.select(|i| i != 1), Some(0));
        assert_eq!(router.select(|i| i != 1), Some(2));
        assert_eq!(router.select(|i| i != 1), Some(0));
    }

    #[test]
    fn empty_router_always_returns_none() {
        let mut router = PoolRouter::new(RouterStrategy::Failover, 0);
        assert_eq!(router.select(|_| true), None);
    }
}

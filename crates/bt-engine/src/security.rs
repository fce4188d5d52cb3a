//! Security node state: a leaf holding a signed position in a priced
//! instrument (spec §3 "Security", §4.1 security update, §4.3).

use bt_core::{Date, TimeSeries};

/// State private to a security node.
///
/// `position` is arithmetically a float but constrained to integers by
/// the floor/ceil rounding rule in [`crate::tree::Tree::allocate`] —
/// nothing here stops a caller from hand-writing a fractional value,
/// but the engine itself never produces one.
pub struct SecurityState {
    pub(crate) position: f64,
    pub(crate) multiplier: f64,
    /// True once this security's price column was bound to the
    /// universe at `setup`; such a column is never rewritten by the
    /// security itself.
    pub(crate) prices_set: bool,
    /// False only when both weight and position are zero and nothing
    /// has changed since the last tick — the update-skip fast path.
    pub(crate) need_update: bool,
    pub(crate) last_pos: f64,
    /// Last tick date this security was updated on; `None` before the
    /// first update. Drives the date-transition check that gates a
    /// conditional price refresh in `Tree::update_security_node`.
    pub(crate) now: Option<Date>,
    pub(crate) setup_done: bool,
    /// Own price series, populated only when `!prices_set` (a
    /// synthesized security, e.g. a sub-strategy's index).
    pub(crate) prices: TimeSeries,
    pub(crate) values: TimeSeries,
    pub(crate) positions: TimeSeries,
}

impl SecurityState {
    pub(crate) fn new() -> Self {
        Self {
            position: 0.0,
            multiplier: 1.0,
            prices_set: false,
            need_update: true,
            last_pos: 0.0,
            now: None,
            setup_done: false,
            prices: TimeSeries::zeros(0),
            values: TimeSeries::zeros(0),
            positions: TimeSeries::zeros(0),
        }
    }

    pub(crate) fn setup(&mut self, len: usize, prices_set: bool) {
        self.prices_set = prices_set;
        self.prices = if prices_set { TimeSeries::zeros(0) } else { TimeSeries::nan(len) };
        self.values = TimeSeries::zeros(len);
        self.positions = TimeSeries::zeros(len);
        self.setup_done = true;
    }

    /// Current position (signed share count).
    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Contract multiplier (default 1.0); `value = position * price * multiplier`.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Sets the contract multiplier. Only meaningful before the first
    /// allocation; changing it mid-run changes the marked value of an
    /// existing position without any corresponding trade.
    pub fn set_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
    }

    /// Own synthesized price series (empty if bound to a universe column).
    #[must_use]
    pub fn prices(&self) -> &TimeSeries {
        &self.prices
    }

    /// Per-step value series (`position * price * multiplier`).
    #[must_use]
    pub fn values(&self) -> &TimeSeries {
        &self.values
    }

    /// Per-step position series.
    #[must_use]
    pub fn positions(&self) -> &TimeSeries {
        &self.positions
    }
}

impl Clone for SecurityState {
    fn clone(&self) -> Self {
        Self {
            position: self.position,
            multiplier: self.multiplier,
            prices_set: self.prices_set,
            need_update: self.need_update,
            last_pos: self.last_pos,
            now: self.now,
            setup_done: self.setup_done,
            prices: self.prices.clone(),
            values: self.values.clone(),
            positions: self.positions.clone(),
        }
    }
}

/// Per-step bookkeeping the tree's `update_node` writes into a
/// security's buffers — kept as a free function so `Tree::update_node`
/// can call it without fighting the borrow checker over `&mut NodeSlot`
/// vs. `&Universe`.
///
/// `weight` is passed in rather than read from `SecurityState` because
/// weight lives on the shared `NodeSlot`; dormancy (spec §4.1 step 5 of
/// the security update) requires both position and weight to be zero.
pub(crate) fn snapshot(state: &mut SecurityState, row: usize, price: f64, value: f64, weight: f64) {
    if !state.prices_set {
        state.prices.set(row, price);
    }
    state.values.set(row, value);
    state.positions.set(row, state.position);
    state.last_pos = state.position;
    if state.position == 0.0 && weight == 0.0 {
        state.need_update = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_security_is_flat() {
        let s = SecurityState::new();
        assert_eq!(s.position(), 0.0);
        assert_eq!(s.multiplier(), 1.0);
        assert!(s.need_update);
    }

    #[test]
    fn test_setup_bound_vs_synthesized() {
        let mut bound = SecurityState::new();
        bound.setup(5, true);
        assert!(bound.prices().is_empty());

        let mut synthesized = SecurityState::new();
        synthesized.setup(5, false);
        assert_eq!(synthesized.prices().len(), 5);
        assert!(synthesized.prices().get(0).unwrap().is_nan());
    }

    #[test]
    fn test_snapshot_dormant_when_flat() {
        let mut s = SecurityState::new();
        s.setup(2, false);
        s.position = 0.0;
        snapshot(&mut s, 0, 100.0, 0.0, 0.0);
        assert!(!s.need_update);
    }

    #[test]
    fn test_snapshot_stays_active_when_held() {
        let mut s = SecurityState::new();
        s.setup(2, false);
        s.position = 5.0;
        snapshot(&mut s, 0, 100.0, 500.0, 1.0);
        assert!(s.need_update);
        assert_eq!(s.values().get(0), Some(500.0));
        assert_eq!(s.positions().get(0), Some(5.0));
    }
}

//! Strategy node state: a capital allocator with children (spec §3
//! "Strategy", §4.1 strategy update, §4.2).

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;

use bt_core::{Date, TimeSeries};

use crate::algo::AlgoStack;
use crate::commission::{default_commission_fn, CommissionFn};
use crate::node::NodeId;
use crate::tree::Tree;

/// State private to a strategy node.
///
/// `commission` and `stack` hold `Rc<dyn _>` trait objects, which do
/// not implement `Debug`; see the manual [`fmt::Debug`] impl below.
/// `Clone` is also manual: a strategy's `paper` twin is only ever
/// cloned pre-setup, when it is still `None`, so the clone used by
/// [`crate::tree::Tree::clone_subtree`] never needs to duplicate an
/// already-funded twin — it always starts the copy fresh.
pub struct StrategyState {
    pub(crate) capital: f64,
    pub(crate) net_flows: f64,
    pub(crate) last_value: f64,
    pub(crate) last_price: f64,
    pub(crate) last_fee: f64,
    pub(crate) now: Option<Date>,
    pub(crate) universe_tickers: Option<HashSet<String>>,
    pub(crate) strat_children: HashSet<String>,
    pub(crate) commission: CommissionFn,
    /// The detached paper-trade twin (spec §4.2 `setup`), `None` for
    /// the root and before `setup` has run on a non-root strategy.
    pub(crate) paper: Option<Box<Tree>>,
    pub(crate) stack: Option<AlgoStack>,
    pub(crate) temp: std::collections::HashMap<String, serde_json::Value>,
    pub(crate) perm: std::collections::HashMap<String, serde_json::Value>,
    pub(crate) children: IndexMap<String, NodeId>,
    pub(crate) setup_done: bool,
    pub(crate) prices: TimeSeries,
    pub(crate) values: TimeSeries,
    pub(crate) cash: TimeSeries,
    pub(crate) fees: TimeSeries,
}

impl fmt::Debug for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyState")
            .field("capital", &self.capital)
            .field("net_flows", &self.net_flows)
            .field("last_value", &self.last_value)
            .field("last_price", &self.last_price)
            .field("last_fee", &self.last_fee)
            .field("now", &self.now)
            .field("children", &self.children)
            .field("strat_children", &self.strat_children)
            .field("has_paper", &self.paper.is_some())
            .field("has_stack", &self.stack.is_some())
            .field("setup_done", &self.setup_done)
            .finish_non_exhaustive()
    }
}

impl Clone for StrategyState {
    fn clone(&self) -> Self {
        Self {
            capital: self.capital,
            net_flows: self.net_flows,
            last_value: self.last_value,
            last_price: self.last_price,
            last_fee: self.last_fee,
            now: self.now,
            universe_tickers: self.universe_tickers.clone(),
            strat_children: self.strat_children.clone(),
            commission: self.commission.clone(),
            paper: None,
            stack: self.stack.clone(),
            temp: self.temp.clone(),
            perm: self.perm.clone(),
            children: self.children.clone(),
            setup_done: self.setup_done,
            prices: self.prices.clone(),
            values: self.values.clone(),
            cash: self.cash.clone(),
            fees: self.fees.clone(),
        }
    }
}

impl StrategyState {
    pub(crate) fn new() -> Self {
        Self {
            capital: 0.0,
            net_flows: 0.0,
            last_value: 0.0,
            last_price: 100.0,
            last_fee: 0.0,
            now: None,
            universe_tickers: None,
            strat_children: HashSet::new(),
            commission: default_commission_fn(),
            paper: None,
            stack: None,
            temp: std::collections::HashMap::new(),
            perm: std::collections::HashMap::new(),
            children: IndexMap::new(),
            setup_done: false,
            prices: TimeSeries::zeros(0),
            values: TimeSeries::zeros(0),
            cash: TimeSeries::zeros(0),
            fees: TimeSeries::zeros(0),
        }
    }

    pub(crate) fn setup_buffers(&mut self, len: usize) {
        self.prices = TimeSeries::zeros(len);
        self.values = TimeSeries::zeros(len);
        self.cash = TimeSeries::zeros(len);
        self.fees = TimeSeries::zeros(len);
        self.setup_done = true;
    }

    /// Unallocated cash.
    #[must_use]
    pub fn capital(&self) -> f64 {
        self.capital
    }

    /// Child nodes by name, in the order they were registered.
    #[must_use]
    pub fn children(&self) -> &IndexMap<String, NodeId> {
        &self.children
    }

    /// The symbol whitelist this strategy may trade, if restricted.
    #[must_use]
    pub fn universe_tickers(&self) -> Option<&HashSet<String>> {
        self.universe_tickers.as_ref()
    }

    /// Restricts this strategy to trading only the given symbols.
    /// Must be called before `setup`.
    pub fn set_universe_tickers(&mut self, tickers: HashSet<String>) {
        self.universe_tickers = Some(tickers);
    }

    /// Installs the external algo stack this strategy runs against
    /// itself on `run`.
    pub fn set_stack(&mut self, stack: AlgoStack) {
        self.stack = Some(stack);
    }

    /// Installs a custom commission function, overriding the default
    /// `max(1, 0.01 * |quantity|)`.
    pub fn set_commission(&mut self, commission: CommissionFn) {
        self.commission = commission;
    }

    /// Per-tick scratch values, cleared before each `run`.
    #[must_use]
    pub fn temp(&self) -> &std::collections::HashMap<String, serde_json::Value> {
        &self.temp
    }

    /// Persistent scratch values, never cleared by the engine.
    #[must_use]
    pub fn perm(&self) -> &std::collections::HashMap<String, serde_json::Value> {
        &self.perm
    }

    /// Mutable access to the persistent scratch map.
    pub fn perm_mut(&mut self) -> &mut std::collections::HashMap<String, serde_json::Value> {
        &mut self.perm
    }

    /// Strategy index price series.
    #[must_use]
    pub fn prices(&self) -> &TimeSeries {
        &self.prices
    }

    /// Strategy value series.
    #[must_use]
    pub fn values(&self) -> &TimeSeries {
        &self.values
    }

    /// Cash (capital) snapshot series.
    #[must_use]
    pub fn cash(&self) -> &TimeSeries {
        &self.cash
    }

    /// Fee snapshot series.
    #[must_use]
    pub fn fees(&self) -> &TimeSeries {
        &self.fees
    }
}

//! The simulation tree: an arena of strategy and security nodes, the
//! stale-propagation update protocol, and capital-conservation
//! accounting (spec §3, §4).

use std::collections::HashMap;
use std::sync::OnceLock;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use bt_core::{Date, TimeSeries, Universe, UniverseView};

use crate::config::EngineConfig;
use crate::error::{TreeError, TreeResult};
use crate::node::{NodeId, NodeKind, NodeSlot};
use crate::security::{self, SecurityState};
use crate::strategy::StrategyState;

/// The tree-structured portfolio simulation: a single shared [`Universe`]
/// plus an arena of strategy/security nodes reachable from the root.
///
/// Node identity is entirely index-based ([`NodeId`]); there is no
/// `Rc<RefCell<...>>` anywhere in the arena. `Tree` deliberately does
/// not implement `Clone` — a full tree clone is never needed; the one
/// case that looks like one, a non-root strategy's paper-trade twin, is
/// built by [`Tree::clone_subtree`], which reconstructs a fresh,
/// independently-rooted `Tree` field by field rather than cloning this
/// struct wholesale.
pub struct Tree {
    universe: Universe,
    nodes: Vec<NodeSlot>,
    /// True once any node's `allocate`/`adjust`/`run` has moved capital
    /// or cash since the last full `update`; read by lazily-refreshing
    /// accessors (`value`, `price`, ...) to decide whether to re-run
    /// `update` at the last-seen date before answering.
    stale: bool,
    last_update: Option<Date>,
    config: EngineConfig,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("stale", &self.stale)
            .field("last_update", &self.last_update)
            .finish_non_exhaustive()
    }
}

fn empty_children() -> &'static IndexMap<String, NodeId> {
    static EMPTY: OnceLock<IndexMap<String, NodeId>> = OnceLock::new();
    EMPTY.get_or_init(IndexMap::new)
}

impl Tree {
    /// Builds a new tree with a single root strategy named `root_name`,
    /// over the given universe. The tree is not yet set up; call
    /// [`Tree::setup`] before the first [`Tree::update`].
    #[must_use]
    pub fn new(root_name: impl Into<String>, universe: Universe) -> Self {
        let root_name = root_name.into();
        debug!(root = %root_name, rows = universe.len(), "tree created");
        let root = NodeSlot::new(root_name, NodeId::ROOT, NodeKind::Strategy(StrategyState::new()));
        Self {
            universe,
            nodes: vec![root],
            stale: true,
            last_update: None,
            config: EngineConfig::default(),
        }
    }

    /// Convenience constructor: builds a single-strategy tree and
    /// immediately runs `setup` on it, for callers (and tests) that
    /// don't need to add any children before the first tick.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`Tree::setup`].
    pub fn new_single_strategy(root_name: impl Into<String>, universe: Universe) -> TreeResult<Self> {
        let mut tree = Self::new(root_name, universe);
        tree.setup()?;
        Ok(tree)
    }

    /// Overrides the default [`EngineConfig`]. Must be called before
    /// `setup`.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The root node's id (always `NodeId::ROOT`).
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Read-only access to the shared price panel.
    #[must_use]
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// The date-sliced view of the price panel a strategy's algo stack
    /// is allowed to see: every row up to and including this node's own
    /// `now`, restricted to `universe_tickers` if this strategy has a
    /// whitelist set (spec §4.2 `setup`: "restrict the operational
    /// universe ... keep only those columns that appear in both"; §6,
    /// algorithm contract: `target.universe`). A strategy that has not
    /// yet seen its first tick gets an empty view.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn universe_view(&self, id: NodeId) -> TreeResult<UniverseView<'_>> {
        let strat = self.strategy(id)?;
        let view = match strat.now {
            Some(date) => self.universe.view_up_to(date),
            None => self.universe.view_up_to_row(0),
        };
        Ok(view.restrict(strat.universe_tickers.as_ref()))
    }

    fn slot(&self, id: NodeId) -> TreeResult<&NodeSlot> {
        self.nodes
            .get(id.index() as usize)
            .ok_or(TreeError::UnknownNode { id: id.index() })
    }

    fn slot_mut(&mut self, id: NodeId) -> TreeResult<&mut NodeSlot> {
        self.nodes
            .get_mut(id.index() as usize)
            .ok_or(TreeError::UnknownNode { id: id.index() })
    }

    fn strategy(&self, id: NodeId) -> TreeResult<&StrategyState> {
        let name = self.slot(id)?.name.clone();
        self.slot(id)?
            .kind
            .as_strategy()
            .ok_or(TreeError::WrongNodeKind { node: name, expected: "strategy" })
    }

    fn strategy_mut(&mut self, id: NodeId) -> TreeResult<&mut StrategyState> {
        let name = self.slot(id)?.name.clone();
        self.slot_mut(id)?
            .kind
            .as_strategy_mut()
            .ok_or(TreeError::WrongNodeKind { node: name, expected: "strategy" })
    }

    fn security_mut(&mut self, id: NodeId) -> TreeResult<&mut SecurityState> {
        let name = self.slot(id)?.name.clone();
        self.slot_mut(id)?
            .kind
            .as_security_mut()
            .ok_or(TreeError::WrongNodeKind { node: name, expected: "security" })
    }

    /// This node's own name (not dotted).
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn name(&self, id: NodeId) -> TreeResult<&str> {
        Ok(&self.slot(id)?.name)
    }

    /// This node's parent, or itself if it is the root.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn parent(&self, id: NodeId) -> TreeResult<NodeId> {
        Ok(self.slot(id)?.parent)
    }

    /// The full dotted path from the root down to this node, e.g.
    /// `"root.bucket.AAPL"`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn full_name(&self, id: NodeId) -> TreeResult<String> {
        let mut parts = vec![self.slot(id)?.name.clone()];
        let mut cur = id;
        while cur != NodeId::ROOT {
            cur = self.slot(cur)?.parent;
            parts.push(self.slot(cur)?.name.clone());
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    /// True if `id` names a strategy node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn is_strategy(&self, id: NodeId) -> TreeResult<bool> {
        Ok(self.slot(id)?.kind.is_strategy())
    }

    /// This node's children by name, in registration order. Always
    /// empty for a security.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn children(&self, id: NodeId) -> TreeResult<&IndexMap<String, NodeId>> {
        match &self.slot(id)?.kind {
            NodeKind::Strategy(s) => Ok(&s.children),
            NodeKind::Security(_) => Ok(empty_children()),
        }
    }

    /// This node's own last-ticked date: `None` before its first
    /// `update`. Strategies and securities each track their own, since a
    /// freshly materialized child can lag its parent by one call until
    /// the next `update` catches it up (spec §3, Node: `now`).
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn now(&self, id: NodeId) -> TreeResult<Option<Date>> {
        Ok(match &self.slot(id)?.kind {
            NodeKind::Strategy(s) => s.now,
            NodeKind::Security(s) => s.now,
        })
    }

    /// `id` itself, followed by every descendant, in depth-first
    /// pre-order (spec §3, Node: `members` — "node plus recursive
    /// descendants").
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn members(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let mut out = vec![id];
        for &child in self.children(id)?.values() {
            out.extend(self.members(child)?);
        }
        Ok(out)
    }

    fn refresh_if_stale(&mut self) -> TreeResult<()> {
        if self.stale {
            if let Some(date) = self.last_update {
                self.update(date)?;
            }
        }
        Ok(())
    }

    /// Current total value at `id` (strategy: capital + children;
    /// security: `position * price * multiplier`), refreshing first if
    /// the tree is stale.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree, or
    /// propagates an error from the refresh.
    pub fn value(&mut self, id: NodeId) -> TreeResult<f64> {
        self.refresh_if_stale()?;
        Ok(self.slot(id)?.value)
    }

    /// Current fraction of the parent's value this node represents.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree, or
    /// propagates an error from the refresh.
    pub fn weight(&mut self, id: NodeId) -> TreeResult<f64> {
        self.refresh_if_stale()?;
        Ok(self.slot(id)?.weight)
    }

    /// Current price at `id` (strategy: index price; security: market
    /// price).
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree, or
    /// propagates an error from the refresh.
    pub fn price(&mut self, id: NodeId) -> TreeResult<f64> {
        self.refresh_if_stale()?;
        Ok(self.slot(id)?.price)
    }

    /// Unallocated capital at a strategy node.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn capital(&self, id: NodeId) -> TreeResult<f64> {
        Ok(self.strategy(id)?.capital)
    }

    /// Current signed position at a security node.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a strategy.
    pub fn position(&self, id: NodeId) -> TreeResult<f64> {
        let name = self.slot(id)?.name.clone();
        self.slot(id)?
            .kind
            .as_security()
            .map(SecurityState::position)
            .ok_or(TreeError::WrongNodeKind { node: name, expected: "security" })
    }

    /// Adds a new, not-yet-set-up strategy child under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `parent` is a security, or `AlreadySetUp`
    /// if the tree has already run `setup`.
    pub fn add_strategy(&mut self, parent: NodeId, name: impl Into<String>) -> TreeResult<NodeId> {
        let name = name.into();
        if self.strategy(parent)?.setup_done {
            return Err(TreeError::AlreadySetUp { node: self.full_name(parent)? });
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeSlot::new(name.clone(), parent, NodeKind::Strategy(StrategyState::new())));
        let parent_state = self.strategy_mut(parent)?;
        parent_state.children.insert(name.clone(), id);
        parent_state.strat_children.insert(name);
        Ok(id)
    }

    /// Adds a new, not-yet-set-up security child under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `parent` is a security, or `AlreadySetUp`
    /// if the tree has already run `setup`.
    pub fn add_security(&mut self, parent: NodeId, name: impl Into<String>) -> TreeResult<NodeId> {
        let name = name.into();
        if self.strategy(parent)?.setup_done {
            return Err(TreeError::AlreadySetUp { node: self.full_name(parent)? });
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeSlot::new(name.clone(), parent, NodeKind::Security(SecurityState::new())));
        self.strategy_mut(parent)?.children.insert(name, id);
        Ok(id)
    }

    /// If `parent` has no child named `name` yet, adds one as a
    /// security (the implicit-materialization rule `allocate`/`rebalance`
    /// rely on when routed by name rather than by `NodeId`).
    ///
    /// A freshly materialized security is also synchronously priced off
    /// the parent's last-ticked date, if the parent has one: without
    /// this, a security allocated to in the same tick it first appears
    /// would still carry the placeholder `NaN` price every node starts
    /// with, and `allocate_security` would reject the very trade that
    /// brought it into existence.
    fn materialize_security(&mut self, parent: NodeId, name: &str) -> TreeResult<NodeId> {
        if let Some(&id) = self.strategy(parent)?.children.get(name) {
            return Ok(id);
        }
        let parent_strat = self.strategy(parent)?;
        if let Some(allowed) = parent_strat.universe_tickers() {
            if !allowed.contains(name) {
                let parent_name = self.full_name(parent)?;
                return Err(TreeError::not_in_universe(parent_name, name));
            }
        }
        let id = self.add_security(parent, name.to_string())?;
        let len = self.universe.len();
        let prices_set = self.universe.has_column(name);
        self.security_mut(id)?.setup(len, prices_set);

        if prices_set {
            if let Some(date) = self.strategy(parent)?.now {
                if let Some(price) = self.universe.get(date, name) {
                    self.slot_mut(id)?.price = price;
                    self.security_mut(id)?.now = Some(date);
                }
            }
        }
        Ok(id)
    }

    // ---------------------------------------------------------------
    // setup
    // ---------------------------------------------------------------

    /// Finalizes the tree's structure: sizes every node's historical
    /// buffers to the universe's date axis, binds security price
    /// columns, and funds each non-root strategy's paper-trading twin
    /// (spec §4.2).
    ///
    /// # Errors
    ///
    /// Returns `AlreadySetUp` if called twice on the same node.
    pub fn setup(&mut self) -> TreeResult<()> {
        debug!(nodes = self.nodes.len(), rows = self.universe.len(), "tree setup starting");
        self.setup_node(NodeId::ROOT)?;
        debug!("tree setup complete");
        Ok(())
    }

    fn setup_node(&mut self, id: NodeId) -> TreeResult<()> {
        match self.slot(id)?.kind.is_strategy() {
            true => self.setup_strategy_node(id),
            false => self.setup_security_node(id),
        }
    }

    fn setup_strategy_node(&mut self, id: NodeId) -> TreeResult<()> {
        if self.strategy(id)?.setup_done {
            return Err(TreeError::AlreadySetUp { node: self.full_name(id)? });
        }

        if id != NodeId::ROOT {
            trace!(node = %self.full_name(id)?, "funding paper-trade twin");
            let mut twin = Box::new(self.clone_subtree(id)?);
            twin.setup()?;
            let seed = self.config.paper_seed_capital;
            twin.adjust(twin.root(), seed, true, 0.0)?;
            self.strategy_mut(id)?.paper = Some(twin);
        }

        let child_names: Vec<String> = self.strategy(id)?.strat_children.iter().cloned().collect();
        for name in child_names {
            self.universe.ensure_column(&name);
        }

        let len = self.universe.len();
        self.strategy_mut(id)?.setup_buffers(len);

        let children: Vec<NodeId> = self.strategy(id)?.children.values().copied().collect();
        for child in children {
            self.setup_node(child)?;
        }

        Ok(())
    }

    fn setup_security_node(&mut self, id: NodeId) -> TreeResult<()> {
        let name = self.slot(id)?.name.clone();
        if self.slot(id)?.kind.as_security().map_or(false, |s| s.setup_done) {
            return Err(TreeError::AlreadySetUp { node: self.full_name(id)? });
        }
        let len = self.universe.len();
        let prices_set = self.universe.has_column(&name);
        self.security_mut(id)?.setup(len, prices_set);
        Ok(())
    }

    // ---------------------------------------------------------------
    // clone_subtree: builds a detached, freshly-rooted copy of the
    // subtree under `id`, used to fund a strategy's paper-trading twin.
    // ---------------------------------------------------------------

    fn clone_subtree(&self, id: NodeId) -> TreeResult<Tree> {
        let mut old_to_new: HashMap<NodeId, NodeId> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        self.collect_subtree(id, &mut old_to_new, &mut order);

        let mut new_nodes: Vec<NodeSlot> = Vec::with_capacity(order.len());
        for &old_id in &order {
            let old_slot = self.slot(old_id)?;
            let new_parent = if old_id == id {
                NodeId::ROOT
            } else {
                *old_to_new
                    .get(&old_slot.parent)
                    .expect("parent of a collected node is always collected first")
            };

            let new_kind = match &old_slot.kind {
                NodeKind::Security(sec) => NodeKind::Security(sec.clone()),
                NodeKind::Strategy(strat) => {
                    let mut cloned = strat.clone();
                    cloned.paper = None;
                    cloned.setup_done = false;
                    cloned.children = cloned
                        .children
                        .iter()
                        .map(|(name, old_child)| (name.clone(), old_to_new[old_child]))
                        .collect();
                    NodeKind::Strategy(cloned)
                }
            };

            new_nodes.push(NodeSlot {
                name: old_slot.name.clone(),
                parent: new_parent,
                price: old_slot.price,
                value: old_slot.value,
                weight: old_slot.weight,
                kind: new_kind,
            });
        }

        Ok(Tree {
            universe: self.universe.clone(),
            nodes: new_nodes,
            stale: true,
            last_update: None,
            config: self.config.clone(),
        })
    }

    fn collect_subtree(&self, id: NodeId, old_to_new: &mut HashMap<NodeId, NodeId>, order: &mut Vec<NodeId>) {
        old_to_new.insert(id, NodeId(order.len() as u32));
        order.push(id);
        if let Ok(slot) = self.slot(id) {
            if let NodeKind::Strategy(s) = &slot.kind {
                let kids: Vec<NodeId> = s.children.values().copied().collect();
                for kid in kids {
                    self.collect_subtree(kid, old_to_new, order);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // update
    // ---------------------------------------------------------------

    /// Advances the tree to `date`, recomputing every node's value,
    /// price and weight from the current universe and the effect of any
    /// `allocate`/`rebalance`/`adjust` calls made since the last update
    /// (spec §4.1). The driver calls this once at the start of each
    /// tick, before running the algo stack via [`Tree::run`], and again
    /// afterwards to commit that tick's trades.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::NegativeRootValue` if the root's value goes
    /// negative, or `TreeError::DivisionByZeroInReturn` if a node's
    /// tick return is undefined.
    pub fn update(&mut self, date: Date) -> TreeResult<()> {
        self.update_node(NodeId::ROOT, date)?;
        self.stale = false;
        self.last_update = Some(date);
        Ok(())
    }

    fn update_node(&mut self, id: NodeId, date: Date) -> TreeResult<()> {
        match self.slot(id)?.kind.is_strategy() {
            true => self.update_strategy_node(id, date),
            false => self.update_security_node(id, date),
        }
    }

    fn update_strategy_node(&mut self, id: NodeId, date: Date) -> TreeResult<()> {
        let row = self.universe.row_of(date);

        let newpt = match self.strategy(id)?.now {
            None => true,
            Some(prev) if prev != date => {
                let current_price = self.slot(id)?.price;
                let current_value = self.slot(id)?.value;
                let strat = self.strategy_mut(id)?;
                strat.net_flows = 0.0;
                strat.last_price = current_price;
                strat.last_value = current_value;
                strat.last_fee = 0.0;
                true
            }
            Some(_) => false,
        };
        self.strategy_mut(id)?.now = Some(date);

        let children: Vec<NodeId> = self.strategy(id)?.children.values().copied().collect();
        for child in &children {
            let skip = match &self.slot(*child)?.kind {
                NodeKind::Security(sec) => !sec.need_update,
                NodeKind::Strategy(_) => false,
            };
            if skip {
                continue;
            }
            self.update_node(*child, date)?;
        }

        let capital = self.strategy(id)?.capital;
        let children_value: f64 = children.iter().map(|c| self.slot(*c).map(|s| s.value)).collect::<TreeResult<Vec<f64>>>()?.into_iter().sum();
        let value = capital + children_value;

        if id == NodeId::ROOT && value < 0.0 {
            warn!(%date, value, "root value went negative, aborting update");
            return Err(TreeError::negative_root_value(date, value));
        }

        let strat = self.strategy(id)?;
        let last_value = strat.last_value;
        let net_flows = strat.net_flows;
        let last_price = strat.last_price;
        let denom = last_value + net_flows;

        let price = if (value - last_value - net_flows).abs() < f64::EPSILON && denom == 0.0 {
            last_price
        } else if denom == 0.0 {
            let node = self.full_name(id)?;
            warn!(%node, last_value, net_flows, value, "zero-denominator return, aborting update");
            return Err(TreeError::DivisionByZeroInReturn {
                node,
                last_value,
                net_flows,
                value,
            });
        } else {
            let ret = (value - denom) / denom;
            last_price * (1.0 + ret)
        };

        {
            let slot = self.slot_mut(id)?;
            slot.value = value;
            slot.price = price;
        }

        // Re-price against the paper twin before this node's own price is
        // published anywhere else (universe column, weight denominators
        // downstream, cash/fees snapshot) — a parent reading a strat
        // child's price always sees the fully paper-adjusted figure
        // (spec.md §4.1: "update children... compute value"; the original
        // injects `self.children[c].price` only after `c.update()` has
        // returned in full).
        if newpt && id != NodeId::ROOT {
            if let Some(mut twin) = self.strategy_mut(id)?.paper.take() {
                twin.update(date)?;
                let twin_root = twin.root();
                twin.run(twin_root)?;
                twin.update(date)?;
                let twin_price = twin.price(twin_root)?;
                self.strategy_mut(id)?.paper = Some(twin);
                self.slot_mut(id)?.price = twin_price;
            }
        }

        let price = self.slot(id)?.price;

        for child in &children {
            let child_value = self.slot(*child)?.value;
            let weight = if value != 0.0 { child_value / value } else { 0.0 };
            self.slot_mut(*child)?.weight = weight;

            let is_dormant_security = matches!(&self.slot(*child)?.kind, NodeKind::Security(sec) if sec.position == 0.0 && weight == 0.0);
            if let NodeKind::Security(sec) = &mut self.slot_mut(*child)?.kind {
                if is_dormant_security {
                    sec.need_update = false;
                }
            }
        }

        if id != NodeId::ROOT {
            let name = self.slot(id)?.name.clone();
            self.universe.set_or_insert(date, &name, price)?;
        }

        if let Some(r) = row {
            let strat = self.strategy_mut(id)?;
            strat.prices.set(r, price);
            strat.values.set(r, value);
            strat.cash.set(r, strat.capital);
            strat.fees.set(r, strat.last_fee);
        }

        Ok(())
    }

    fn update_security_node(&mut self, id: NodeId, date: Date) -> TreeResult<()> {
        let row = self.universe.row_of(date);
        let name = self.slot(id)?.name.clone();

        let newpt = {
            let sec = self.security_mut(id)?;
            match sec.now {
                None => true,
                Some(prev) if prev != date => true,
                Some(_) => false,
            }
        };
        self.security_mut(id)?.now = Some(date);

        let price = if newpt {
            let prices_set = self.security_mut(id)?.prices_set;
            let p = if prices_set {
                self.universe.get(date, &name).unwrap_or(f64::NAN)
            } else {
                self.slot(id)?.price
            };
            self.slot_mut(id)?.price = p;
            p
        } else {
            self.slot(id)?.price
        };

        let (position, multiplier) = {
            let sec = self.security_mut(id)?;
            (sec.position, sec.multiplier)
        };
        let value = if price.is_nan() { 0.0 } else { position * price * multiplier };
        self.slot_mut(id)?.value = value;

        let weight = self.slot(id)?.weight;
        if let Some(r) = row {
            let sec = self.security_mut(id)?;
            security::snapshot(sec, r, price, value, weight);
        }

        Ok(())
    }

    // ---------------------------------------------------------------
    // adjust / allocate / rebalance / close / flatten
    // ---------------------------------------------------------------

    /// Directly mutates a strategy's cash: `amount` is added to
    /// capital, `fee` is subtracted. If `flow` is true, `amount` is
    /// also added to `net_flows` (a capital injection/withdrawal, which
    /// must not affect the strategy's own return); if false, it is a
    /// performance-affecting internal transfer. Setting `update` marks
    /// the tree stale so the next read re-derives value/price.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn adjust(&mut self, id: NodeId, amount: f64, flow: bool, fee: f64) -> TreeResult<()> {
        let strat = self.strategy_mut(id)?;
        strat.capital += amount - fee;
        if flow {
            strat.net_flows += amount;
        }
        strat.last_fee += fee;
        self.stale = true;
        Ok(())
    }

    /// Moves capital between a strategy and a named child, or injects
    /// capital into the strategy itself when `child` is `None`.
    ///
    /// When `child` is `Some`, the named child is materialized as a
    /// security if it does not already exist, then routed to
    /// [`Tree::allocate_security`] (if it is a security) or recursed
    /// into with `update` forced true (mirroring the source engine's
    /// own behavior, where a nested `allocate` call always re-derives
    /// its parent's value before computing the child's share).
    ///
    /// When `child` is `None`, `amount` is redistributed across the
    /// strategy's existing children proportionally to their current
    /// weights; this is a *redistribution* of capital the strategy
    /// already holds, not a fresh injection — see the `parent.adjust`
    /// / `self.adjust` pair below, which cancel exactly for the root
    /// (whose parent is itself) and correctly move capital for any
    /// other node.
    ///
    /// # Errors
    ///
    /// Returns `OrphanedSecurity`, `InvalidPrice`, `WrongNodeKind`, or a
    /// `Core`-wrapped universe error, depending on the target node.
    pub fn allocate(&mut self, id: NodeId, amount: f64, child: Option<&str>, update: bool) -> TreeResult<()> {
        if let Some(name) = child {
            let child_id = self.materialize_security(id, name)?;
            return match self.slot(child_id)?.kind.is_strategy() {
                true => self.allocate(child_id, amount, None, true),
                false => self.allocate_security(child_id, amount),
            };
        }

        if self.slot(id)?.kind.is_strategy() {
            let parent = self.parent(id)?;
            // The root's own parent is itself: `flow=true` there is a
            // deliberate net-zero cancellation (capital injection into
            // the root happens through `adjust`, not `allocate`). For
            // every other strategy, this is an internal transfer from
            // an already-allocating parent — not a flow at the parent's
            // level, only at this node's own (spec §4.2).
            let parent_is_flow = id == NodeId::ROOT;
            self.adjust(parent, -amount, parent_is_flow, 0.0)?;
            self.adjust(id, amount, true, 0.0)?;

            let children: Vec<(String, NodeId, f64)> = {
                let strat = self.strategy(id)?;
                strat.children.iter().map(|(n, &c)| (n.clone(), c, self.slot(c).map(|s| s.weight).unwrap_or(0.0))).collect()
            };
            for (name, _child_id, weight) in children {
                if weight != 0.0 {
                    self.allocate(id, amount * weight, Some(&name), true)?;
                }
            }
        } else {
            self.allocate_security(id, amount)?;
        }

        if update {
            self.stale = true;
        }
        Ok(())
    }

    fn allocate_security(&mut self, id: NodeId, amount: f64) -> TreeResult<()> {
        if amount == 0.0 {
            return Ok(());
        }
        let parent = self.parent(id)?;
        if parent == id {
            let node = self.full_name(id)?;
            warn!(%node, "attempted to allocate to an orphaned security");
            return Err(TreeError::orphaned_security(node));
        }

        let price = self.slot(id)?.price;
        if price == 0.0 || price.is_nan() {
            let node = self.full_name(id)?;
            warn!(%node, price, "attempted to allocate to a security with an invalid price");
            return Err(TreeError::invalid_price(node, price));
        }

        let (position, multiplier) = match &self.slot(id)?.kind {
            NodeKind::Security(s) => (s.position, s.multiplier),
            NodeKind::Strategy(_) => return Err(TreeError::WrongNodeKind { node: self.full_name(id)?, expected: "security" }),
        };

        let unit_value = price * multiplier;
        let raw_q = amount / unit_value;

        let target_position = position + raw_q;
        let q = if target_position.abs() < self.config.rounding_epsilon {
            -position
        } else if position > 0.0 || (position == 0.0 && amount > 0.0) {
            // Going long or extending an existing long: floor, so the
            // trade never spends more than `amount` allows.
            raw_q.floor()
        } else {
            // Going short or extending an existing short: ceil, so the
            // trade never sells more than `amount` implies.
            raw_q.ceil()
        };

        if q.abs() < self.config.rounding_epsilon {
            return Ok(());
        }

        let commission = {
            let strat = self.strategy(parent)?;
            (strat.commission)(q.abs(), unit_value)
        };
        let outlay = -(q * unit_value);
        trace!(node = %self.full_name(id)?, quantity = q, unit_value, commission, "security trade executed");

        {
            let sec = self.security_mut(id)?;
            sec.position += q;
            // A trade just moved this security away from (or to) flat;
            // re-arm it so the next update recomputes its value/price
            // instead of taking the dormant-skip fast path.
            sec.need_update = true;
        }

        self.adjust(parent, outlay, false, commission)
    }

    /// Sets a named child's weight directly: computes the capital delta
    /// implied by the requested weight change and routes it through
    /// [`Tree::allocate`]. A weight of exactly zero closes the position
    /// instead (spec §4.4).
    ///
    /// `base` pins the value a requested weight is measured against. Pass
    /// `None` to use this node's own current value (recomputed fresh, as
    /// spec.md's `base=NaN` default does). A caller sweeping several
    /// children to target weights in one tick should pass the same
    /// `Some(value_at_sweep_start)` to every call in the sweep: each
    /// `allocate` shifts cash between this node and a child but leaves
    /// this node's own total value unchanged *except* for the commission
    /// it pays on every trade, so without a pinned base each successive
    /// call in the sweep would measure its target weight against a base
    /// eroded by the previous calls' fees (spec §4.2).
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Tree::close`] or [`Tree::allocate`].
    pub fn rebalance(&mut self, id: NodeId, name: &str, weight: f64, base: Option<f64>, update: bool) -> TreeResult<()> {
        if weight == 0.0 {
            return self.close(id, name);
        }

        let child_id = self.materialize_security(id, name)?;
        let current_weight = self.slot(child_id)?.weight;
        let delta = weight - current_weight;
        let base = match base {
            Some(b) => b,
            None => self.value(id)?,
        };
        self.allocate(id, delta * base, Some(name), update)
    }

    /// Closes a named child's position entirely (flattening its own
    /// children first if it is a non-empty strategy). A name with no
    /// matching child is a no-op, matching `rebalance(id, name, 0.0,
    /// _)`'s treatment of an absent child.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Tree::flatten`] or [`Tree::allocate`].
    pub fn close(&mut self, id: NodeId, name: &str) -> TreeResult<()> {
        let Some(&child_id) = self.strategy(id)?.children.get(name) else {
            return Ok(());
        };

        if self.slot(child_id)?.kind.is_strategy() && !self.children(child_id)?.is_empty() {
            self.flatten(child_id)?;
        }

        let value = self.value(child_id)?;
        if value != 0.0 {
            self.allocate(id, -value, Some(name), true)?;
        }
        Ok(())
    }

    /// Closes every child of `id` with a nonzero value.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Tree::allocate`].
    pub fn flatten(&mut self, id: NodeId) -> TreeResult<()> {
        let names: Vec<String> = self.strategy(id)?.children.keys().cloned().collect();
        for name in names {
            let child_id = self.strategy(id)?.children[&name];
            let value = self.value(child_id)?;
            if value != 0.0 {
                self.allocate(id, -value, Some(&name), true)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // run
    // ---------------------------------------------------------------

    /// Clears `target`'s per-tick scratch map and runs its installed
    /// algo stack (if any) against it, then recurses into its children.
    /// Securities are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `target` does not belong to this tree.
    pub fn run(&mut self, target: NodeId) -> TreeResult<bool> {
        if !self.slot(target)?.kind.is_strategy() {
            return Ok(true);
        }

        self.strategy_mut(target)?.temp.clear();

        let stack = self.strategy(target)?.stack.clone();
        let result = match stack {
            Some(stack) => stack.run(self, target),
            None => true,
        };

        let children: Vec<NodeId> = self.strategy(target)?.children.values().copied().collect();
        for child in children {
            self.run(child)?;
        }

        Ok(result)
    }

    /// Per-tick scratch map at `id` (cleared by `run`).
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn temp(&self, id: NodeId) -> TreeResult<&std::collections::HashMap<String, serde_json::Value>> {
        Ok(&self.strategy(id)?.temp)
    }

    /// Mutable access to the per-tick scratch map at `id`, for an algo
    /// that wants to pass data to a later stage of the same stack run.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn temp_mut(&mut self, id: NodeId) -> TreeResult<&mut std::collections::HashMap<String, serde_json::Value>> {
        Ok(&mut self.strategy_mut(id)?.temp)
    }

    /// Persistent scratch map at `id`, never cleared by the engine.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn perm(&self, id: NodeId) -> TreeResult<&std::collections::HashMap<String, serde_json::Value>> {
        Ok(&self.strategy(id)?.perm)
    }

    /// Mutable access to the persistent scratch map at `id`.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn perm_mut(&mut self, id: NodeId) -> TreeResult<&mut std::collections::HashMap<String, serde_json::Value>> {
        Ok(&mut self.strategy_mut(id)?.perm)
    }

    /// Installs an algo stack on the strategy at `id`.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn set_stack(&mut self, id: NodeId, stack: crate::algo::AlgoStack) -> TreeResult<()> {
        self.strategy_mut(id)?.set_stack(stack);
        Ok(())
    }

    /// Restricts the strategy at `id` to trading only the given symbols
    /// (spec §4.2 `setup`). Must be called before `setup` runs on this
    /// node: once set, `universe_view` hides every other column and
    /// `allocate`/`rebalance` reject symbols outside the whitelist.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn set_universe_tickers(&mut self, id: NodeId, tickers: std::collections::HashSet<String>) -> TreeResult<()> {
        self.strategy_mut(id)?.set_universe_tickers(tickers);
        Ok(())
    }

    /// Historical value series at `id` (strategy or security).
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `id` does not belong to this tree.
    pub fn values(&self, id: NodeId) -> TreeResult<&TimeSeries> {
        match &self.slot(id)?.kind {
            NodeKind::Strategy(s) => Ok(&s.values),
            NodeKind::Security(s) => Ok(&s.values),
        }
    }

    /// Historical position series at a security node.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a strategy.
    pub fn positions(&self, id: NodeId) -> TreeResult<&TimeSeries> {
        let name = self.slot(id)?.name.clone();
        self.slot(id)?
            .kind
            .as_security()
            .map(SecurityState::positions)
            .ok_or(TreeError::WrongNodeKind { node: name, expected: "security" })
    }

    /// Historical cash series at a strategy node.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn cash(&self, id: NodeId) -> TreeResult<&TimeSeries> {
        Ok(&self.strategy(id)?.cash)
    }

    /// Historical fee series at a strategy node.
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if `id` is a security.
    pub fn fees(&self, id: NodeId) -> TreeResult<&TimeSeries> {
        Ok(&self.strategy(id)?.fees)
    }
}

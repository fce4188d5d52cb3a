//! # bt-engine
//!
//! The tree-structured portfolio simulation engine: strategies allocate
//! capital to children (nested strategies or securities), securities
//! hold signed positions in priced instruments, and the whole tree
//! advances tick by tick through a single shared [`bt_core::Universe`].
//!
//! ## Design Philosophy
//!
//! - **Arena, not `Rc<RefCell<...>>`**: every node lives in [`Tree`]'s
//!   `Vec<NodeSlot>`; cross-node references are plain [`NodeId`]
//!   indices, so there is no reference cycle and no interior
//!   mutability to reason about at the call site.
//! - **Capital conservation**: flows (external capital in/out) and
//!   performance impacts (fees, trading P&L) are tracked separately on
//!   every strategy, so a strategy's own index price always reflects
//!   its trading performance, never the act of being funded or
//!   defunded.
//! - **Lazy, stale-propagating reads**: `allocate`/`rebalance`/`adjust`
//!   mark the tree stale rather than eagerly recomputing; the next
//!   value/price/weight read (or the next explicit `update`) settles
//!   the whole tree in one pass.
//! - **Paper-trading twin**: a non-root strategy's own index price is
//!   computed against a detached clone of its own subtree, isolated
//!   from its parent's capital flows, so nesting strategies never
//!   distorts a child's own track record.
//!
//! ## Typical usage
//!
//! ```rust
//! use bt_core::Universe;
//! use bt_engine::Tree;
//!
//! let mut tree = Tree::new_single_strategy("root", Universe::empty()).unwrap();
//! let root = tree.root();
//! assert_eq!(tree.name(root).unwrap(), "root");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod algo;
mod commission;
mod config;
mod error;
mod node;
mod security;
mod strategy;
mod tree;

pub use algo::{Algo, AlgoStack};
pub use commission::{default_commission, default_commission_fn, CommissionFn};
pub use config::EngineConfig;
pub use error::{TreeError, TreeResult};
pub use node::{NodeId, NodeKind};
pub use security::SecurityState;
pub use strategy::StrategyState;
pub use tree::Tree;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        default_commission, default_commission_fn, Algo, AlgoStack, CommissionFn, EngineConfig, NodeId, NodeKind,
        SecurityState, StrategyState, Tree, TreeError, TreeResult,
    };
    pub use bt_core::{Date, TimeSeries, Universe, UniverseView};
}

//! Arena node handles and the fields common to every node.

use std::fmt;

use crate::security::SecurityState;
use crate::strategy::StrategyState;

/// A handle into a [`crate::Tree`]'s node arena.
///
/// `NodeId` replaces the `parent`/`root` backreferences spec.md's
/// design notes describe: instead of a smart pointer pointing "up" the
/// tree (which would need `Weak` to avoid a reference cycle), every
/// cross-node reference is a plain index into the tree's `Vec<NodeSlot>`.
/// `NodeId(0)` is always the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The root of any tree is always index 0.
    pub const ROOT: NodeId = NodeId(0);

    /// Returns the raw arena index, mostly useful for error messages.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two kinds of node in the tree: an inner capital allocator, or a
/// priced leaf instrument.
pub enum NodeKind {
    /// A strategy: holds cash, has children, tracks an index price.
    Strategy(StrategyState),
    /// A security: a leaf holding a signed position in a priced
    /// instrument.
    Security(SecurityState),
}

impl NodeKind {
    /// True if this node is a strategy.
    #[must_use]
    pub fn is_strategy(&self) -> bool {
        matches!(self, NodeKind::Strategy(_))
    }

    /// True if this node is a security.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, NodeKind::Security(_))
    }

    pub(crate) fn as_strategy(&self) -> Option<&StrategyState> {
        match self {
            NodeKind::Strategy(s) => Some(s),
            NodeKind::Security(_) => None,
        }
    }

    pub(crate) fn as_strategy_mut(&mut self) -> Option<&mut StrategyState> {
        match self {
            NodeKind::Strategy(s) => Some(s),
            NodeKind::Security(_) => None,
        }
    }

    pub(crate) fn as_security(&self) -> Option<&SecurityState> {
        match self {
            NodeKind::Security(s) => Some(s),
            NodeKind::Strategy(_) => None,
        }
    }

    pub(crate) fn as_security_mut(&mut self) -> Option<&mut SecurityState> {
        match self {
            NodeKind::Security(s) => Some(s),
            NodeKind::Strategy(_) => None,
        }
    }
}

/// A single slot in the tree's arena: one node's identity plus the
/// fields shared by both strategies and securities.
pub struct NodeSlot {
    pub(crate) name: String,
    pub(crate) parent: NodeId,
    /// Current price (strategy: index price initialized to 100;
    /// security: market price).
    pub(crate) price: f64,
    /// Current total value (strategy: capital + children's value;
    /// security: `position * price * multiplier`).
    pub(crate) value: f64,
    /// Fraction of the parent's value this node represents.
    pub(crate) weight: f64,
    pub(crate) kind: NodeKind,
}

impl NodeSlot {
    pub(crate) fn new(name: impl Into<String>, parent: NodeId, kind: NodeKind) -> Self {
        let price = match &kind {
            NodeKind::Strategy(_) => 100.0,
            NodeKind::Security(_) => f64::NAN,
        };
        Self {
            name: name.into(),
            parent,
            price,
            value: 0.0,
            weight: 0.0,
            kind,
        }
    }
}

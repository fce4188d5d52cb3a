//! Error types for the tree's update protocol and capital accounting.

use thiserror::Error;

/// A specialized Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors raised while updating or mutating the simulation tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    /// Root strategy value dropped below zero after a tick update.
    ///
    /// Fatal: the tree's accounting has become inconsistent and the run
    /// must be aborted (spec §7, "NegativeRootValue").
    #[error("root value went negative on {date}: {value}")]
    NegativeRootValue {
        /// The date (display string) of the offending update.
        date: String,
        /// The negative value observed.
        value: f64,
    },

    /// The tick-return denominator (`last_value + net_flows`) was zero
    /// while the numerator was nonzero (spec §7, "DivisionByZeroInReturn").
    #[error(
        "division by zero computing return for '{node}': last_value={last_value}, net_flows={net_flows}, value={value}"
    )]
    DivisionByZeroInReturn {
        /// Full dotted name of the node.
        node: String,
        /// The node's `last_value` going into the tick.
        last_value: f64,
        /// The node's `net_flows` for the tick.
        net_flows: f64,
        /// The node's newly computed `value`.
        value: f64,
    },

    /// Attempted to allocate to a security whose price is zero or NaN
    /// (spec §7, "InvalidPrice").
    #[error("invalid price for security '{node}': {price}")]
    InvalidPrice {
        /// Full dotted name of the security.
        node: String,
        /// The offending price.
        price: f64,
    },

    /// Attempted to allocate to a security with no parent, or whose
    /// parent is itself (spec §7, "OrphanedSecurity").
    #[error("security '{node}' has no parent to adjust")]
    OrphanedSecurity {
        /// Full dotted name of the security.
        node: String,
    },

    /// `setup` was called a second time on a node that has already been
    /// set up.
    #[error("node '{node}' has already been set up")]
    AlreadySetUp {
        /// Full dotted name of the node.
        node: String,
    },

    /// Attempted to trade or select a symbol outside a strategy's
    /// `universe_tickers` whitelist (spec §4.2 `setup`, §6 `target.universe`).
    #[error("'{symbol}' is not in the restricted universe of strategy '{node}'")]
    NotInUniverse {
        /// Full dotted name of the strategy the trade was routed through.
        node: String,
        /// The symbol that fell outside the whitelist.
        symbol: String,
    },

    /// A `NodeId` was used that does not belong to this tree (e.g. one
    /// captured before a `clone_subtree`, or from a different tree
    /// entirely).
    #[error("node id {id} does not exist in this tree")]
    UnknownNode {
        /// The raw arena index that was not found.
        id: u32,
    },

    /// The node addressed by a tree operation is not the kind the
    /// operation requires (e.g. calling a strategy-only method on a
    /// security).
    #[error("node '{node}' is not a {expected}")]
    WrongNodeKind {
        /// Full dotted name of the node.
        node: String,
        /// The kind the caller expected ("strategy" or "security").
        expected: &'static str,
    },

    /// Wraps an underlying `bt-core` error (invalid date, malformed
    /// universe) encountered while operating on the tree.
    #[error(transparent)]
    Core(#[from] bt_core::EngineError),
}

impl TreeError {
    /// Creates a negative root value error.
    #[must_use]
    pub fn negative_root_value(date: impl std::fmt::Display, value: f64) -> Self {
        Self::NegativeRootValue {
            date: date.to_string(),
            value,
        }
    }

    /// Creates an orphaned security error.
    #[must_use]
    pub fn orphaned_security(node: impl Into<String>) -> Self {
        Self::OrphanedSecurity { node: node.into() }
    }

    /// Creates an invalid price error.
    #[must_use]
    pub fn invalid_price(node: impl Into<String>, price: f64) -> Self {
        Self::InvalidPrice {
            node: node.into(),
            price,
        }
    }

    /// Creates a not-in-universe error.
    #[must_use]
    pub fn not_in_universe(node: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::NotInUniverse {
            node: node.into(),
            symbol: symbol.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TreeError::negative_root_value("2025-01-01", -5.0);
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_core_error_wrapped() {
        let core_err = bt_core::EngineError::malformed_universe("bad");
        let err: TreeError = core_err.into();
        assert!(matches!(err, TreeError::Core(_)));
    }
}

//! # bt-core
//!
//! Foundational types for the tree-structured portfolio simulation
//! engine in `bt-engine`.
//!
//! This crate provides the pieces that are not themselves about the
//! tree's update protocol:
//!
//! - [`Date`]: a newtype around `chrono::NaiveDate` usable as an
//!   ordered, hashable row key.
//! - [`Universe`]: the date x symbol price panel supplied by the
//!   driver, with the sharing discipline needed for sub-strategy price
//!   injection.
//! - [`TimeSeries`]: a dense, date-indexed per-node historical buffer.
//! - [`EngineError`] / [`EngineResult`]: structured errors shared by
//!   every fallible operation in `bt-engine`.
//!
//! ## Design Philosophy
//!
//! - **One shared panel**: `Universe` is the single piece of mutable
//!   state nodes write into; everything else is append-only buffers
//!   sized once at setup.
//! - **Explicit over implicit**: fallible construction returns
//!   `Result`, never panics, at this crate's public boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod date;
mod error;
mod timeseries;
mod universe;

pub use date::Date;
pub use error::{EngineError, EngineResult};
pub use timeseries::TimeSeries;
pub use universe::{Universe, UniverseView};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Date, EngineError, EngineResult, TimeSeries, Universe, UniverseView};
}

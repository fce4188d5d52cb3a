//! The price panel (dates x symbols) supplied by the driver.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::date::Date;
use crate::error::{EngineError, EngineResult};

/// A two-dimensional price panel: rows are ordered, strictly increasing
/// dates, columns are symbol names.
///
/// `NaN` in a cell means "price not available on this date" (spec §6).
///
/// `Tree` owns exactly one `Universe`. Strategy nodes never hold their
/// own copy: when a sub-strategy's synthesized price needs to be made
/// visible to the rest of the tree, a new column is appended in place
/// on this same instance (see [`Universe::set_or_insert`]), rather than
/// writing into a per-node clone. This is what the design notes mean by
/// sharing storage rather than copying it.
#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    dates: Vec<Date>,
    index_of: HashMap<Date, usize>,
    columns: IndexMap<String, Vec<f64>>,
}

impl Universe {
    /// Builds a new universe from an explicit date axis and column map.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MalformedUniverse` if the dates are not
    /// strictly increasing, or if any column's length does not match
    /// the number of dates.
    pub fn new(dates: Vec<Date>, columns: IndexMap<String, Vec<f64>>) -> EngineResult<Self> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::malformed_universe(
                "dates must be strictly increasing",
            ));
        }
        for (name, col) in &columns {
            if col.len() != dates.len() {
                return Err(EngineError::malformed_universe(format!(
                    "column '{name}' has {} rows, expected {}",
                    col.len(),
                    dates.len()
                )));
            }
        }

        let index_of = dates.iter().copied().enumerate().map(|(i, d)| (d, i)).collect();

        Ok(Self {
            dates,
            index_of,
            columns,
        })
    }

    /// Returns an empty universe with no dates and no columns. Useful
    /// as a placeholder before the real panel is known.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            index_of: HashMap::new(),
            columns: IndexMap::new(),
        }
    }

    /// The ordered date axis.
    #[must_use]
    pub fn dates(&self) -> &[Date] {
        &self.dates
    }

    /// Number of rows (dates) in the panel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// True if the panel has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Row index for a given date, if present.
    #[must_use]
    pub fn row_of(&self, date: Date) -> Option<usize> {
        self.index_of.get(&date).copied()
    }

    /// True if a column with this symbol name exists.
    #[must_use]
    pub fn has_column(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    /// Reads the price of `symbol` on `date`, if both exist.
    ///
    /// Returns `None` if the date or the column is unknown; returns
    /// `Some(f64::NAN)` if the cell itself is `NaN` (available column,
    /// unavailable price).
    #[must_use]
    pub fn get(&self, date: Date, symbol: &str) -> Option<f64> {
        let row = self.row_of(date)?;
        self.columns.get(symbol).map(|col| col[row])
    }

    /// Writes a value into an existing column at `date`, or creates the
    /// column (initialized to `NaN` everywhere else) if it did not
    /// already exist.
    ///
    /// This is how sub-strategy prices get injected into the shared
    /// panel during `update` (spec §4.1 step 7).
    pub fn set_or_insert(&mut self, date: Date, symbol: &str, value: f64) -> EngineResult<()> {
        let row = self
            .row_of(date)
            .ok_or_else(|| EngineError::malformed_universe(format!("unknown date {date}")))?;

        if let Some(col) = self.columns.get_mut(symbol) {
            col[row] = value;
        } else {
            let mut col = vec![f64::NAN; self.dates.len()];
            col[row] = value;
            self.columns.insert(symbol.to_string(), col);
        }
        Ok(())
    }

    /// Ensures a (possibly all-`NaN`) column exists for `symbol`,
    /// without writing any particular value. Used at `setup` time to
    /// pre-register sub-strategy columns before the first tick.
    pub fn ensure_column(&mut self, symbol: &str) {
        if !self.columns.contains_key(symbol) {
            self.columns.insert(symbol.to_string(), vec![f64::NAN; self.dates.len()]);
        }
    }

    /// Column names in insertion order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Builds a read-only view of this panel truncated to rows up to and
    /// including `date` (spec §6: an algo may read `target.universe`, "a
    /// date-sliced view up to and including `now`" — a strategy must
    /// never see its own future prices while deciding a trade).
    ///
    /// If `date` is not a row in this panel, the view is truncated to
    /// the last row strictly before it (or is empty if there is none).
    #[must_use]
    pub fn view_up_to(&self, date: Date) -> UniverseView<'_> {
        let visible_rows = match self.row_of(date) {
            Some(row) => row + 1,
            None => self.dates.partition_point(|&d| d <= date),
        };
        self.view_up_to_row(visible_rows)
    }

    /// Builds a view exposing exactly the first `rows` rows of this
    /// panel, clamped to the panel's actual length. `rows == 0` yields
    /// an entirely empty view (used before a node's first tick, when
    /// there is no "current date" to slice by yet).
    #[must_use]
    pub fn view_up_to_row(&self, rows: usize) -> UniverseView<'_> {
        UniverseView {
            universe: self,
            visible_rows: rows.min(self.dates.len()),
            tickers: None,
        }
    }
}

/// A read-only, date-truncated view over a [`Universe`]: every accessor
/// behaves as if rows beyond the view's cutoff date do not exist yet.
///
/// Optionally also symbol-truncated: when [`UniverseView::restrict`] has
/// set a whitelist, every accessor additionally behaves as if columns
/// outside it do not exist (spec §4.2 `setup`: a strategy with
/// `universe_tickers` set operates only over the intersection of that
/// whitelist and the panel's columns).
#[derive(Debug, Clone, Copy)]
pub struct UniverseView<'a> {
    universe: &'a Universe,
    visible_rows: usize,
    tickers: Option<&'a HashSet<String>>,
}

impl<'a> UniverseView<'a> {
    /// Restricts this view to only the given symbols, in addition to its
    /// existing date cutoff. Passing `None` clears any prior
    /// restriction. Used by a strategy's `universe_tickers` whitelist.
    #[must_use]
    pub fn restrict(mut self, tickers: Option<&'a HashSet<String>>) -> Self {
        self.tickers = tickers;
        self
    }

    fn is_visible(&self, symbol: &str) -> bool {
        self.tickers.map_or(true, |allowed| allowed.contains(symbol))
    }

    /// The visible (truncated) date axis, oldest first.
    #[must_use]
    pub fn dates(&self) -> &'a [Date] {
        &self.universe.dates[..self.visible_rows]
    }

    /// Number of visible rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible_rows
    }

    /// True if no rows are visible yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible_rows == 0
    }

    /// True if a column with this symbol name exists and is not excluded
    /// by the whitelist (columns are visible in full, independent of the
    /// date cutoff).
    #[must_use]
    pub fn has_column(&self, symbol: &str) -> bool {
        self.is_visible(symbol) && self.universe.has_column(symbol)
    }

    /// Reads the price of `symbol` on `date`, if that date falls within
    /// the visible window, `symbol` is not excluded by the whitelist, and
    /// both the date and column exist.
    #[must_use]
    pub fn get(&self, date: Date, symbol: &str) -> Option<f64> {
        if !self.is_visible(symbol) {
            return None;
        }
        let row = self.universe.row_of(date)?;
        if row >= self.visible_rows {
            return None;
        }
        self.universe.columns.get(symbol).map(|col| col[row])
    }

    /// Column names in insertion order, excluding any outside the
    /// whitelist.
    pub fn symbols(&self) -> impl Iterator<Item = &'a str> + 'a {
        let tickers = self.tickers;
        self.universe
            .symbols()
            .filter(move |s| tickers.map_or(true, |allowed| allowed.contains(*s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: i64) -> Vec<Date> {
        let d0 = Date::from_ymd(2025, 1, 1).unwrap();
        (0..n).map(|i| d0.add_days(i)).collect()
    }

    #[test]
    fn test_construction_validates_dates() {
        let d = Date::from_ymd(2025, 1, 1).unwrap();
        let bad = vec![d, d];
        assert!(Universe::new(bad, IndexMap::new()).is_err());
    }

    #[test]
    fn test_construction_validates_column_length() {
        let ds = dates(3);
        let mut cols = IndexMap::new();
        cols.insert("A".to_string(), vec![1.0, 2.0]);
        assert!(Universe::new(ds, cols).is_err());
    }

    #[test]
    fn test_get_and_set() {
        let ds = dates(3);
        let mut cols = IndexMap::new();
        cols.insert("A".to_string(), vec![100.0, 101.0, f64::NAN]);
        let mut u = Universe::new(ds.clone(), cols).unwrap();

        assert_eq!(u.get(ds[0], "A"), Some(100.0));
        assert!(u.get(ds[2], "A").unwrap().is_nan());
        assert_eq!(u.get(ds[0], "B"), None);

        u.set_or_insert(ds[1], "B", 42.0).unwrap();
        assert_eq!(u.get(ds[1], "B"), Some(42.0));
        assert!(u.get(ds[0], "B").unwrap().is_nan());
    }

    #[test]
    fn test_ensure_column_idempotent() {
        let ds = dates(2);
        let mut u = Universe::new(ds, IndexMap::new()).unwrap();
        u.ensure_column("S");
        u.set_or_insert(u.dates()[0], "S", 5.0).unwrap();
        u.ensure_column("S");
        assert_eq!(u.get(u.dates()[0], "S"), Some(5.0));
    }

    #[test]
    fn test_symbols_insertion_order() {
        let ds = dates(1);
        let mut u = Universe::new(ds, IndexMap::new()).unwrap();
        u.ensure_column("Z");
        u.ensure_column("A");
        assert_eq!(u.symbols().collect::<Vec<_>>(), vec!["Z", "A"]);
    }

    #[test]
    fn test_view_up_to_hides_future_rows() {
        let ds = dates(4);
        let mut cols = IndexMap::new();
        cols.insert("A".to_string(), vec![100.0, 101.0, 102.0, 103.0]);
        let u = Universe::new(ds.clone(), cols).unwrap();

        let view = u.view_up_to(ds[1]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.dates(), &ds[..2]);
        assert_eq!(view.get(ds[1], "A"), Some(101.0));
        assert_eq!(view.get(ds[2], "A"), None, "future row must not be visible");
    }

    #[test]
    fn test_view_up_to_date_not_in_panel_truncates_to_prior_row() {
        let ds = dates(4);
        let u = Universe::new(ds.clone(), IndexMap::new()).unwrap();
        let view = u.view_up_to(ds[2].add_days(1).add_days(10));
        assert_eq!(view.len(), 4);

        let before_start = ds[0].add_days(-5);
        let empty_view = u.view_up_to(before_start);
        assert!(empty_view.is_empty());
    }

    #[test]
    fn test_restrict_hides_non_whitelisted_columns() {
        let ds = dates(2);
        let mut cols = IndexMap::new();
        cols.insert("AAPL".to_string(), vec![100.0, 101.0]);
        cols.insert("MSFT".to_string(), vec![200.0, 201.0]);
        let u = Universe::new(ds.clone(), cols).unwrap();

        let mut allowed = HashSet::new();
        allowed.insert("AAPL".to_string());
        let view = u.view_up_to(ds[1]).restrict(Some(&allowed));

        assert!(view.has_column("AAPL"));
        assert!(!view.has_column("MSFT"));
        assert_eq!(view.get(ds[0], "AAPL"), Some(100.0));
        assert_eq!(view.get(ds[0], "MSFT"), None);
        assert_eq!(view.symbols().collect::<Vec<_>>(), vec!["AAPL"]);
    }

    #[test]
    fn test_restrict_none_keeps_every_column_visible() {
        let ds = dates(1);
        let mut cols = IndexMap::new();
        cols.insert("AAPL".to_string(), vec![100.0]);
        let u = Universe::new(ds, cols).unwrap();

        let view = u.view_up_to_row(1).restrict(None);
        assert!(view.has_column("AAPL"));
    }
}

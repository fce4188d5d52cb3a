//! End-to-end scenarios driving a whole [`Tree`] through several ticks,
//! the way a backtest driver would.

use std::collections::HashSet;

use bt_core::Universe;
use bt_engine::{EngineConfig, Tree, TreeError};

fn dates(n: i64) -> Vec<bt_core::Date> {
    let d0 = bt_core::Date::from_ymd(2025, 1, 1).unwrap();
    (0..n).map(|i| d0.add_days(i)).collect()
}

fn universe_with(columns: &[(&str, Vec<f64>)], len: usize) -> Universe {
    let ds = dates(len as i64);
    let mut cols = indexmap::IndexMap::new();
    for (name, prices) in columns {
        cols.insert((*name).to_string(), prices.clone());
    }
    Universe::new(ds, cols).unwrap()
}

#[test]
fn single_security_buy_then_sell_returns_to_flat() {
    let u = universe_with(&[("AAPL", vec![100.0, 105.0, 110.0, 108.0])], 4);
    let mut tree = Tree::new("root", u);
    let root = tree.root();
    tree.add_security(root, "AAPL").unwrap();
    tree.setup().unwrap();

    let ds = dates(4);
    tree.adjust(root, 100_000.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    tree.allocate(root, 50_000.0, Some("AAPL"), true).unwrap();
    tree.update(ds[0]).unwrap();

    let aapl = *tree.children(root).unwrap().get("AAPL").unwrap();
    assert!(tree.position(aapl).unwrap() > 0.0);

    tree.update(ds[1]).unwrap();
    tree.update(ds[2]).unwrap();

    tree.close(root, "AAPL").unwrap();
    tree.update(ds[3]).unwrap();

    assert_eq!(tree.position(aapl).unwrap(), 0.0);
}

#[test]
fn default_commission_is_charged_on_a_trade() {
    let u = universe_with(&[("AAPL", vec![100.0, 101.0])], 2);
    let mut tree = Tree::new("root", u);
    let root = tree.root();
    tree.add_security(root, "AAPL").unwrap();
    tree.setup().unwrap();

    let ds = dates(2);
    tree.adjust(root, 100_000.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    let capital_before = tree.capital(root).unwrap();
    tree.allocate(root, 10_000.0, Some("AAPL"), true).unwrap();
    tree.update(ds[0]).unwrap();
    let capital_after = tree.capital(root).unwrap();

    // 100 shares bought at $100: commission = max(1, 0.01*100) = $1,
    // so capital drops by more than the $10,000 outlay alone.
    assert!(capital_before - capital_after > 10_000.0);
}

#[test]
fn short_position_has_negative_quantity() {
    let u = universe_with(&[("AAPL", vec![100.0, 102.0])], 2);
    let mut tree = Tree::new("root", u);
    let root = tree.root();
    tree.add_security(root, "AAPL").unwrap();
    tree.setup().unwrap();

    let ds = dates(2);
    tree.adjust(root, 100_000.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    tree.allocate(root, -10_000.0, Some("AAPL"), true).unwrap();
    tree.update(ds[0]).unwrap();

    let aapl = *tree.children(root).unwrap().get("AAPL").unwrap();
    assert!(tree.position(aapl).unwrap() < 0.0);
}

#[test]
fn full_close_cancels_position_exactly_despite_rounding() {
    let u = universe_with(&[("AAPL", vec![100.0, 103.3])], 2);
    let mut tree = Tree::new("root", u);
    let root = tree.root();
    tree.add_security(root, "AAPL").unwrap();
    tree.setup().unwrap();

    let ds = dates(2);
    tree.adjust(root, 33_333.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    tree.allocate(root, 33_333.0, Some("AAPL"), true).unwrap();
    tree.update(ds[0]).unwrap();

    let aapl = *tree.children(root).unwrap().get("AAPL").unwrap();
    assert_ne!(tree.position(aapl).unwrap(), 0.0);

    tree.update(ds[1]).unwrap();
    tree.close(root, "AAPL").unwrap();
    tree.update(ds[1]).unwrap();

    assert_eq!(tree.position(aapl).unwrap(), 0.0);
}

#[test]
fn nested_strategy_gets_its_own_paper_traded_index() {
    let u = universe_with(&[("AAPL", vec![100.0, 110.0, 121.0])], 3);
    let mut tree = Tree::new("root", u).with_config(EngineConfig::new().with_paper_seed_capital(1_000_000.0));
    let root = tree.root();
    let bucket = tree.add_strategy(root, "bucket").unwrap();
    tree.add_security(bucket, "AAPL").unwrap();
    tree.setup().unwrap();

    let ds = dates(3);
    tree.adjust(root, 100_000.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    tree.allocate(root, 100_000.0, Some("bucket"), true).unwrap();
    tree.update(ds[0]).unwrap();

    tree.allocate(bucket, 100_000.0, Some("AAPL"), true).unwrap();
    tree.update(ds[0]).unwrap();
    tree.update(ds[1]).unwrap();
    tree.update(ds[2]).unwrap();

    let aapl = *tree.children(bucket).unwrap().get("AAPL").unwrap();
    assert!(tree.position(aapl).unwrap() > 0.0);
    // AAPL rallied from 100 to 121 while bucket held a full position,
    // so bucket's own value should have grown past what it started with.
    assert!(tree.value(bucket).unwrap() > 100_000.0);
}

#[test]
fn stale_value_is_not_recomputed_until_a_reading_forces_it() {
    let mut tree = Tree::new_single_strategy("root", Universe::empty()).unwrap();
    let root = tree.root();
    tree.adjust(root, 500.0, true, 0.0).unwrap();

    // Before any update, the root's own tick has not run; reading
    // `value` forces exactly the refresh that `adjust` deferred.
    assert_eq!(tree.value(root).unwrap(), 0.0);
}

#[test]
fn universe_tickers_restriction_hides_and_rejects_non_whitelisted_symbols() {
    // universe_tickers restricts both what an algo can see through
    // `universe_view` and what `allocate`/`rebalance` can implicitly
    // materialize: a strategy whitelisted to AAPL can neither observe
    // nor trade MSFT, even though MSFT is a column in the panel.
    let u = universe_with(&[("AAPL", vec![100.0, 101.0]), ("MSFT", vec![200.0, 201.0])], 2);
    let mut tree = Tree::new("root", u);
    let root = tree.root();
    tree.add_security(root, "AAPL").unwrap();

    let mut allowed = HashSet::new();
    allowed.insert("AAPL".to_string());
    tree.set_universe_tickers(root, allowed).unwrap();

    tree.setup().unwrap();

    let ds = dates(2);
    tree.adjust(root, 10_000.0, true, 0.0).unwrap();
    tree.update(ds[0]).unwrap();

    let view = tree.universe_view(root).unwrap();
    assert!(view.has_column("AAPL"));
    assert!(!view.has_column("MSFT"));
    assert_eq!(view.symbols().collect::<Vec<_>>(), vec!["AAPL"]);

    let err = tree.allocate(root, 5_000.0, Some("MSFT"), true).unwrap_err();
    assert!(matches!(err, TreeError::NotInUniverse { .. }));
    assert!(tree.children(root).unwrap().get("MSFT").is_none());
}

#[test]
fn negative_root_value_aborts_the_run() {
    let mut tree = Tree::new_single_strategy("root", Universe::empty()).unwrap();
    let root = tree.root();
    tree.adjust(root, -1.0, true, 0.0).unwrap();
    let err = tree.update(bt_core::Date::from_ymd(2025, 1, 1).unwrap()).unwrap_err();
    assert!(matches!(err, TreeError::NegativeRootValue { .. }));
}

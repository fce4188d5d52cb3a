//! Commission (fee) contract between a security and its parent strategy.

use std::rc::Rc;

/// A commission function: `(unsigned quantity, price per unit including
/// multiplier) -> fee`.
///
/// Per spec §6/§9: the commission convention is that the caller passes
/// an *unsigned* quantity — commissions are always positive outflows,
/// and a user-supplied function that wants to key off trade direction
/// must document its own sign convention separately, since the contract
/// itself only guarantees `|q|`.
pub type CommissionFn = Rc<dyn Fn(f64, f64) -> f64>;

/// The default commission: `max(1.0, 0.01 * |quantity|)`.
#[must_use]
pub fn default_commission(quantity: f64, _price: f64) -> f64 {
    f64::max(1.0, 0.01 * quantity.abs())
}

/// Wraps [`default_commission`] as a `CommissionFn`.
#[must_use]
pub fn default_commission_fn() -> CommissionFn {
    Rc::new(default_commission)
}

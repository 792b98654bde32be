//! Risk - capital-bounded position sizing
//!
//! Implements:
//! - Risk-fraction position sizing off the entry/stop distance
//! - Degenerate-risk clamping (tiny price deltas cannot produce unbounded size)
//! - Position-value and capital-buffer caps
//! - Minimum tradable size floor
//! - Drawdown gate for new entries
//!
//! Sizing is a pure function of its inputs and has no side effects; callers
//! own logging and reporting. A returned size of exactly 0.0 means
//! "no trade" and is never an error.

use crate::config::RiskConfig;

/// True when the entry/stop distance is too small to size against and will
/// be clamped to `default_risk_pct` of the entry price. Callers use this to
/// log the numeric-degeneracy warning.
pub fn is_degenerate_risk(entry_price: f64, stop_price: f64, cfg: &RiskConfig) -> bool {
    (entry_price - stop_price).abs() <= entry_price * cfg.min_risk_pct
}

/// Compute a bounded position size in units (fractional allowed).
///
/// Ordered steps, each only able to shrink the previous result:
/// 1. risk per unit from the entry/stop distance, clamped when degenerate
/// 2. raw size = capital x risk_fraction / risk per unit
/// 3. cap by maximum position value as a fraction of capital
/// 4. cap by available capital with a safety buffer
/// 5. floor: below the minimum tradable size the answer is 0 ("no trade")
pub fn position_size(
    entry_price: f64,
    stop_price: f64,
    available_capital: f64,
    cfg: &RiskConfig,
) -> f64 {
    if entry_price <= 0.0 || available_capital <= 0.0 {
        return 0.0;
    }

    let mut risk_per_unit = (entry_price - stop_price).abs();
    if risk_per_unit <= entry_price * cfg.min_risk_pct {
        risk_per_unit = entry_price * cfg.default_risk_pct;
    }

    let mut size = (available_capital * cfg.risk_fraction) / risk_per_unit;

    let max_value = available_capital * cfg.max_position_fraction;
    if size * entry_price > max_value {
        size = max_value / entry_price;
    }

    let deployable = available_capital * cfg.capital_buffer;
    if size * entry_price > deployable {
        size = deployable / entry_price;
    }

    if size < cfg.min_size {
        return 0.0;
    }
    size
}

/// Entry gate: new positions are blocked while the run's drawdown exceeds
/// the configured maximum. Exits on existing positions are never blocked.
pub fn can_open(current_drawdown: f64, cfg: &RiskConfig) -> bool {
    current_drawdown < cfg.max_drawdown_pct
}

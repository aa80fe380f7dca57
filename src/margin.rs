//! Margin requirements and ratios.
//!
//! Required margin is notional divided by leverage. The margin ratio of an
//! open position is (margin + unrealized PnL) / current notional; the risk
//! monitor liquidates when it reaches zero and the validation pipeline refuses
//! margin withdrawals that would leave a position instantly liquidatable.

use crate::types::{Leverage, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginParams {
    pub max_leverage: Leverage,
    // fraction of a position's margin preserved at the liquidation price
    pub maintenance_margin_ratio: Decimal,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            max_leverage: Leverage::new(dec!(100)).unwrap(),
            maintenance_margin_ratio: dec!(0.05),
        }
    }
}

pub fn required_margin(notional: Quote, leverage: Leverage) -> Quote {
    Quote::new(notional.value() * leverage.margin_fraction())
}

pub fn margin_ratio(margin: Quote, unrealized_pnl: Quote, notional: Quote) -> Decimal {
    if notional.value().is_zero() {
        return Decimal::MAX;
    }
    (margin.value() + unrealized_pnl.value()) / notional.value()
}

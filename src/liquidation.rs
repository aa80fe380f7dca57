//! Liquidation price and risk trigger evaluation.
//!
//! A position is liquidated when the price crosses its liquidation price or
//! its equity is exhausted. The liquidation price keeps a maintenance buffer:
//! the loss at that price equals margin * (1 - maintenance ratio), so higher
//! leverage pulls it closer to the entry.

use crate::position::FuturesPosition;
use crate::types::{Leverage, Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Price at which the position's loss consumes its margin net of the
/// maintenance buffer.
///
/// long:  entry * (1 - (1 - mmr) / leverage)
/// short: entry * (1 + (1 - mmr) / leverage)
pub fn liquidation_price(
    side: Side,
    entry_price: Price,
    leverage: Leverage,
    maintenance_margin_ratio: Decimal,
) -> Price {
    let distance = (Decimal::ONE - maintenance_margin_ratio) / leverage.value();

    let liq = match side {
        Side::Long => entry_price.value() * (Decimal::ONE - distance),
        Side::Short => entry_price.value() * (Decimal::ONE + distance),
    };

    Price::new_unchecked(liq.max(dec!(0.0001)))
}

// 6.1: why the monitor closed a position. checked in this priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTrigger {
    Liquidation { at: Price },
    StopLoss { at: Price },
    TakeProfit { at: Price },
}

impl RiskTrigger {
    pub fn describe(&self) -> &'static str {
        match self {
            RiskTrigger::Liquidation { .. } => "liquidation",
            RiskTrigger::StopLoss { .. } => "stop-loss",
            RiskTrigger::TakeProfit { .. } => "take-profit",
        }
    }
}

/// Evaluate a single position against the current price. Returns the highest
/// priority trigger that fired, if any.
pub fn check_position(
    position: &FuturesPosition,
    current_price: Price,
    maintenance_margin_ratio: Decimal,
) -> Option<RiskTrigger> {
    let liq = liquidation_price(
        position.side,
        position.entry_price,
        position.leverage,
        maintenance_margin_ratio,
    );

    let liq_crossed = match position.side {
        Side::Long => current_price.value() <= liq.value(),
        Side::Short => current_price.value() >= liq.value(),
    };
    // equity backstop: margin fully consumed even if the computed liquidation
    // price was not crossed (possible after margin withdrawals)
    if liq_crossed || position.equity(current_price).value() <= Decimal::ZERO {
        return Some(RiskTrigger::Liquidation { at: current_price });
    }

    if let Some(stop) = position.stop_loss {
        let crossed = match position.side {
            Side::Long => current_price.value() <= stop.value(),
            Side::Short => current_price.value() >= stop.value(),
        };
        if crossed {
            return Some(RiskTrigger::StopLoss { at: stop });
        }
    }

    if let Some(target) = position.take_profit {
        let crossed = match position.side {
            Side::Long => current_price.value() >= target.value(),
            Side::Short => current_price.value() <= target.value(),
        };
        if crossed {
            return Some(RiskTrigger::TakeProfit { at: target });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, Quote, Timestamp};
    use rust_decimal_macros::dec;

    fn position(side: Side, leverage: Decimal) -> FuturesPosition {
        FuturesPosition::open(
            AssetId::new("bitcoin"),
            side,
            Price::new_unchecked(dec!(100)),
            Quote::new(dec!(100)),
            Leverage::new(leverage).unwrap(),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn liquidation_price_long_below_entry() {
        let liq = liquidation_price(
            Side::Long,
            Price::new_unchecked(dec!(100)),
            Leverage::new(dec!(10)).unwrap(),
            dec!(0.05),
        );
        // 100 * (1 - 0.95/10) = 90.5
        assert_eq!(liq.value(), dec!(90.5));
    }

    #[test]
    fn liquidation_price_short_above_entry() {
        let liq = liquidation_price(
            Side::Short,
            Price::new_unchecked(dec!(100)),
            Leverage::new(dec!(10)).unwrap(),
            dec!(0.05),
        );
        assert_eq!(liq.value(), dec!(109.5));
    }

    #[test]
    fn higher_leverage_moves_liquidation_closer() {
        let entry = Price::new_unchecked(dec!(100));
        let at_5x = liquidation_price(Side::Long, entry, Leverage::new(dec!(5)).unwrap(), dec!(0.05));
        let at_50x = liquidation_price(Side::Long, entry, Leverage::new(dec!(50)).unwrap(), dec!(0.05));
        assert!(at_50x.value() > at_5x.value());
        assert!(at_50x.value() < entry.value());
    }

    #[test]
    fn long_liquidates_on_crash() {
        let pos = position(Side::Long, dec!(10));
        let trigger = check_position(&pos, Price::new_unchecked(dec!(90)), dec!(0.05));
        assert!(matches!(trigger, Some(RiskTrigger::Liquidation { .. })));
    }

    #[test]
    fn short_liquidates_on_rally() {
        let pos = position(Side::Short, dec!(10));
        let trigger = check_position(&pos, Price::new_unchecked(dec!(111)), dec!(0.05));
        assert!(matches!(trigger, Some(RiskTrigger::Liquidation { .. })));
    }

    #[test]
    fn safe_position_has_no_trigger() {
        let pos = position(Side::Long, dec!(2));
        assert_eq!(check_position(&pos, Price::new_unchecked(dec!(99)), dec!(0.05)), None);
    }

    #[test]
    fn stop_loss_fires_at_its_price() {
        let mut pos = position(Side::Long, dec!(2));
        pos.stop_loss = Some(Price::new_unchecked(dec!(95)));

        assert_eq!(check_position(&pos, Price::new_unchecked(dec!(96)), dec!(0.05)), None);
        assert_eq!(
            check_position(&pos, Price::new_unchecked(dec!(94)), dec!(0.05)),
            Some(RiskTrigger::StopLoss { at: Price::new_unchecked(dec!(95)) })
        );
    }

    #[test]
    fn take_profit_fires_for_short_on_drop() {
        let mut pos = position(Side::Short, dec!(2));
        pos.take_profit = Some(Price::new_unchecked(dec!(80)));

        assert_eq!(
            check_position(&pos, Price::new_unchecked(dec!(79)), dec!(0.05)),
            Some(RiskTrigger::TakeProfit { at: Price::new_unchecked(dec!(80)) })
        );
    }

    #[test]
    fn liquidation_outranks_stop_loss() {
        let mut pos = position(Side::Long, dec!(10));
        pos.stop_loss = Some(Price::new_unchecked(dec!(92)));

        // 90 is through both the stop (92) and the liquidation price (90.5)
        let trigger = check_position(&pos, Price::new_unchecked(dec!(90)), dec!(0.05));
        assert!(matches!(trigger, Some(RiskTrigger::Liquidation { .. })));
    }
}

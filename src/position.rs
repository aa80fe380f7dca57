// 4.0: spot holdings and leveraged futures positions, plus the pnl math that
// prices them. pnl = quantity * (current - entry), signed by side. leverage
// never scales pnl; it only sizes the margin requirement and the liquidation
// distance.

use crate::types::{AssetId, Leverage, Price, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// 4.1: unleveraged ownership of an asset. cost basis tracks total quote spent
// so partial sells realize pnl proportionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotHolding {
    pub asset: AssetId,
    pub quantity: Decimal,
    pub cost_basis: Quote,
}

impl SpotHolding {
    pub fn new(asset: AssetId, quantity: Decimal, cost_basis: Quote) -> Self {
        Self {
            asset,
            quantity,
            cost_basis,
        }
    }

    pub fn market_value(&self, price: Price) -> Quote {
        Quote::new(self.quantity * price.value())
    }

    pub fn unrealized_pnl(&self, price: Price) -> Quote {
        spot_pnl(self.quantity, self.cost_basis, price)
    }

    // average acquisition price implied by the cost basis
    pub fn entry_price(&self) -> Option<Price> {
        if self.quantity.is_zero() {
            return None;
        }
        Price::new(self.cost_basis.value() / self.quantity)
    }
}

// 4.2: one leveraged directional position. at most one per asset; the engine
// rejects an open against the opposite side and merges an open on the same
// side. margin > 0 and leverage >= 1 hold for as long as the position exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesPosition {
    pub asset: AssetId,
    pub side: Side,
    pub entry_price: Price,
    pub quantity: Decimal,
    pub leverage: Leverage,
    pub margin: Quote,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl FuturesPosition {
    pub fn open(
        asset: AssetId,
        side: Side,
        entry_price: Price,
        margin: Quote,
        leverage: Leverage,
        timestamp: Timestamp,
    ) -> Self {
        let quantity = margin.value() * leverage.value() / entry_price.value();
        Self {
            asset,
            side,
            entry_price,
            quantity,
            leverage,
            margin,
            stop_loss: None,
            take_profit: None,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn notional(&self, price: Price) -> Quote {
        Quote::new(self.quantity * price.value())
    }

    pub fn entry_notional(&self) -> Quote {
        Quote::new(self.quantity * self.entry_price.value())
    }

    pub fn unrealized_pnl(&self, price: Price) -> Quote {
        futures_pnl(self.side, self.entry_price, price, self.quantity)
    }

    // 4.3: margin + pnl. this hitting zero is the liquidation backstop
    pub fn equity(&self, price: Price) -> Quote {
        self.margin.add(self.unrealized_pnl(price))
    }
}

// 4.4: the futures pnl formula. signed by side, scales with quantity only.
pub fn futures_pnl(side: Side, entry_price: Price, current_price: Price, quantity: Decimal) -> Quote {
    let delta = current_price.value() - entry_price.value();
    Quote::new(side.sign() * quantity * delta)
}

// unrealized spot value minus what was paid for it
pub fn spot_pnl(quantity: Decimal, cost_basis: Quote, current_price: Price) -> Quote {
    Quote::new(quantity * current_price.value() - cost_basis.value())
}

// 4.5: merge a same-side open into an existing position. entry price averages
// by quantity, margin sums, leverage becomes entry notional over total margin.
// stop-loss and take-profit carry over untouched.
pub fn merge_open(
    position: &FuturesPosition,
    added_margin: Quote,
    added_leverage: Leverage,
    fill_price: Price,
    timestamp: Timestamp,
) -> FuturesPosition {
    debug_assert!(added_margin.value() > Decimal::ZERO, "merge needs positive margin");

    let added_quantity = added_margin.value() * added_leverage.value() / fill_price.value();
    let total_quantity = position.quantity + added_quantity;

    let weighted_entry = (position.quantity * position.entry_price.value()
        + added_quantity * fill_price.value())
        / total_quantity;

    let total_margin = position.margin.add(added_margin);
    let entry_notional = total_quantity * weighted_entry;
    // each tranche has leverage >= 1, so the blend does too
    let leverage = Leverage::new(entry_notional / total_margin.value())
        .unwrap_or_else(|| Leverage::new(Decimal::ONE).unwrap());

    FuturesPosition {
        asset: position.asset.clone(),
        side: position.side,
        entry_price: Price::new_unchecked(weighted_entry),
        quantity: total_quantity,
        leverage,
        margin: total_margin,
        stop_loss: position.stop_loss,
        take_profit: position.take_profit,
        opened_at: position.opened_at,
        updated_at: timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> FuturesPosition {
        FuturesPosition::open(
            AssetId::new("bitcoin"),
            Side::Long,
            Price::new_unchecked(dec!(100)),
            Quote::new(dec!(50)),
            Leverage::new(dec!(2)).unwrap(),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn open_derives_quantity_from_margin_and_leverage() {
        let pos = long_position();
        // 50 margin * 2x / 100 = 1 unit
        assert_eq!(pos.quantity, dec!(1));
        assert_eq!(pos.entry_notional().value(), dec!(100));
    }

    #[test]
    fn futures_pnl_long_profit() {
        let pos = long_position();
        let pnl = pos.unrealized_pnl(Price::new_unchecked(dec!(110)));
        // 1 unit * +10. leverage plays no part.
        assert_eq!(pnl.value(), dec!(10));
    }

    #[test]
    fn futures_pnl_short_profit_when_price_drops() {
        let pnl = futures_pnl(
            Side::Short,
            Price::new_unchecked(dec!(100)),
            Price::new_unchecked(dec!(90)),
            dec!(2),
        );
        assert_eq!(pnl.value(), dec!(20));
    }

    #[test]
    fn position_equity_includes_pnl() {
        let pos = long_position();
        let equity = pos.equity(Price::new_unchecked(dec!(90)));
        // 50 margin - 10 loss
        assert_eq!(equity.value(), dec!(40));
    }

    #[test]
    fn spot_pnl_against_cost_basis() {
        let pnl = spot_pnl(dec!(2), Quote::new(dec!(200)), Price::new_unchecked(dec!(120)));
        assert_eq!(pnl.value(), dec!(40));
    }

    #[test]
    fn merge_open_averages_entry() {
        let pos = long_position(); // 1 @ 100, 50 margin
        let merged = merge_open(
            &pos,
            Quote::new(dec!(60)),
            Leverage::new(dec!(2)).unwrap(),
            Price::new_unchecked(dec!(120)),
            Timestamp::from_millis(1000),
        );

        // added 60*2/120 = 1 unit @ 120 -> avg entry (100 + 120) / 2 = 110
        assert_eq!(merged.quantity, dec!(2));
        assert_eq!(merged.entry_price.value(), dec!(110));
        assert_eq!(merged.margin.value(), dec!(110));
        // entry notional 220 over margin 110 = 2x
        assert_eq!(merged.leverage.value(), dec!(2));
    }

    #[test]
    fn merge_open_keeps_protective_prices() {
        let mut pos = long_position();
        pos.stop_loss = Some(Price::new_unchecked(dec!(95)));

        let merged = merge_open(
            &pos,
            Quote::new(dec!(10)),
            Leverage::new(dec!(2)).unwrap(),
            Price::new_unchecked(dec!(100)),
            Timestamp::from_millis(1000),
        );
        assert_eq!(merged.stop_loss, Some(Price::new_unchecked(dec!(95))));
    }

    #[test]
    fn holding_entry_price() {
        let holding = SpotHolding::new(AssetId::new("eth"), dec!(4), Quote::new(dec!(8000)));
        assert_eq!(holding.entry_price().unwrap().value(), dec!(2000));
        assert_eq!(holding.market_value(Price::new_unchecked(dec!(2500))).value(), dec!(10000));
        assert_eq!(holding.unrealized_pnl(Price::new_unchecked(dec!(2500))).value(), dec!(2000));
    }
}

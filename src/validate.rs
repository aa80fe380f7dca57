// 8.0: the three-stage validation pipeline. every operation passes parameter,
// risk, and precondition checks against a snapshot of account state before the
// execution engine will touch it. the first failing stage short-circuits with
// a specific reason. nothing in here mutates anything.

use crate::account::{total_equity, Account};
use crate::config::SimConfig;
use crate::liquidation::liquidation_price;
use crate::market_data::PriceMap;
use crate::operation::Operation;
use crate::types::{AssetId, Leverage, Price, Quote, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStage {
    Parameter,
    Risk,
    Precondition,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage:?} validation failed: {reason}")]
pub struct Rejection {
    pub stage: ValidationStage,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("sell of {requested} {asset} exceeds held {held}")]
    InsufficientHolding {
        asset: AssetId,
        requested: Decimal,
        held: Decimal,
    },

    #[error("margin withdrawal {requested} not below position margin {margin}")]
    ReduceExceedsMargin { requested: Quote, margin: Quote },

    #[error("target leverage {requested} does not increase current {current}")]
    LeverageNotIncreased { current: Leverage, requested: Leverage },

    #[error("target leverage {requested} does not decrease current {current}")]
    LeverageNotDecreased { current: Leverage, requested: Leverage },

    #[error("stop-loss {price} on the wrong side of entry {entry} for a {side}")]
    StopLossOnWrongSide { side: Side, entry: Price, price: Price },

    #[error("take-profit {price} on the wrong side of entry {entry} for a {side}")]
    TakeProfitOnWrongSide { side: Side, entry: Price, price: Price },

    #[error("asset '{asset}' is not in the allowed universe")]
    AssetNotAllowed { asset: AssetId },

    #[error("no current price for '{asset}'")]
    PriceUnavailable { asset: AssetId },

    #[error("leverage {requested} above policy limit {max}")]
    LeverageAboveLimit { requested: Leverage, max: Leverage },

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: Quote, available: Quote },

    #[error("margin utilization {ratio} would exceed limit {max}")]
    MarginUtilizationExceeded { ratio: Decimal, max: Decimal },

    #[error("cash reserve {ratio} would fall below minimum {min}")]
    CashReserveBreached { ratio: Decimal, min: Decimal },

    #[error("margin {margin} would exceed position notional {notional}")]
    MarginExceedsNotional { margin: Quote, notional: Quote },

    #[error("withdrawal would leave position liquidatable at {liquidation_price}")]
    WouldBreachMaintenance { liquidation_price: Price },

    #[error("new leverage would liquidate immediately at {liquidation_price}")]
    WouldLiquidateImmediately { liquidation_price: Price },

    #[error("existing {existing} position on '{asset}' blocks the opposite side")]
    OppositeSideOpen { asset: AssetId, existing: Side },

    #[error("no open {side} position on '{asset}'")]
    NoSuchPosition { asset: AssetId, side: Side },

    #[error("no open position on '{asset}'")]
    NoPosition { asset: AssetId },
}

/// Run all three stages in order against a read-only snapshot.
pub fn validate(
    op: &Operation,
    account: &Account,
    prices: &PriceMap,
    config: &SimConfig,
) -> Result<(), Rejection> {
    parameter(op, account).map_err(|reason| Rejection {
        stage: ValidationStage::Parameter,
        reason,
    })?;
    risk(op, account, prices, config).map_err(|reason| Rejection {
        stage: ValidationStage::Risk,
        reason,
    })?;
    precondition(op, account).map_err(|reason| Rejection {
        stage: ValidationStage::Precondition,
        reason,
    })?;
    Ok(())
}

// 8.1: field-level sanity beyond parsing. checks that need the snapshot but
// not prices or policy. a missing position defers to the precondition stage.
fn parameter(op: &Operation, account: &Account) -> Result<(), RejectReason> {
    match op {
        Operation::SellSpot { asset, quantity } => {
            let held = account
                .holding(asset)
                .map(|h| h.quantity)
                .unwrap_or(Decimal::ZERO);
            if *quantity > held {
                return Err(RejectReason::InsufficientHolding {
                    asset: asset.clone(),
                    requested: *quantity,
                    held,
                });
            }
        }

        Operation::ReduceMargin { asset, amount } => {
            if let Some(pos) = account.position(asset) {
                if amount.value() >= pos.margin.value() {
                    return Err(RejectReason::ReduceExceedsMargin {
                        requested: *amount,
                        margin: pos.margin,
                    });
                }
            }
        }

        Operation::IncreaseLeverage { asset, target } => {
            if let Some(pos) = account.position(asset) {
                if target.value() <= pos.leverage.value() {
                    return Err(RejectReason::LeverageNotIncreased {
                        current: pos.leverage,
                        requested: *target,
                    });
                }
            }
        }

        Operation::DecreaseLeverage { asset, target } => {
            if let Some(pos) = account.position(asset) {
                if target.value() >= pos.leverage.value() {
                    return Err(RejectReason::LeverageNotDecreased {
                        current: pos.leverage,
                        requested: *target,
                    });
                }
            }
        }

        Operation::SetStopLoss { asset, price } => {
            if let Some(pos) = account.position(asset) {
                let wrong = match pos.side {
                    Side::Long => price.value() >= pos.entry_price.value(),
                    Side::Short => price.value() <= pos.entry_price.value(),
                };
                if wrong {
                    return Err(RejectReason::StopLossOnWrongSide {
                        side: pos.side,
                        entry: pos.entry_price,
                        price: *price,
                    });
                }
            }
        }

        Operation::SetTakeProfit { asset, price } => {
            if let Some(pos) = account.position(asset) {
                let wrong = match pos.side {
                    Side::Long => price.value() <= pos.entry_price.value(),
                    Side::Short => price.value() >= pos.entry_price.value(),
                };
                if wrong {
                    return Err(RejectReason::TakeProfitOnWrongSide {
                        side: pos.side,
                        entry: pos.entry_price,
                        price: *price,
                    });
                }
            }
        }

        _ => {}
    }
    Ok(())
}

// 8.2: position sizing and exposure checks against policy.
fn risk(
    op: &Operation,
    account: &Account,
    prices: &PriceMap,
    config: &SimConfig,
) -> Result<(), RejectReason> {
    let mmr = config.margin.maintenance_margin_ratio;

    match op {
        Operation::BuySpot { asset, quantity } => {
            allowed(asset, config)?;
            let price = price_for(asset, prices)?;
            let cost = Quote::new(*quantity * price.value());
            enough_cash(cost, account)?;
            cash_reserve_after(cost, account, prices, config)?;
        }

        Operation::SellSpot { asset, .. } => {
            price_for(asset, prices)?;
        }

        Operation::OpenLong { asset, margin, leverage }
        | Operation::OpenShort { asset, margin, leverage } => {
            allowed(asset, config)?;
            price_for(asset, prices)?;
            if leverage.value() > config.margin.max_leverage.value() {
                return Err(RejectReason::LeverageAboveLimit {
                    requested: *leverage,
                    max: config.margin.max_leverage,
                });
            }
            enough_cash(*margin, account)?;

            let equity = total_equity(account, prices);
            let utilization = account.margin_used().add(*margin).value() / equity.value();
            if utilization > config.risk.max_margin_utilization {
                return Err(RejectReason::MarginUtilizationExceeded {
                    ratio: utilization,
                    max: config.risk.max_margin_utilization,
                });
            }
            cash_reserve_after(*margin, account, prices, config)?;
        }

        Operation::CloseLong { asset, at } | Operation::CloseShort { asset, at } => {
            if at.is_none() {
                price_for(asset, prices)?;
            }
        }

        Operation::AddMargin { asset, amount } => {
            enough_cash(*amount, account)?;
            if let Some(pos) = account.position(asset) {
                let new_margin = pos.margin.add(*amount);
                if new_margin.value() > pos.entry_notional().value() {
                    return Err(RejectReason::MarginExceedsNotional {
                        margin: new_margin,
                        notional: pos.entry_notional(),
                    });
                }
            }
            cash_reserve_after(*amount, account, prices, config)?;
        }

        Operation::ReduceMargin { asset, amount } => {
            if let Some(pos) = account.position(asset) {
                let price = price_for(asset, prices)?;
                let new_margin = pos.margin.sub(*amount);
                // less margin means more leverage: hold it to the policy cap
                // and refuse a withdrawal that leaves the position liquidatable
                let new_leverage = pos.entry_notional().value() / new_margin.value();
                if new_leverage > config.margin.max_leverage.value() {
                    return Err(RejectReason::LeverageAboveLimit {
                        requested: Leverage::new(new_leverage)
                            .unwrap_or(config.margin.max_leverage),
                        max: config.margin.max_leverage,
                    });
                }
                if let Some(lev) = Leverage::new(new_leverage) {
                    let liq = liquidation_price(pos.side, pos.entry_price, lev, mmr);
                    let equity_after = new_margin.add(pos.unrealized_pnl(price));
                    if crossed(pos.side, liq, price) || equity_after.value() <= Decimal::ZERO {
                        return Err(RejectReason::WouldBreachMaintenance {
                            liquidation_price: liq,
                        });
                    }
                }
            }
        }

        Operation::IncreaseLeverage { asset, target } => {
            if target.value() > config.margin.max_leverage.value() {
                return Err(RejectReason::LeverageAboveLimit {
                    requested: *target,
                    max: config.margin.max_leverage,
                });
            }
            if let Some(pos) = account.position(asset) {
                let price = price_for(asset, prices)?;
                let liq = liquidation_price(pos.side, pos.entry_price, *target, mmr);
                if crossed(pos.side, liq, price) {
                    return Err(RejectReason::WouldLiquidateImmediately {
                        liquidation_price: liq,
                    });
                }
                // releasing margin normally; price drift can make it a top-up
                let new_margin = pos.notional(price).value() / target.value();
                let top_up = new_margin - pos.margin.value();
                if top_up > Decimal::ZERO {
                    enough_cash(Quote::new(top_up), account)?;
                }
            }
        }

        Operation::DecreaseLeverage { asset, target } => {
            if let Some(pos) = account.position(asset) {
                let price = price_for(asset, prices)?;
                let new_margin = pos.notional(price).value() / target.value();
                let top_up = new_margin - pos.margin.value();
                if top_up > Decimal::ZERO {
                    enough_cash(Quote::new(top_up), account)?;
                }
            }
        }

        Operation::SetStopLoss { .. } | Operation::SetTakeProfit { .. } | Operation::Hold => {}
    }
    Ok(())
}

// 8.3: existence checks. setting a duplicate stop-loss or take-profit is an
// overwrite, not an error, so those only require the position.
fn precondition(op: &Operation, account: &Account) -> Result<(), RejectReason> {
    match op {
        Operation::OpenLong { asset, .. } => opposite_free(asset, Side::Long, account),
        Operation::OpenShort { asset, .. } => opposite_free(asset, Side::Short, account),

        Operation::CloseLong { asset, .. } => position_on_side(asset, Side::Long, account),
        Operation::CloseShort { asset, .. } => position_on_side(asset, Side::Short, account),

        Operation::AddMargin { asset, .. }
        | Operation::ReduceMargin { asset, .. }
        | Operation::IncreaseLeverage { asset, .. }
        | Operation::DecreaseLeverage { asset, .. }
        | Operation::SetStopLoss { asset, .. }
        | Operation::SetTakeProfit { asset, .. } => {
            account
                .position(asset)
                .map(|_| ())
                .ok_or_else(|| RejectReason::NoPosition {
                    asset: asset.clone(),
                })
        }

        Operation::BuySpot { .. } | Operation::SellSpot { .. } | Operation::Hold => Ok(()),
    }
}

fn allowed(asset: &AssetId, config: &SimConfig) -> Result<(), RejectReason> {
    if config.risk.allowed_assets.is_empty() || config.risk.allowed_assets.contains(asset) {
        Ok(())
    } else {
        Err(RejectReason::AssetNotAllowed {
            asset: asset.clone(),
        })
    }
}

fn price_for(asset: &AssetId, prices: &PriceMap) -> Result<Price, RejectReason> {
    prices
        .get(asset)
        .copied()
        .ok_or_else(|| RejectReason::PriceUnavailable {
            asset: asset.clone(),
        })
}

fn enough_cash(required: Quote, account: &Account) -> Result<(), RejectReason> {
    if required.value() > account.cash.value() {
        return Err(RejectReason::InsufficientCash {
            required,
            available: account.cash,
        });
    }
    Ok(())
}

fn cash_reserve_after(
    spend: Quote,
    account: &Account,
    prices: &PriceMap,
    config: &SimConfig,
) -> Result<(), RejectReason> {
    if config.risk.min_cash_reserve <= Decimal::ZERO {
        return Ok(());
    }
    let equity = total_equity(account, prices);
    if equity.value() <= Decimal::ZERO {
        return Ok(());
    }
    let ratio = account.cash.sub(spend).value() / equity.value();
    if ratio < config.risk.min_cash_reserve {
        return Err(RejectReason::CashReserveBreached {
            ratio,
            min: config.risk.min_cash_reserve,
        });
    }
    Ok(())
}

fn crossed(side: Side, threshold: Price, current: Price) -> bool {
    match side {
        Side::Long => current.value() <= threshold.value(),
        Side::Short => current.value() >= threshold.value(),
    }
}

fn opposite_free(asset: &AssetId, side: Side, account: &Account) -> Result<(), RejectReason> {
    match account.position(asset) {
        Some(pos) if pos.side != side => Err(RejectReason::OppositeSideOpen {
            asset: asset.clone(),
            existing: pos.side,
        }),
        _ => Ok(()),
    }
}

fn position_on_side(asset: &AssetId, side: Side, account: &Account) -> Result<(), RejectReason> {
    match account.position(asset) {
        Some(pos) if pos.side == side => Ok(()),
        _ => Err(RejectReason::NoSuchPosition {
            asset: asset.clone(),
            side,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::FuturesPosition;
    use crate::types::{SessionId, Timestamp};
    use rust_decimal_macros::dec;

    fn btc() -> AssetId {
        AssetId::new("bitcoin")
    }

    fn account_with_cash(cash: Decimal) -> Account {
        Account::new(SessionId(1), Quote::new(cash), Timestamp::from_millis(0))
    }

    fn prices_at(price: Decimal) -> PriceMap {
        let mut prices = PriceMap::new();
        prices.insert(btc(), Price::new_unchecked(price));
        prices
    }

    fn open_long(account: &mut Account, margin: Decimal, leverage: Decimal, entry: Decimal) {
        account.debit(Quote::new(margin)).unwrap();
        account.futures.insert(
            btc(),
            FuturesPosition::open(
                btc(),
                Side::Long,
                Price::new_unchecked(entry),
                Quote::new(margin),
                Leverage::new(leverage).unwrap(),
                Timestamp::from_millis(0),
            ),
        );
    }

    #[test]
    fn sell_more_than_held_is_rejected_at_parameter_stage() {
        let account = account_with_cash(dec!(1000));
        let op = Operation::SellSpot {
            asset: btc(),
            quantity: dec!(1),
        };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Parameter);
        assert!(matches!(rejection.reason, RejectReason::InsufficientHolding { .. }));
    }

    #[test]
    fn open_with_margin_beyond_cash_is_rejected() {
        let account = account_with_cash(dec!(100));
        let op = Operation::OpenLong {
            asset: btc(),
            margin: Quote::new(dec!(500)),
            leverage: Leverage::new(dec!(2)).unwrap(),
        };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Risk);
        assert!(matches!(rejection.reason, RejectReason::InsufficientCash { .. }));
    }

    #[test]
    fn leverage_above_policy_limit_is_rejected() {
        let account = account_with_cash(dec!(10000));
        let op = Operation::OpenLong {
            asset: btc(),
            margin: Quote::new(dec!(100)),
            leverage: Leverage::new(dec!(120)).unwrap(),
        };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::LeverageAboveLimit { .. }));
    }

    #[test]
    fn margin_utilization_cap_applies() {
        let account = account_with_cash(dec!(10000));
        // 3000 margin on 10000 equity = 30% > 25% default cap
        let op = Operation::OpenLong {
            asset: btc(),
            margin: Quote::new(dec!(3000)),
            leverage: Leverage::new(dec!(2)).unwrap(),
        };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::MarginUtilizationExceeded { .. }));
    }

    #[test]
    fn cash_reserve_floor_applies_to_spot_buys() {
        let account = account_with_cash(dec!(10000));
        // spending 9500 leaves 5% cash < 10% floor
        let op = Operation::BuySpot {
            asset: btc(),
            quantity: dec!(95),
        };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::CashReserveBreached { .. }));
    }

    #[test]
    fn close_without_position_is_rejected_at_precondition_stage() {
        let account = account_with_cash(dec!(1000));
        let op = Operation::CloseLong { asset: btc(), at: None };

        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Precondition);
        assert!(matches!(rejection.reason, RejectReason::NoSuchPosition { .. }));
    }

    #[test]
    fn close_wrong_side_is_rejected() {
        let mut account = account_with_cash(dec!(1000));
        open_long(&mut account, dec!(100), dec!(2), dec!(100));

        let op = Operation::CloseShort { asset: btc(), at: None };
        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::NoSuchPosition { .. }));
    }

    #[test]
    fn opposite_side_open_is_rejected() {
        let mut account = account_with_cash(dec!(10000));
        open_long(&mut account, dec!(100), dec!(2), dec!(100));

        let op = Operation::OpenShort {
            asset: btc(),
            margin: Quote::new(dec!(100)),
            leverage: Leverage::new(dec!(2)).unwrap(),
        };
        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Precondition);
        assert!(matches!(rejection.reason, RejectReason::OppositeSideOpen { .. }));
    }

    #[test]
    fn stop_loss_above_entry_rejected_for_long() {
        let mut account = account_with_cash(dec!(1000));
        open_long(&mut account, dec!(100), dec!(2), dec!(100));

        let op = Operation::SetStopLoss {
            asset: btc(),
            price: Price::new_unchecked(dec!(105)),
        };
        let rejection = validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Parameter);
        assert!(matches!(rejection.reason, RejectReason::StopLossOnWrongSide { .. }));
    }

    #[test]
    fn duplicate_stop_loss_is_allowed() {
        let mut account = account_with_cash(dec!(1000));
        open_long(&mut account, dec!(100), dec!(2), dec!(100));
        account.futures.get_mut(&btc()).unwrap().stop_loss =
            Some(Price::new_unchecked(dec!(90)));

        // re-setting overwrites rather than erroring
        let op = Operation::SetStopLoss {
            asset: btc(),
            price: Price::new_unchecked(dec!(95)),
        };
        assert!(validate(&op, &account, &prices_at(dec!(100)), &SimConfig::default()).is_ok());
    }

    #[test]
    fn reduce_margin_cannot_breach_maintenance() {
        let mut account = account_with_cash(dec!(1000));
        open_long(&mut account, dec!(500), dec!(2), dec!(100));

        // at 95.5 the position is down 45. withdrawing 460 of 500 margin puts
        // it at 25x with a liquidation price of 96.2, already crossed
        let op = Operation::ReduceMargin {
            asset: btc(),
            amount: Quote::new(dec!(460)),
        };
        let rejection = validate(&op, &account, &prices_at(dec!(95.5)), &SimConfig::default())
            .unwrap_err();
        assert_eq!(rejection.stage, ValidationStage::Risk);
        assert!(matches!(rejection.reason, RejectReason::WouldBreachMaintenance { .. }));
    }

    #[test]
    fn missing_price_rejects_the_operation() {
        let account = account_with_cash(dec!(10000));
        let op = Operation::BuySpot {
            asset: btc(),
            quantity: dec!(1),
        };

        let rejection = validate(&op, &account, &PriceMap::new(), &SimConfig::default())
            .unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::PriceUnavailable { .. }));
    }

    #[test]
    fn asset_universe_is_enforced() {
        let account = account_with_cash(dec!(10000));
        let mut config = SimConfig::default();
        config.risk.allowed_assets = vec![AssetId::new("ethereum")];

        let op = Operation::BuySpot {
            asset: btc(),
            quantity: dec!(1),
        };
        let rejection = validate(&op, &account, &prices_at(dec!(100)), &config).unwrap_err();
        assert!(matches!(rejection.reason, RejectReason::AssetNotAllowed { .. }));
    }

    #[test]
    fn hold_always_validates() {
        let account = account_with_cash(dec!(0.01));
        assert!(validate(&Operation::Hold, &account, &PriceMap::new(), &SimConfig::default()).is_ok());
    }
}

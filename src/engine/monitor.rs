// 9.3 engine/monitor.rs: risk scanning. every open position is re-checked
// against current prices; whatever trips a trigger is closed through the same
// transactional path as an AI-issued close, as one all-or-nothing batch.

use super::execute::{execute_batch, BatchPolicy};
use super::results::{ExecutionFailure, OperationStatus, TriggeredClosure};
use crate::account::Account;
use crate::config::SimConfig;
use crate::liquidation::{check_position, RiskTrigger};
use crate::market_data::PriceMap;
use crate::operation::Operation;
use crate::types::{AssetId, Quote, Side, Timestamp};

// a position the scan decided to close, and why
#[derive(Debug, Clone)]
pub struct ForcedClose {
    pub asset: AssetId,
    pub side: Side,
    pub op: Operation,
    pub trigger: RiskTrigger,
}

/// Collect the forced-close operations the current prices demand. Positions
/// without a price in the snapshot cannot be evaluated and are skipped.
pub fn scan_account(config: &SimConfig, account: &Account, prices: &PriceMap) -> Vec<ForcedClose> {
    let mut forced: Vec<ForcedClose> = Vec::new();

    for (asset, position) in &account.futures {
        let Some(price) = prices.get(asset) else {
            tracing::warn!(session = %account.id, %asset, "no price for open position, skipping scan");
            continue;
        };

        let Some(trigger) = check_position(position, *price, config.margin.maintenance_margin_ratio)
        else {
            continue;
        };

        // liquidations settle at the current price; stops and take-profits
        // settle at their configured trigger price
        let at = match trigger {
            RiskTrigger::Liquidation { .. } => None,
            RiskTrigger::StopLoss { at } | RiskTrigger::TakeProfit { at } => Some(at),
        };
        let op = match position.side {
            Side::Long => Operation::CloseLong {
                asset: asset.clone(),
                at,
            },
            Side::Short => Operation::CloseShort {
                asset: asset.clone(),
                at,
            },
        };

        forced.push(ForcedClose {
            asset: asset.clone(),
            side: position.side,
            op,
            trigger,
        });
    }

    // map iteration order is arbitrary; keep closures deterministic
    forced.sort_by(|a, b| a.asset.as_str().cmp(b.asset.as_str()));
    forced
}

/// Scan and force-close in one step. Returns what was closed and why.
pub fn apply_triggers(
    config: &SimConfig,
    account: &mut Account,
    prices: &PriceMap,
    now: Timestamp,
) -> Result<Vec<TriggeredClosure>, ExecutionFailure> {
    let forced = scan_account(config, account, prices);
    if forced.is_empty() {
        return Ok(Vec::new());
    }

    let ops: Vec<Operation> = forced.iter().map(|f| f.op.clone()).collect();
    let outcomes = execute_batch(config, account, &ops, prices, BatchPolicy::AllOrNothing, now)?;

    let mut closures = Vec::with_capacity(outcomes.len());
    for (outcome, close) in outcomes.into_iter().zip(forced) {
        let (cash_returned, realized_pnl) = match outcome.status {
            OperationStatus::Applied {
                cash_delta,
                realized_pnl,
            } => (cash_delta, realized_pnl.unwrap_or(Quote::zero())),
            // unreachable under AllOrNothing, which errors instead
            OperationStatus::Rejected(_) => (Quote::zero(), Quote::zero()),
        };

        tracing::warn!(
            session = %account.id,
            asset = %close.asset,
            trigger = close.trigger.describe(),
            pnl = %realized_pnl,
            "forced close"
        );

        closures.push(TriggeredClosure {
            session: account.id,
            asset: close.asset,
            side: close.side,
            trigger: close.trigger,
            realized_pnl,
            cash_returned,
        });
    }

    Ok(closures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::FuturesPosition;
    use crate::types::{Leverage, Price, SessionId};
    use rust_decimal_macros::dec;

    fn btc() -> AssetId {
        AssetId::new("bitcoin")
    }

    fn account_with_short(margin: rust_decimal::Decimal, leverage: rust_decimal::Decimal) -> Account {
        let mut account =
            Account::new(SessionId(7), Quote::new(dec!(10000)), Timestamp::from_millis(0));
        account.debit(Quote::new(margin)).unwrap();
        account.futures.insert(
            btc(),
            FuturesPosition::open(
                btc(),
                Side::Short,
                Price::new_unchecked(dec!(100)),
                Quote::new(margin),
                Leverage::new(leverage).unwrap(),
                Timestamp::from_millis(0),
            ),
        );
        account
    }

    fn prices_at(price: rust_decimal::Decimal) -> PriceMap {
        let mut prices = PriceMap::new();
        prices.insert(btc(), Price::new_unchecked(price));
        prices
    }

    #[test]
    fn safe_position_yields_no_triggers() {
        let config = SimConfig::default();
        let account = account_with_short(dec!(100), dec!(2));
        assert!(scan_account(&config, &account, &prices_at(dec!(101))).is_empty());
    }

    #[test]
    fn underwater_short_is_liquidated() {
        let config = SimConfig::default();
        // 10x short of 1 unit at 100 with 10 margin; at 111 the loss exceeds it
        let mut account = account_with_short(dec!(10), dec!(10));
        let prices = prices_at(dec!(111));

        let closures = apply_triggers(&config, &mut account, &prices, Timestamp::from_millis(1)).unwrap();

        assert_eq!(closures.len(), 1);
        assert!(matches!(closures[0].trigger, RiskTrigger::Liquidation { .. }));
        assert_eq!(closures[0].cash_returned.value(), dec!(0));
        assert_eq!(closures[0].realized_pnl.value(), dec!(-10));
        assert!(account.futures.is_empty());
        // margin fully lost: 10000 - 10
        assert_eq!(account.cash.value(), dec!(9990));
    }

    #[test]
    fn stop_loss_closes_at_trigger_price() {
        let config = SimConfig::default();
        let mut account = account_with_short(dec!(100), dec!(2));
        account.futures.get_mut(&btc()).unwrap().stop_loss =
            Some(Price::new_unchecked(dec!(104)));

        // 2 units short from 100, stopped at 104 even though price is 105
        let closures =
            apply_triggers(&config, &mut account, &prices_at(dec!(105)), Timestamp::from_millis(1))
                .unwrap();

        assert_eq!(closures.len(), 1);
        assert!(matches!(closures[0].trigger, RiskTrigger::StopLoss { .. }));
        assert_eq!(closures[0].realized_pnl.value(), dec!(-8));
        assert_eq!(account.cash.value(), dec!(9992));
    }

    #[test]
    fn take_profit_closes_short_on_drop() {
        let config = SimConfig::default();
        let mut account = account_with_short(dec!(100), dec!(2));
        account.futures.get_mut(&btc()).unwrap().take_profit =
            Some(Price::new_unchecked(dec!(90)));

        let closures =
            apply_triggers(&config, &mut account, &prices_at(dec!(88)), Timestamp::from_millis(1))
                .unwrap();

        assert_eq!(closures.len(), 1);
        assert!(matches!(closures[0].trigger, RiskTrigger::TakeProfit { .. }));
        // 2 units * 10 favorable move, settled at the 90 target
        assert_eq!(closures[0].realized_pnl.value(), dec!(20));
    }

    #[test]
    fn missing_price_skips_the_position() {
        let config = SimConfig::default();
        let mut account = account_with_short(dec!(10), dec!(10));
        let closures =
            apply_triggers(&config, &mut account, &PriceMap::new(), Timestamp::from_millis(1))
                .unwrap();
        assert!(closures.is_empty());
        assert_eq!(account.futures.len(), 1);
    }
}

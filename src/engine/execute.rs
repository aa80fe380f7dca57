// 9.1 engine/execute.rs: the transactional batch executor. operations apply to
// a working copy of the account; the copy replaces live state only if the
// whole batch lands. validation runs per operation against the working copy,
// so an operation sees exactly the state its predecessors produced.

use super::results::{ExecutionFailure, OperationOutcome, OperationStatus};
use crate::account::Account;
use crate::config::SimConfig;
use crate::market_data::PriceMap;
use crate::operation::{Operation, OperationRecord};
use crate::position::{merge_open, FuturesPosition};
use crate::types::{AssetId, Leverage, Price, Quote, Side, Timestamp};
use crate::validate::validate;
use rust_decimal::Decimal;

// How a batch treats a validation rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    // decision cycles: drop the rejected operation, apply the rest atomically
    RejectFailing,
    // settlement and forced closures: one rejection aborts everything
    AllOrNothing,
}

/// Apply a batch of operations with all-or-nothing semantics over the
/// accepted subset. On success the account is swapped to the post-batch state
/// and one record per operation is appended; on failure it is left untouched.
pub fn execute_batch(
    config: &SimConfig,
    account: &mut Account,
    ops: &[Operation],
    prices: &PriceMap,
    policy: BatchPolicy,
    now: Timestamp,
) -> Result<Vec<OperationOutcome>, ExecutionFailure> {
    let mut working = account.clone();
    let mut outcomes = Vec::with_capacity(ops.len());

    for (index, op) in ops.iter().enumerate() {
        match validate(op, &working, prices, config) {
            Err(rejection) => {
                if policy == BatchPolicy::AllOrNothing {
                    return Err(ExecutionFailure {
                        index,
                        kind: op.kind(),
                        reason: rejection.to_string(),
                    });
                }
                tracing::debug!(op = %op.kind(), %rejection, "operation rejected");
                working.record(OperationRecord::rejected(
                    op.clone(),
                    rejection.to_string(),
                    now,
                ));
                outcomes.push(OperationOutcome {
                    op: op.clone(),
                    status: OperationStatus::Rejected(rejection),
                });
            }
            Ok(()) => {
                let applied = apply(&mut working, op, prices, now).map_err(|reason| {
                    ExecutionFailure {
                        index,
                        kind: op.kind(),
                        reason,
                    }
                })?;
                working.record(OperationRecord::applied(
                    op.clone(),
                    applied.cash_delta,
                    applied.realized_pnl,
                    now,
                ));
                outcomes.push(OperationOutcome {
                    op: op.clone(),
                    status: OperationStatus::Applied {
                        cash_delta: applied.cash_delta,
                        realized_pnl: applied.realized_pnl,
                    },
                });
            }
        }
    }

    // the atomic swap: nothing above touched the live account
    *account = working;
    Ok(outcomes)
}

struct Applied {
    cash_delta: Quote,
    realized_pnl: Option<Quote>,
}

// 9.2: per-operation state transitions. validation has passed; anything that
// still fails here is a broken derived invariant and aborts the batch.
fn apply(
    account: &mut Account,
    op: &Operation,
    prices: &PriceMap,
    now: Timestamp,
) -> Result<Applied, String> {
    match op {
        Operation::BuySpot { asset, quantity } => {
            let price = current_price(asset, prices)?;
            let cost = Quote::new(*quantity * price.value());
            debit(account, cost)?;

            let holding = account.spot.entry(asset.clone()).or_insert_with(|| {
                crate::position::SpotHolding::new(asset.clone(), Decimal::ZERO, Quote::zero())
            });
            holding.quantity += *quantity;
            holding.cost_basis = holding.cost_basis.add(cost);

            Ok(Applied {
                cash_delta: cost.negate(),
                realized_pnl: None,
            })
        }

        Operation::SellSpot { asset, quantity } => {
            let price = current_price(asset, prices)?;
            let holding = account
                .spot
                .get_mut(asset)
                .ok_or_else(|| format!("no spot holding for '{asset}'"))?;

            let proceeds = Quote::new(*quantity * price.value());
            let basis_removed = holding.cost_basis.mul(*quantity / holding.quantity);
            let realized = proceeds.sub(basis_removed);

            holding.quantity -= *quantity;
            holding.cost_basis = holding.cost_basis.sub(basis_removed);
            if holding.quantity <= Decimal::ZERO {
                account.spot.remove(asset);
            }

            account.credit(proceeds);
            Ok(Applied {
                cash_delta: proceeds,
                realized_pnl: Some(realized),
            })
        }

        Operation::OpenLong { asset, margin, leverage } => {
            open_position(account, asset, Side::Long, *margin, *leverage, prices, now)
        }
        Operation::OpenShort { asset, margin, leverage } => {
            open_position(account, asset, Side::Short, *margin, *leverage, prices, now)
        }

        Operation::CloseLong { asset, at } => close_position(account, asset, Side::Long, *at, prices),
        Operation::CloseShort { asset, at } => close_position(account, asset, Side::Short, *at, prices),

        Operation::AddMargin { asset, amount } => {
            debit(account, *amount)?;
            let pos = position_mut(account, asset)?;
            pos.margin = pos.margin.add(*amount);
            let new_leverage = pos.entry_notional().value() / pos.margin.value();
            pos.leverage = Leverage::new(new_leverage)
                .ok_or_else(|| format!("margin addition pushed leverage under 1x on '{asset}'"))?;
            pos.updated_at = now;

            Ok(Applied {
                cash_delta: amount.negate(),
                realized_pnl: None,
            })
        }

        Operation::ReduceMargin { asset, amount } => {
            let pos = position_mut(account, asset)?;
            pos.margin = pos.margin.sub(*amount);
            let new_leverage = pos.entry_notional().value() / pos.margin.value();
            pos.leverage = Leverage::new(new_leverage)
                .ok_or_else(|| format!("margin withdrawal broke leverage on '{asset}'"))?;
            pos.updated_at = now;

            account.credit(*amount);
            Ok(Applied {
                cash_delta: *amount,
                realized_pnl: None,
            })
        }

        Operation::IncreaseLeverage { asset, target } => {
            retarget_leverage(account, asset, *target, prices, now)
        }
        Operation::DecreaseLeverage { asset, target } => {
            retarget_leverage(account, asset, *target, prices, now)
        }

        Operation::SetStopLoss { asset, price } => {
            let pos = position_mut(account, asset)?;
            pos.stop_loss = Some(*price);
            pos.updated_at = now;
            Ok(Applied {
                cash_delta: Quote::zero(),
                realized_pnl: None,
            })
        }

        Operation::SetTakeProfit { asset, price } => {
            let pos = position_mut(account, asset)?;
            pos.take_profit = Some(*price);
            pos.updated_at = now;
            Ok(Applied {
                cash_delta: Quote::zero(),
                realized_pnl: None,
            })
        }

        Operation::Hold => Ok(Applied {
            cash_delta: Quote::zero(),
            realized_pnl: None,
        }),
    }
}

fn open_position(
    account: &mut Account,
    asset: &AssetId,
    side: Side,
    margin: Quote,
    leverage: Leverage,
    prices: &PriceMap,
    now: Timestamp,
) -> Result<Applied, String> {
    let price = current_price(asset, prices)?;
    debit(account, margin)?;

    let position = match account.futures.get(asset) {
        Some(existing) if existing.side == side => {
            merge_open(existing, margin, leverage, price, now)
        }
        Some(existing) => {
            return Err(format!(
                "existing {} position on '{asset}' surfaced during apply",
                existing.side
            ))
        }
        None => FuturesPosition::open(asset.clone(), side, price, margin, leverage, now),
    };
    account.futures.insert(asset.clone(), position);

    Ok(Applied {
        cash_delta: margin.negate(),
        realized_pnl: None,
    })
}

// one code path for every close: user-issued, stop, take-profit, liquidation.
// the exit price is the forced trigger price when given, market otherwise.
// cash returned is floored at zero: a blown position costs at most its margin.
fn close_position(
    account: &mut Account,
    asset: &AssetId,
    side: Side,
    at: Option<Price>,
    prices: &PriceMap,
) -> Result<Applied, String> {
    let exit = match at {
        Some(price) => price,
        None => current_price(asset, prices)?,
    };

    let pos = account
        .futures
        .remove(asset)
        .ok_or_else(|| format!("no futures position on '{asset}'"))?;
    if pos.side != side {
        account.futures.insert(asset.clone(), pos);
        return Err(format!("position side mismatch on '{asset}'"));
    }

    let pnl = pos.unrealized_pnl(exit);
    let returned = Quote::new(pos.margin.add(pnl).value().max(Decimal::ZERO));
    account.credit(returned);

    Ok(Applied {
        cash_delta: returned,
        realized_pnl: Some(returned.sub(pos.margin)),
    })
}

// leverage changes re-solve margin against current notional: margin moves to
// notional / target, the difference settles against cash.
fn retarget_leverage(
    account: &mut Account,
    asset: &AssetId,
    target: Leverage,
    prices: &PriceMap,
    now: Timestamp,
) -> Result<Applied, String> {
    let price = current_price(asset, prices)?;

    let (new_margin, delta) = {
        let pos = account
            .futures
            .get(asset)
            .ok_or_else(|| format!("no futures position on '{asset}'"))?;
        let new_margin = Quote::new(pos.notional(price).value() / target.value());
        (new_margin, new_margin.sub(pos.margin))
    };

    if delta.value() > Decimal::ZERO {
        debit(account, delta)?;
    } else {
        account.credit(delta.abs());
    }

    let pos = position_mut(account, asset)?;
    pos.margin = new_margin;
    pos.leverage = target;
    pos.updated_at = now;

    Ok(Applied {
        cash_delta: delta.negate(),
        realized_pnl: None,
    })
}

fn current_price(asset: &AssetId, prices: &PriceMap) -> Result<Price, String> {
    prices
        .get(asset)
        .copied()
        .ok_or_else(|| format!("no price for '{asset}'"))
}

fn debit(account: &mut Account, amount: Quote) -> Result<(), String> {
    account.debit(amount).map_err(|e| e.to_string())
}

fn position_mut<'a>(
    account: &'a mut Account,
    asset: &AssetId,
) -> Result<&'a mut FuturesPosition, String> {
    account
        .futures
        .get_mut(asset)
        .ok_or_else(|| format!("no futures position on '{asset}'"))
}

// 9.4 engine/settle.rs: session settlement. everything still open is closed
// at current prices through one all-or-nothing batch, then the account is
// frozen behind its final report.

use super::execute::{execute_batch, BatchPolicy};
use super::results::{ExecutionFailure, SettlementReport};
use crate::account::{Account, AccountStatus};
use crate::config::SimConfig;
use crate::market_data::PriceMap;
use crate::operation::{Operation, OperationKind};
use crate::types::{Quote, Side, Timestamp};
use rust_decimal::Decimal;

/// Close out the whole account and produce its settlement report. On failure
/// the account is untouched and stays active.
pub fn settle_account(
    config: &SimConfig,
    account: &mut Account,
    prices: &PriceMap,
    now: Timestamp,
) -> Result<SettlementReport, ExecutionFailure> {
    // settling twice returns the first report and mutates nothing
    if let Some(report) = &account.settlement {
        return Ok(report.clone());
    }

    let mut ops: Vec<Operation> = Vec::new();

    let mut spot_assets: Vec<_> = account.spot.values().collect();
    spot_assets.sort_by(|a, b| a.asset.as_str().cmp(b.asset.as_str()));
    for holding in spot_assets {
        ops.push(Operation::SellSpot {
            asset: holding.asset.clone(),
            quantity: holding.quantity,
        });
    }

    let mut positions: Vec<_> = account.futures.values().collect();
    positions.sort_by(|a, b| a.asset.as_str().cmp(b.asset.as_str()));
    for position in positions {
        ops.push(match position.side {
            Side::Long => Operation::CloseLong {
                asset: position.asset.clone(),
                at: None,
            },
            Side::Short => Operation::CloseShort {
                asset: position.asset.clone(),
                at: None,
            },
        });
    }

    execute_batch(config, account, &ops, prices, BatchPolicy::AllOrNothing, now)?;

    // everything is cash now
    let final_equity = account.cash;
    let pnl = final_equity.sub(account.initial_capital);
    let return_pct = if account.initial_capital.value() > Decimal::ZERO {
        pnl.value() / account.initial_capital.value() * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    let breakdown = pnl_breakdown(account);

    let report = SettlementReport {
        session: account.id,
        initial_capital: account.initial_capital,
        final_equity,
        return_pct,
        spot_pnl: breakdown.spot_pnl,
        futures_pnl: breakdown.futures_pnl,
        wins: breakdown.wins,
        losses: breakdown.losses,
        finished_at: now,
    };

    account.status = AccountStatus::Finished;
    account.settlement = Some(report.clone());

    Ok(report)
}

struct PnlBreakdown {
    spot_pnl: Quote,
    futures_pnl: Quote,
    wins: usize,
    losses: usize,
}

// walk the full history: every applied record with realized pnl is one
// outcome in the win/loss ledger
fn pnl_breakdown(account: &Account) -> PnlBreakdown {
    let mut breakdown = PnlBreakdown {
        spot_pnl: Quote::zero(),
        futures_pnl: Quote::zero(),
        wins: 0,
        losses: 0,
    };

    for record in &account.history {
        if !record.is_applied() {
            continue;
        }
        let Some(pnl) = record.realized_pnl else {
            continue;
        };

        match record.op.kind() {
            OperationKind::SellSpot => {
                breakdown.spot_pnl = breakdown.spot_pnl.add(pnl);
            }
            OperationKind::CloseLong | OperationKind::CloseShort => {
                breakdown.futures_pnl = breakdown.futures_pnl.add(pnl);
            }
            _ => continue,
        }

        if pnl.value() > Decimal::ZERO {
            breakdown.wins += 1;
        } else if pnl.value() < Decimal::ZERO {
            breakdown.losses += 1;
        }
    }

    breakdown
}

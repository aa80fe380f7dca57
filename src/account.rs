//! Account state: cash, spot holdings, futures positions, operation history.
//!
//! The account is the only mutable shared resource in the system. Nothing
//! outside the execution engine mutates one directly; every change flows
//! through a validated, transactional batch.

use crate::engine::SettlementReport;
use crate::market_data::PriceMap;
use crate::operation::OperationRecord;
use crate::position::{FuturesPosition, SpotHolding};
use crate::types::{AssetId, Quote, SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: SessionId,
    pub cash: Quote,
    pub initial_capital: Quote,
    pub spot: HashMap<AssetId, SpotHolding>,
    pub futures: HashMap<AssetId, FuturesPosition>,
    pub history: Vec<OperationRecord>,
    pub status: AccountStatus,
    pub created_at: Timestamp,
    // stored on finish so a second finish returns the same report
    pub settlement: Option<SettlementReport>,
}

impl Account {
    pub fn new(id: SessionId, initial_capital: Quote, timestamp: Timestamp) -> Self {
        Self {
            id,
            cash: initial_capital,
            initial_capital,
            spot: HashMap::new(),
            futures: HashMap::new(),
            history: Vec::new(),
            status: AccountStatus::Active,
            created_at: timestamp,
            settlement: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == AccountStatus::Finished
    }

    pub fn credit(&mut self, amount: Quote) {
        self.cash = self.cash.add(amount);
    }

    pub fn debit(&mut self, amount: Quote) -> Result<(), AccountError> {
        if amount.value() > self.cash.value() {
            return Err(AccountError::InsufficientCash {
                requested: amount,
                available: self.cash,
            });
        }
        self.cash = self.cash.sub(amount);
        Ok(())
    }

    pub fn holding(&self, asset: &AssetId) -> Option<&SpotHolding> {
        self.spot.get(asset)
    }

    pub fn position(&self, asset: &AssetId) -> Option<&FuturesPosition> {
        self.futures.get(asset)
    }

    pub fn record(&mut self, record: OperationRecord) {
        self.history.push(record);
    }

    // total margin currently locked in open positions
    pub fn margin_used(&self) -> Quote {
        self.futures.values().map(|p| p.margin).sum()
    }

    // every asset the account currently references, for price fetching
    pub fn referenced_assets(&self) -> Vec<AssetId> {
        let mut assets: Vec<AssetId> = self.spot.keys().cloned().collect();
        for asset in self.futures.keys() {
            if !assets.contains(asset) {
                assets.push(asset.clone());
            }
        }
        assets
    }
}

/// Cash + spot market value + futures equity (margin + unrealized PnL).
///
/// An asset with no price in the snapshot is valued at its entry, i.e. with
/// zero unrealized PnL, rather than silently at zero.
pub fn total_equity(account: &Account, prices: &PriceMap) -> Quote {
    let mut equity = account.cash;

    for (asset, holding) in &account.spot {
        let value = match prices.get(asset) {
            Some(price) => holding.market_value(*price),
            None => holding.cost_basis,
        };
        equity = equity.add(value);
    }

    for (asset, position) in &account.futures {
        let pnl = match prices.get(asset) {
            Some(price) => position.unrealized_pnl(*price),
            None => Quote::zero(),
        };
        equity = equity.add(position.margin).add(pnl);
    }

    equity
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountError {
    #[error("insufficient cash: requested {requested}, available {available}")]
    InsufficientCash { requested: Quote, available: Quote },
}

// 2.0: the closed instruction set. every AI decision is normalized into one of
// these variants before anything else looks at it. operations are transient:
// built per decision cycle, consumed by the pipeline, persisted only as the
// resulting OperationRecord.

use crate::types::{AssetId, Leverage, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    BuySpot { asset: AssetId, quantity: Decimal },
    SellSpot { asset: AssetId, quantity: Decimal },
    OpenLong { asset: AssetId, margin: Quote, leverage: Leverage },
    OpenShort { asset: AssetId, margin: Quote, leverage: Leverage },
    // `at` is the forced trigger price set by the risk monitor. AI-issued
    // closes always carry None and execute at the current market price.
    CloseLong { asset: AssetId, at: Option<Price> },
    CloseShort { asset: AssetId, at: Option<Price> },
    AddMargin { asset: AssetId, amount: Quote },
    ReduceMargin { asset: AssetId, amount: Quote },
    IncreaseLeverage { asset: AssetId, target: Leverage },
    DecreaseLeverage { asset: AssetId, target: Leverage },
    SetStopLoss { asset: AssetId, price: Price },
    SetTakeProfit { asset: AssetId, price: Price },
    Hold,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::BuySpot { .. } => OperationKind::BuySpot,
            Operation::SellSpot { .. } => OperationKind::SellSpot,
            Operation::OpenLong { .. } => OperationKind::OpenLong,
            Operation::OpenShort { .. } => OperationKind::OpenShort,
            Operation::CloseLong { .. } => OperationKind::CloseLong,
            Operation::CloseShort { .. } => OperationKind::CloseShort,
            Operation::AddMargin { .. } => OperationKind::AddMargin,
            Operation::ReduceMargin { .. } => OperationKind::ReduceMargin,
            Operation::IncreaseLeverage { .. } => OperationKind::IncreaseLeverage,
            Operation::DecreaseLeverage { .. } => OperationKind::DecreaseLeverage,
            Operation::SetStopLoss { .. } => OperationKind::SetStopLoss,
            Operation::SetTakeProfit { .. } => OperationKind::SetTakeProfit,
            Operation::Hold => OperationKind::Hold,
        }
    }

    pub fn asset(&self) -> Option<&AssetId> {
        match self {
            Operation::BuySpot { asset, .. }
            | Operation::SellSpot { asset, .. }
            | Operation::OpenLong { asset, .. }
            | Operation::OpenShort { asset, .. }
            | Operation::CloseLong { asset, .. }
            | Operation::CloseShort { asset, .. }
            | Operation::AddMargin { asset, .. }
            | Operation::ReduceMargin { asset, .. }
            | Operation::IncreaseLeverage { asset, .. }
            | Operation::DecreaseLeverage { asset, .. }
            | Operation::SetStopLoss { asset, .. }
            | Operation::SetTakeProfit { asset, .. } => Some(asset),
            Operation::Hold => None,
        }
    }
}

// 2.1: operation kinds as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    BuySpot,
    SellSpot,
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    AddMargin,
    ReduceMargin,
    IncreaseLeverage,
    DecreaseLeverage,
    SetStopLoss,
    SetTakeProfit,
    Hold,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::BuySpot => "BUY_SPOT",
            OperationKind::SellSpot => "SELL_SPOT",
            OperationKind::OpenLong => "OPEN_LONG",
            OperationKind::OpenShort => "OPEN_SHORT",
            OperationKind::CloseLong => "CLOSE_LONG",
            OperationKind::CloseShort => "CLOSE_SHORT",
            OperationKind::AddMargin => "ADD_MARGIN",
            OperationKind::ReduceMargin => "REDUCE_MARGIN",
            OperationKind::IncreaseLeverage => "INCREASE_LEVERAGE",
            OperationKind::DecreaseLeverage => "DECREASE_LEVERAGE",
            OperationKind::SetStopLoss => "SET_STOP_LOSS",
            OperationKind::SetTakeProfit => "SET_TAKE_PROFIT",
            OperationKind::Hold => "HOLD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "BUY_SPOT" => Some(OperationKind::BuySpot),
            "SELL_SPOT" => Some(OperationKind::SellSpot),
            "OPEN_LONG" => Some(OperationKind::OpenLong),
            "OPEN_SHORT" => Some(OperationKind::OpenShort),
            "CLOSE_LONG" => Some(OperationKind::CloseLong),
            "CLOSE_SHORT" => Some(OperationKind::CloseShort),
            "ADD_MARGIN" => Some(OperationKind::AddMargin),
            "REDUCE_MARGIN" => Some(OperationKind::ReduceMargin),
            "INCREASE_LEVERAGE" => Some(OperationKind::IncreaseLeverage),
            "DECREASE_LEVERAGE" => Some(OperationKind::DecreaseLeverage),
            "SET_STOP_LOSS" => Some(OperationKind::SetStopLoss),
            "SET_TAKE_PROFIT" => Some(OperationKind::SetTakeProfit),
            "HOLD" => Some(OperationKind::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// 2.2: immutable audit log entry. one per operation that went through the
// execution engine, applied or rejected. append-only; settlement reads the
// realized pnl entries back out for the win/loss breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op: Operation,
    // net cash movement this operation caused (negative = spent)
    pub cash_delta: Quote,
    // set for sells and closes: the pnl actually realized into cash
    pub realized_pnl: Option<Quote>,
    pub timestamp: Timestamp,
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordOutcome {
    Applied,
    Rejected { reason: String },
}

impl OperationRecord {
    pub fn applied(
        op: Operation,
        cash_delta: Quote,
        realized_pnl: Option<Quote>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            op,
            cash_delta,
            realized_pnl,
            timestamp,
            outcome: RecordOutcome::Applied,
        }
    }

    pub fn rejected(op: Operation, reason: String, timestamp: Timestamp) -> Self {
        Self {
            op,
            cash_delta: Quote::zero(),
            realized_pnl: None,
            timestamp,
            outcome: RecordOutcome::Rejected { reason },
        }
    }

    pub fn is_applied(&self) -> bool {
        self.outcome == RecordOutcome::Applied
    }
}

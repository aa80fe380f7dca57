// 9.0.2: result types and errors for engine operations.

use crate::account::AccountStatus;
use crate::decision::DecisionError;
use crate::liquidation::RiskTrigger;
use crate::market_data::MarketDataError;
use crate::operation::{Operation, OperationKind};
use crate::parser::{ParseError, PayloadError};
use crate::types::{AssetId, Leverage, Price, Quote, SessionId, Side, Timestamp};
use crate::validate::Rejection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of one decision cycle: what was applied, what was rejected and
/// why, and where the account ended up.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub session: SessionId,
    pub analysis: Option<String>,
    pub outcomes: Vec<OperationOutcome>,
    pub parse_errors: Vec<ParseError>,
    pub cash_after: Quote,
    pub equity_after: Quote,
}

impl BatchResult {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OperationStatus::Applied { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.outcomes.len() - self.applied_count()
    }
}

#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub op: Operation,
    pub status: OperationStatus,
}

#[derive(Debug, Clone)]
pub enum OperationStatus {
    Applied {
        cash_delta: Quote,
        realized_pnl: Option<Quote>,
    },
    Rejected(Rejection),
}

/// One position the risk monitor force-closed, and why.
#[derive(Debug, Clone)]
pub struct TriggeredClosure {
    pub session: SessionId,
    pub asset: AssetId,
    pub side: Side,
    pub trigger: RiskTrigger,
    pub realized_pnl: Quote,
    pub cash_returned: Quote,
}

/// Read-only view of an account, priced at the latest snapshot.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub session: SessionId,
    pub status: AccountStatus,
    pub cash: Quote,
    pub equity: Quote,
    pub margin_used: Quote,
    pub unrealized_pnl: Quote,
    pub pnl: Quote,
    pub pnl_pct: Decimal,
    pub spot: Vec<HoldingStatus>,
    pub futures: Vec<PositionStatus>,
}

#[derive(Debug, Clone)]
pub struct HoldingStatus {
    pub asset: AssetId,
    pub quantity: Decimal,
    pub value: Quote,
    pub unrealized_pnl: Quote,
}

#[derive(Debug, Clone)]
pub struct PositionStatus {
    pub asset: AssetId,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Price,
    pub current_price: Option<Price>,
    pub leverage: Leverage,
    pub margin: Quote,
    pub unrealized_pnl: Quote,
    pub margin_ratio: Decimal,
    pub liquidation_price: Price,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

/// Final accounting for a finished session. Stored on the account so a
/// repeated finish returns the identical report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub session: SessionId,
    pub initial_capital: Quote,
    pub final_equity: Quote,
    pub return_pct: Decimal,
    pub spot_pnl: Quote,
    pub futures_pnl: Quote,
    pub wins: usize,
    pub losses: usize,
    pub finished_at: Timestamp,
}

/// An accepted operation broke a derived invariant while being applied. The
/// whole batch was rolled back; live state is untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("batch aborted at operation {index} ({kind}): {reason}")]
pub struct ExecutionFailure {
    pub index: usize,
    pub kind: OperationKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session {0} is finished")]
    SessionFinished(SessionId),

    #[error("initial capital must be positive")]
    InvalidCapital,

    #[error("decision payload undecodable: {0}")]
    Payload(#[from] PayloadError),

    #[error("market data failure: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("decision source failure: {0}")]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

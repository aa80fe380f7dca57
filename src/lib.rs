// simvest-core: AI-driven investment simulation engine.
// transaction-first architecture: every instruction batch applies atomically
// or not at all. the core is deterministic; all external I/O (prices, the AI
// decision source, notifications) sits behind async traits.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: SessionId, AssetId, Side, Price, Quote, Leverage
//   2.x  operation.rs: the closed instruction set + audit records
//   3.x  parser.rs: untrusted AI payload -> typed operations
//   4.x  position.rs: spot holdings, futures positions, pnl math
//   5.x  margin.rs: margin requirements and ratios
//   6.x  liquidation.rs: liquidation price, stop/take-profit triggers
//   7.x  account.rs: account state + total equity
//   8.x  validate.rs: parameter -> risk -> precondition pipeline
//   9.x  engine/: coordinator, transactional executor, monitor, settlement
//   10.x config.rs: margin params, risk policy, timeouts, presets
//   11.x market_data.rs: price source boundary (mocked in-crate)
//   12.x decision.rs: AI decision source boundary (scripted in-crate)
//   13.x notify.rs: notification boundary + summary formatting

// core state and math
pub mod account;
pub mod liquidation;
pub mod margin;
pub mod operation;
pub mod position;
pub mod types;

// instruction path
pub mod engine;
pub mod parser;
pub mod validate;

// integration modules
pub mod config;
pub mod decision;
pub mod market_data;
pub mod notify;

// re exports for convenience
pub use account::{total_equity, Account, AccountError, AccountStatus};
pub use config::{ConfigError, RiskPolicy, SimConfig};
pub use decision::{DecisionError, DecisionSource, ScriptedDecisions};
pub use engine::{
    apply_triggers, execute_batch, scan_account, settle_account, BatchPolicy, BatchResult, Engine,
    EngineError, ExecutionFailure, ForcedClose, HoldingStatus, OperationOutcome, OperationStatus,
    PositionStatus, SettlementReport, StatusSnapshot, TriggeredClosure,
};
pub use liquidation::{check_position, liquidation_price, RiskTrigger};
pub use margin::{margin_ratio, required_margin, MarginParams};
pub use market_data::{MarketDataError, MarketDataSource, PriceMap, StaticPrices};
pub use notify::{LogNotifier, MemoryNotifier, Notifier};
pub use operation::{Operation, OperationKind, OperationRecord, RecordOutcome};
pub use parser::{parse_decision, DecisionPayload, ParseError, ParseReason, PayloadError};
pub use position::{futures_pnl, merge_open, spot_pnl, FuturesPosition, SpotHolding};
pub use types::{AssetId, Leverage, Price, Quote, SessionId, Side, Timestamp};
pub use validate::{validate, RejectReason, Rejection, ValidationStage};

// 9.0 engine/: the coordinator and its transactional machinery. core.rs holds
// the session registry and drives cycles, execute.rs applies batches with
// all-or-nothing semantics, monitor.rs forces risk-triggered closes, and
// settle.rs winds a session down.

mod core;
mod execute;
mod monitor;
mod results;
mod settle;

pub use self::core::Engine;
pub use execute::{execute_batch, BatchPolicy};
pub use monitor::{apply_triggers, scan_account, ForcedClose};
pub use results::{
    BatchResult, EngineError, ExecutionFailure, HoldingStatus, OperationOutcome, OperationStatus,
    PositionStatus, SettlementReport, StatusSnapshot, TriggeredClosure,
};
pub use settle::settle_account;

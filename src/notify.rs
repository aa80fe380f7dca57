// 13.0: notification boundary. the engine pushes human-readable summaries of
// batch results, forced closures, and settlements out through this trait.
// delivery is best effort: implementations deal with their own failures and
// nothing here can affect engine state.

use crate::engine::{BatchResult, OperationStatus, SettlementReport, TriggeredClosure};
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    async fn notify(&self, message: &str) {
        (**self).notify(message).await
    }
}

// 13.1: routes summaries into the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!(target: "notifications", "{message}");
    }
}

// 13.2: collects messages in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: std::sync::Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, message: &str) {
        self.messages
            .lock()
            .expect("notifier lock poisoned")
            .push(message.to_string());
    }
}

/// Summary of one decision cycle for delivery to the user.
pub fn format_batch_summary(result: &BatchResult) -> String {
    let mut lines = vec![format!(
        "session {}: decision cycle, {} applied / {} rejected / {} unparseable",
        result.session,
        result.applied_count(),
        result.rejected_count(),
        result.parse_errors.len(),
    )];

    for outcome in &result.outcomes {
        let asset = outcome
            .op
            .asset()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &outcome.status {
            OperationStatus::Applied { cash_delta, realized_pnl } => {
                let pnl = realized_pnl
                    .map(|p| format!(", pnl {p}"))
                    .unwrap_or_default();
                lines.push(format!(
                    "  {} {} applied, cash {}{}",
                    outcome.op.kind(),
                    asset,
                    cash_delta,
                    pnl
                ));
            }
            OperationStatus::Rejected(rejection) => {
                lines.push(format!("  {} {} rejected: {}", outcome.op.kind(), asset, rejection));
            }
        }
    }

    for error in &result.parse_errors {
        lines.push(format!("  unparseable: {error}"));
    }

    lines.push(format!(
        "  cash {}, equity {}",
        result.cash_after, result.equity_after
    ));
    lines.join("\n")
}

/// Summary of risk-monitor closures.
pub fn format_trigger_summary(closures: &[TriggeredClosure]) -> String {
    let mut lines = Vec::with_capacity(closures.len());
    for closure in closures {
        lines.push(format!(
            "session {}: {} closed {} {} at pnl {}, returned {}",
            closure.session,
            closure.trigger.describe(),
            closure.side,
            closure.asset,
            closure.realized_pnl,
            closure.cash_returned,
        ));
    }
    lines.join("\n")
}

/// Final settlement report text.
pub fn format_settlement(report: &SettlementReport) -> String {
    format!(
        "session {} settled: initial {}, final {}, return {}% \
         (spot pnl {}, futures pnl {}, {} wins / {} losses)",
        report.session,
        report.initial_capital,
        report.final_equity,
        report.return_pct,
        report.spot_pnl,
        report.futures_pnl,
        report.wins,
        report.losses,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quote, SessionId, Timestamp};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.notify("first").await;
        notifier.notify("second").await;
        assert_eq!(notifier.messages(), vec!["first", "second"]);
    }

    #[test]
    fn settlement_format_mentions_the_numbers() {
        let report = SettlementReport {
            session: SessionId(3),
            initial_capital: Quote::new(dec!(10000)),
            final_equity: Quote::new(dec!(10090)),
            return_pct: dec!(0.9),
            spot_pnl: Quote::new(dec!(50)),
            futures_pnl: Quote::new(dec!(40)),
            wins: 2,
            losses: 0,
            finished_at: Timestamp::from_millis(0),
        };

        let text = format_settlement(&report);
        assert!(text.contains("session 3"));
        assert!(text.contains("10090"));
        assert!(text.contains("0.9%"));
    }

    #[test]
    fn batch_summary_lists_outcomes() {
        let result = BatchResult {
            session: SessionId(1),
            analysis: None,
            outcomes: Vec::new(),
            parse_errors: Vec::new(),
            cash_after: Quote::new(dec!(100)),
            equity_after: Quote::new(dec!(100)),
        };
        let text = format_batch_summary(&result);
        assert!(text.contains("0 applied"));
        assert!(text.contains("equity 100"));
    }
}

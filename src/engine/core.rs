// 9.0 engine/core.rs: the coordinator. owns the session registry and drives
// decision cycles, status queries, risk polling, and settlement against the
// external collaborators. all state lives here; one tokio mutex per account
// serializes every mutation of that account, while distinct accounts proceed
// in parallel.

use super::execute::{execute_batch, BatchPolicy};
use super::monitor::apply_triggers;
use super::results::{
    BatchResult, EngineError, HoldingStatus, PositionStatus, SettlementReport, StatusSnapshot,
    TriggeredClosure,
};
use super::settle::settle_account;
use crate::account::{total_equity, Account};
use crate::config::{ConfigError, SimConfig};
use crate::decision::{DecisionError, DecisionSource};
use crate::liquidation::liquidation_price;
use crate::margin::margin_ratio;
use crate::market_data::{MarketDataError, MarketDataSource, PriceMap};
use crate::notify::{self, Notifier};
use crate::operation::Operation;
use crate::parser;
use crate::types::{AssetId, Quote, SessionId, Timestamp};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub struct Engine<M, D, N> {
    config: SimConfig,
    market: M,
    decisions: D,
    notifier: N,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Account>>>>,
    next_session: AtomicU64,
}

impl<M, D, N> Engine<M, D, N>
where
    M: MarketDataSource,
    D: DecisionSource,
    N: Notifier,
{
    pub fn new(config: SimConfig, market: M, decisions: D, notifier: N) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            market,
            decisions,
            notifier,
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Create a fresh simulation session funded with `initial_capital`.
    pub async fn start_session(&self, initial_capital: Quote) -> Result<SessionId, EngineError> {
        if initial_capital.value() <= Decimal::ZERO {
            return Err(EngineError::InvalidCapital);
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let account = Account::new(id, initial_capital, Timestamp::now());
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(account)));

        tracing::info!(session = %id, capital = %initial_capital, "session started");
        Ok(id)
    }

    /// Run one full decision cycle: fetch prices, ask the decision source,
    /// parse, validate, and execute. The session lock is held throughout, so
    /// a cycle never interleaves with the monitor or a settlement.
    pub async fn submit_decision_cycle(&self, id: SessionId) -> Result<BatchResult, EngineError> {
        let handle = self.session(id).await?;
        let mut account = handle.lock().await;
        if account.is_finished() {
            return Err(EngineError::SessionFinished(id));
        }

        // prices for everything held, plus the configured universe so the
        // decision source sees what it is allowed to trade
        let mut assets = account.referenced_assets();
        for asset in &self.config.risk.allowed_assets {
            if !assets.contains(asset) {
                assets.push(asset.clone());
            }
        }
        let mut prices = self.fetch_prices(&assets).await?;

        let raw = {
            let timeout = Duration::from_millis(self.config.decision_timeout_ms);
            match tokio::time::timeout(timeout, self.decisions.decide(&account, &prices)).await {
                Ok(result) => result.map_err(EngineError::Decision)?,
                Err(_) => return Err(EngineError::Decision(DecisionError::Timeout)),
            }
        };

        let payload = parser::parse_decision(&raw)?;
        for error in &payload.rejected {
            tracing::warn!(session = %id, %error, "instruction quarantined");
        }

        self.extend_prices(&mut prices, &payload.operations).await?;

        let outcomes = execute_batch(
            &self.config,
            &mut account,
            &payload.operations,
            &prices,
            BatchPolicy::RejectFailing,
            Timestamp::now(),
        )?;

        let result = BatchResult {
            session: id,
            analysis: payload.analysis,
            outcomes,
            parse_errors: payload.rejected,
            cash_after: account.cash,
            equity_after: total_equity(&account, &prices),
        };

        tracing::info!(
            session = %id,
            applied = result.applied_count(),
            rejected = result.rejected_count(),
            equity = %result.equity_after,
            "decision cycle committed"
        );
        self.notifier
            .notify(&notify::format_batch_summary(&result))
            .await;

        Ok(result)
    }

    /// Current view of a session. Runs a risk pass first so the snapshot never
    /// shows a position that should already be gone.
    pub async fn get_status(&self, id: SessionId) -> Result<StatusSnapshot, EngineError> {
        let handle = self.session(id).await?;
        let mut account = handle.lock().await;

        let prices = self.fetch_prices(&account.referenced_assets()).await?;

        if !account.is_finished() {
            let closures = apply_triggers(&self.config, &mut account, &prices, Timestamp::now())?;
            if !closures.is_empty() {
                self.notifier
                    .notify(&notify::format_trigger_summary(&closures))
                    .await;
            }
        }

        Ok(snapshot(&self.config, &account, &prices))
    }

    /// Settle and freeze a session. Idempotent: a finished session returns
    /// its stored report unchanged.
    pub async fn finish_session(&self, id: SessionId) -> Result<SettlementReport, EngineError> {
        let handle = self.session(id).await?;
        let mut account = handle.lock().await;

        if let Some(report) = &account.settlement {
            return Ok(report.clone());
        }

        let prices = self.fetch_prices(&account.referenced_assets()).await?;
        let report = settle_account(&self.config, &mut account, &prices, Timestamp::now())?;

        tracing::info!(session = %id, return_pct = %report.return_pct, "session settled");
        self.notifier
            .notify(&notify::format_settlement(&report))
            .await;

        Ok(report)
    }

    /// One monitor pass over every active session. External failures for one
    /// session never stop the scan of the others.
    pub async fn poll_risk(&self) -> Vec<TriggeredClosure> {
        let handles: Vec<(SessionId, Arc<Mutex<Account>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut all_closures = Vec::new();
        for (id, handle) in handles {
            let mut account = handle.lock().await;
            if account.is_finished() || account.futures.is_empty() {
                continue;
            }

            let prices = match self.fetch_prices(&account.referenced_assets()).await {
                Ok(prices) => prices,
                Err(error) => {
                    tracing::warn!(session = %id, %error, "price fetch failed during risk scan");
                    continue;
                }
            };

            match apply_triggers(&self.config, &mut account, &prices, Timestamp::now()) {
                Ok(closures) => {
                    if !closures.is_empty() {
                        self.notifier
                            .notify(&notify::format_trigger_summary(&closures))
                            .await;
                        all_closures.extend(closures);
                    }
                }
                Err(error) => {
                    tracing::error!(session = %id, %error, "forced closure batch failed");
                }
            }
        }
        all_closures
    }

    /// Periodic risk monitoring at the configured cadence. Runs until the
    /// owning task is dropped.
    pub async fn run_monitor_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.monitor_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.poll_risk().await;
        }
    }

    async fn session(&self, id: SessionId) -> Result<Arc<Mutex<Account>>, EngineError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }

    async fn fetch_prices(&self, assets: &[AssetId]) -> Result<PriceMap, EngineError> {
        if assets.is_empty() {
            return Ok(PriceMap::new());
        }
        let timeout = Duration::from_millis(self.config.price_timeout_ms);
        match tokio::time::timeout(timeout, self.market.prices(assets)).await {
            Ok(result) => result.map_err(EngineError::MarketData),
            Err(_) => Err(EngineError::MarketData(MarketDataError::Timeout)),
        }
    }

    // prices for assets the decision references beyond what is held. an asset
    // the provider does not know dooms only that operation (it will fail
    // validation unpriced); any other failure is cycle-fatal.
    async fn extend_prices(
        &self,
        prices: &mut PriceMap,
        ops: &[Operation],
    ) -> Result<(), EngineError> {
        let timeout = Duration::from_millis(self.config.price_timeout_ms);
        for op in ops {
            let Some(asset) = op.asset() else { continue };
            if prices.contains_key(asset) {
                continue;
            }
            match tokio::time::timeout(timeout, self.market.price(asset)).await {
                Ok(Ok(price)) => {
                    prices.insert(asset.clone(), price);
                }
                Ok(Err(MarketDataError::AssetNotFound(_))) => {
                    tracing::warn!(%asset, "unknown asset in decision, leaving unpriced");
                }
                Ok(Err(error)) => return Err(EngineError::MarketData(error)),
                Err(_) => return Err(EngineError::MarketData(MarketDataError::Timeout)),
            }
        }
        Ok(())
    }
}

// 9.0.1: assemble the read-only status view.
fn snapshot(config: &SimConfig, account: &Account, prices: &PriceMap) -> StatusSnapshot {
    let equity = total_equity(account, prices);
    let pnl = equity.sub(account.initial_capital);
    let pnl_pct = if account.initial_capital.value() > Decimal::ZERO {
        pnl.value() / account.initial_capital.value() * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    let mut spot: Vec<HoldingStatus> = account
        .spot
        .values()
        .map(|holding| {
            let (value, unrealized) = match prices.get(&holding.asset) {
                Some(price) => (holding.market_value(*price), holding.unrealized_pnl(*price)),
                None => (holding.cost_basis, Quote::zero()),
            };
            HoldingStatus {
                asset: holding.asset.clone(),
                quantity: holding.quantity,
                value,
                unrealized_pnl: unrealized,
            }
        })
        .collect();
    spot.sort_by(|a, b| a.asset.as_str().cmp(b.asset.as_str()));

    let mut futures: Vec<PositionStatus> = account
        .futures
        .values()
        .map(|position| {
            let current_price = prices.get(&position.asset).copied();
            let (unrealized, notional) = match current_price {
                Some(price) => (position.unrealized_pnl(price), position.notional(price)),
                None => (Quote::zero(), position.entry_notional()),
            };
            PositionStatus {
                asset: position.asset.clone(),
                side: position.side,
                quantity: position.quantity,
                entry_price: position.entry_price,
                current_price,
                leverage: position.leverage,
                margin: position.margin,
                unrealized_pnl: unrealized,
                margin_ratio: margin_ratio(position.margin, unrealized, notional),
                liquidation_price: liquidation_price(
                    position.side,
                    position.entry_price,
                    position.leverage,
                    config.margin.maintenance_margin_ratio,
                ),
                stop_loss: position.stop_loss,
                take_profit: position.take_profit,
            }
        })
        .collect();
    futures.sort_by(|a, b| a.asset.as_str().cmp(b.asset.as_str()));

    let unrealized_pnl = spot
        .iter()
        .map(|h| h.unrealized_pnl)
        .chain(futures.iter().map(|p| p.unrealized_pnl))
        .sum();

    StatusSnapshot {
        session: account.id,
        status: account.status,
        cash: account.cash,
        equity,
        margin_used: account.margin_used(),
        unrealized_pnl,
        pnl,
        pnl_pct,
        spot,
        futures,
    }
}

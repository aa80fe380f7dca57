// 12.0: the AI decision boundary. the engine hands the source a snapshot of
// the account and current prices and gets back raw text to feed the parser.
// whatever comes back is untrusted until it survives parsing and validation.

use crate::account::Account;
use crate::market_data::PriceMap;
use async_trait::async_trait;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("decision source transport failure: {0}")]
    Transport(String),

    #[error("decision call timed out")]
    Timeout,
}

/// Produces a raw decision payload for one account. Implementations wrap an
/// LLM provider; [`ScriptedDecisions`] replays canned payloads for tests and
/// the demo binary.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(&self, account: &Account, prices: &PriceMap) -> Result<String, DecisionError>;
}

#[async_trait]
impl<T: DecisionSource + ?Sized> DecisionSource for std::sync::Arc<T> {
    async fn decide(&self, account: &Account, prices: &PriceMap) -> Result<String, DecisionError> {
        (**self).decide(account, prices).await
    }
}

// 12.1: canned payload queue. each decide() pops the next script entry.
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    queue: std::sync::Mutex<VecDeque<String>>,
}

impl ScriptedDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: impl Into<String>) {
        self.queue
            .lock()
            .expect("script lock poisoned")
            .push_back(payload.into());
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisions {
    async fn decide(&self, _account: &Account, _prices: &PriceMap) -> Result<String, DecisionError> {
        self.queue
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .ok_or_else(|| DecisionError::Transport("decision script exhausted".to_string()))
    }
}

// 10.0 config.rs: all settings in one place. margin params, portfolio risk
// policy, external call timeouts, monitor cadence.

use crate::margin::MarginParams;
use crate::types::{AssetId, Leverage};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/** 10.1: portfolio-level risk rules applied by the validation pipeline */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    // total futures margin may not exceed this fraction of equity
    pub max_margin_utilization: Decimal,
    // cash after a spend must stay above this fraction of equity
    pub min_cash_reserve: Decimal,
    // assets the AI may buy or open positions in. empty = unrestricted
    pub allowed_assets: Vec<AssetId>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_margin_utilization: dec!(0.25),
            min_cash_reserve: dec!(0.10),
            allowed_assets: Vec::new(),
        }
    }
}

// The complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub margin: MarginParams,
    pub risk: RiskPolicy,
    // timeout applied to the AI decision call
    pub decision_timeout_ms: u64,
    // timeout applied to market data retrieval
    pub price_timeout_ms: u64,
    // cadence of the periodic risk monitor loop
    pub monitor_interval_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            margin: MarginParams::default(),
            risk: RiskPolicy::default(),
            decision_timeout_ms: 30_000,
            price_timeout_ms: 10_000,
            monitor_interval_ms: 5_000,
        }
    }
}

impl SimConfig {
    // Low leverage, fat cash buffer. for cautious simulations
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.margin.max_leverage = Leverage::new(dec!(10)).unwrap();
        config.risk.max_margin_utilization = dec!(0.15);
        config.risk.min_cash_reserve = dec!(0.20);
        config
    }

    // Loose limits for stress scenarios
    pub fn aggressive() -> Self {
        let mut config = Self::default();
        config.margin.max_leverage = Leverage::new(dec!(125)).unwrap();
        config.risk.max_margin_utilization = dec!(0.60);
        config.risk.min_cash_reserve = dec!(0.02);
        config
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // maintenance ratio is the fraction of a position's margin preserved
        // at the liquidation price; it must leave both a buffer and a loss
        if self.margin.maintenance_margin_ratio <= Decimal::ZERO
            || self.margin.maintenance_margin_ratio >= Decimal::ONE
        {
            return Err(ConfigError::InvalidMargin {
                reason: "maintenance margin ratio must be between 0 and 1".to_string(),
            });
        }

        if self.risk.max_margin_utilization <= Decimal::ZERO
            || self.risk.max_margin_utilization > Decimal::ONE
        {
            return Err(ConfigError::InvalidRisk {
                reason: "margin utilization limit must be in (0, 1]".to_string(),
            });
        }

        if self.risk.min_cash_reserve < Decimal::ZERO || self.risk.min_cash_reserve >= Decimal::ONE {
            return Err(ConfigError::InvalidRisk {
                reason: "cash reserve must be in [0, 1)".to_string(),
            });
        }

        if self.decision_timeout_ms == 0 || self.price_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeouts);
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid margin config: {reason}")]
    InvalidMargin { reason: String },

    #[error("invalid risk policy: {reason}")]
    InvalidRisk { reason: String },

    #[error("timeouts must be non-zero")]
    InvalidTimeouts,
}

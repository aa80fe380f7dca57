// 11.0: market data boundary. the engine never talks to a price provider
// directly; it consumes a snapshot of prices fetched through this trait at the
// start of each cycle. failures are typed so a missing asset is never confused
// with a zero price.

use crate::types::{AssetId, Price};
use async_trait::async_trait;
use std::collections::HashMap;

pub type PriceMap = HashMap<AssetId, Price>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    #[error("asset '{0}' not found")]
    AssetNotFound(AssetId),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("network failure: {0}")]
    Network(String),

    #[error("price retrieval timed out")]
    Timeout,
}

/// Source of current prices. Implementations wrap an exchange or aggregator
/// API; the in-crate [`StaticPrices`] backs tests and the demo binary.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn price(&self, asset: &AssetId) -> Result<Price, MarketDataError>;

    async fn prices(&self, assets: &[AssetId]) -> Result<PriceMap, MarketDataError> {
        let mut map = PriceMap::new();
        for asset in assets {
            map.insert(asset.clone(), self.price(asset).await?);
        }
        Ok(map)
    }
}

// sharing a source between the engine and a scenario driver is routine
#[async_trait]
impl<T: MarketDataSource + ?Sized> MarketDataSource for std::sync::Arc<T> {
    async fn price(&self, asset: &AssetId) -> Result<Price, MarketDataError> {
        (**self).price(asset).await
    }

    async fn prices(&self, assets: &[AssetId]) -> Result<PriceMap, MarketDataError> {
        (**self).prices(assets).await
    }
}

// 11.1: fixed price table. prices move only when the test or scenario says so.
#[derive(Debug, Default)]
pub struct StaticPrices {
    prices: std::sync::RwLock<PriceMap>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asset: AssetId, price: Price) {
        self.prices
            .write()
            .expect("price table lock poisoned")
            .insert(asset, price);
    }
}

#[async_trait]
impl MarketDataSource for StaticPrices {
    async fn price(&self, asset: &AssetId) -> Result<Price, MarketDataError> {
        self.prices
            .read()
            .expect("price table lock poisoned")
            .get(asset)
            .copied()
            .ok_or_else(|| MarketDataError::AssetNotFound(asset.clone()))
    }
}

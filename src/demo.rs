// File: src/demo.rs
// In-memory block repository and market feed for running without upstream services

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::block_gateway::BlockRepository;
use crate::data_models::{
    BlockDetail, BlockSummary, FeeTiers, MarketSnapshot, PricePoint, PriceSeries, PriceWindow,
};
use crate::error::FetchError;
use crate::market_gateway::MarketData;

const GENESIS_HEIGHT: u64 = 840_000;
const BLOCK_SPACING_SECS: i64 = 600;
const BASE_PRICE: f64 = 64_000.0;

/// Synthetic chain that grows one block every time the recent list is read
pub struct DemoChain {
    tip: Mutex<u64>,
    epoch: DateTime<Utc>,
}

impl DemoChain {
    pub fn new() -> Self {
        Self {
            tip: Mutex::new(GENESIS_HEIGHT + 24),
            epoch: Utc.timestamp_opt(1_713_000_000, 0).single().unwrap_or_default(),
        }
    }

    fn advance(&self) -> u64 {
        let mut tip = match self.tip.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *tip += 1;
        *tip
    }

    fn current_tip(&self) -> u64 {
        match self.tip.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn summary(&self, height: u64) -> BlockSummary {
        BlockSummary {
            id: (height - GENESIS_HEIGHT) as i64,
            height,
            hash: demo_hash(height),
            time: self.epoch + Duration::seconds((height - GENESIS_HEIGHT) as i64 * BLOCK_SPACING_SECS),
        }
    }

    fn height_of(&self, hash: &str) -> Option<u64> {
        let tip = self.current_tip();
        (GENESIS_HEIGHT..=tip).rev().find(|h| demo_hash(*h) == hash)
    }
}

impl Default for DemoChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Mix the height into a 64-char hex string with leading zeros like a real block hash
fn demo_hash(height: u64) -> String {
    let mut state = height.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03;
    let mut out = String::from("00000000");
    while out.len() < 64 {
        state ^= state >> 33;
        state = state.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        state ^= state >> 29;
        out.push_str(&format!("{:016x}", state));
    }
    out.truncate(64);
    out
}

fn price_at(step: f64) -> f64 {
    BASE_PRICE + 2_500.0 * (step / 5.0).sin() + 900.0 * (step / 1.7).cos()
}

#[async_trait]
impl BlockRepository for DemoChain {
    async fn fetch_recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, FetchError> {
        let tip = self.advance();
        Ok((0..limit as u64)
            .map_while(|offset| tip.checked_sub(offset))
            .filter(|h| *h >= GENESIS_HEIGHT)
            .map(|h| self.summary(h))
            .collect())
    }

    async fn fetch_block_detail(&self, hash: &str) -> Result<BlockDetail, FetchError> {
        if hash.trim().is_empty() {
            return Err(FetchError::InvalidInput("block hash must not be empty".to_string()));
        }
        let height = self
            .height_of(hash)
            .ok_or_else(|| FetchError::NotFound(format!("Block not found: {hash}")))?;

        let summary = self.summary(height);
        let seed = height % 97;
        Ok(BlockDetail {
            previous_hash: demo_hash(height.saturating_sub(1)),
            peer_count: 8 + seed % 5,
            fee_tiers: FeeTiers {
                high: 24 + seed % 11,
                medium: 12 + seed % 7,
                low: 3 + seed % 4,
            },
            price: Some(price_at(height as f64)),
            timestamp: summary.time,
            unconfirmed_count: Some(1_500 + seed * 37),
            volume_24h: Some(2.8e10 + seed as f64 * 1.0e8),
            summary,
        })
    }
}

/// Smooth synthetic price curve
pub struct DemoMarket {
    started_at: DateTime<Utc>,
}

impl DemoMarket {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
        }
    }
}

impl Default for DemoMarket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for DemoMarket {
    async fn fetch_price_series(&self, window: PriceWindow) -> Result<PriceSeries, FetchError> {
        let hours = i64::from(window.days) * 24;
        let points = (0..=hours)
            .step_by(6)
            .map(|h| PricePoint {
                timestamp: self.started_at - Duration::hours(hours - h),
                price_usd: price_at(h as f64 / 6.0),
            })
            .collect();
        Ok(PriceSeries { window, points })
    }

    async fn fetch_market_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
        let step = (Utc::now() - self.started_at).num_seconds() as f64 / 30.0;
        let price = price_at(step);
        let supply = 19_700_000.0;
        Ok(MarketSnapshot {
            price_usd: price,
            market_cap_usd: price * supply,
            volume_24h_usd: 3.1e10,
            price_change_24h_pct: (price - price_at(step - 4.0)) / price * 100.0,
            price_change_7d_pct: (price - price_at(step - 28.0)) / price * 100.0,
            circulating_supply: supply,
            dominance_pct: 52.4,
            ath_usd: 73_750.0,
            captured_at: Utc::now(),
        })
    }
}

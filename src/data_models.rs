// File: src/data_models.rs
// Shared data structures and models for all interfaces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::ViewModel;

/// Block information for the recent-blocks strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub id: i64,
    pub height: u64,
    pub hash: String,
    pub time: DateTime<Utc>,
}

/// Fee estimates per kilobyte recorded with the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeTiers {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// Full block record, fetched lazily for the current selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDetail {
    #[serde(flatten)]
    pub summary: BlockSummary,
    pub previous_hash: String,
    pub peer_count: u64,
    pub fee_tiers: FeeTiers,
    pub price: Option<f64>,
    /// When the record was captured by the ingester
    pub timestamp: DateTime<Utc>,
    pub unconfirmed_count: Option<u64>,
    pub volume_24h: Option<f64>,
}

impl BlockDetail {
    pub fn hash(&self) -> &str {
        &self.summary.hash
    }
}

/// Market statistics snapshot, always complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub volume_24h_usd: f64,
    pub price_change_24h_pct: f64,
    pub price_change_7d_pct: f64,
    pub circulating_supply: f64,
    pub dominance_pct: f64,
    pub ath_usd: f64,
    pub captured_at: DateTime<Utc>,
}

/// Lookback window for the price history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceWindow {
    pub days: u32,
}

impl Default for PriceWindow {
    fn default() -> Self {
        Self { days: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price_usd: f64,
}

/// One {x, y} sample handed to chart renderers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
}

/// Price history over a fixed window, oldest point first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub window: PriceWindow,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Price against unix seconds
    pub fn chart_points(&self) -> Vec<ChartPoint> {
        self.points
            .iter()
            .map(|p| ChartPoint {
                x: p.timestamp.timestamp() as f64,
                y: p.price_usd,
            })
            .collect()
    }

    /// Percent change from the previous sample; the first sample is 0
    pub fn change_points(&self) -> Vec<ChartPoint> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let change = match i.checked_sub(1).map(|j| self.points[j].price_usd) {
                    Some(prev) if prev != 0.0 => (p.price_usd - prev) / prev * 100.0,
                    _ => 0.0,
                };
                ChartPoint {
                    x: p.timestamp.timestamp() as f64,
                    y: change,
                }
            })
            .collect()
    }

    /// (min, max) over the prices, None when empty
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        self.points.iter().map(|p| p.price_usd).fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    /// Request the current view
    GetView,

    /// View snapshot, pushed on every change
    View { data: Box<ViewModel> },

    /// Select a block by hash
    SelectBlock { hash: String },

    /// Trigger an immediate poll
    Refresh,

    /// Error response
    Error { message: String },

    /// Ping/Pong for connection health
    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(prices: &[f64]) -> PriceSeries {
        PriceSeries {
            window: PriceWindow::default(),
            points: prices
                .iter()
                .enumerate()
                .map(|(i, &price_usd)| PricePoint {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 3600, 0).unwrap(),
                    price_usd,
                })
                .collect(),
        }
    }

    #[test]
    fn change_points_are_relative_to_previous_sample() {
        let s = series(&[100.0, 110.0, 99.0]);
        let change = s.change_points();
        assert_eq!(change.len(), 3);
        assert_eq!(change[0].y, 0.0);
        assert!((change[1].y - 10.0).abs() < 1e-9);
        assert!((change[2].y + 10.0).abs() < 1e-9);
        assert_eq!(change[1].x, 1_700_003_600.0);
    }

    #[test]
    fn price_bounds_cover_all_points() {
        assert_eq!(series(&[]).price_bounds(), None);
        assert_eq!(series(&[5.0, 2.0, 9.0]).price_bounds(), Some((2.0, 9.0)));
    }

    #[test]
    fn detail_flattens_summary_fields() {
        let detail = BlockDetail {
            summary: BlockSummary {
                id: 7,
                height: 10,
                hash: "a".into(),
                time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
            previous_hash: "p".into(),
            peer_count: 3,
            fee_tiers: FeeTiers { high: 30, medium: 20, low: 10 },
            price: Some(1.5),
            timestamp: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
            unconfirmed_count: None,
            volume_24h: None,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["hash"], "a");
        assert_eq!(json["height"], 10);
        assert_eq!(json["fee_tiers"]["medium"], 20);
    }
}

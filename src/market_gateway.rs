// File: src/market_gateway.rs
// Market data gateway - CoinGecko-compatible price history and market statistics

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::data_models::{MarketSnapshot, PricePoint, PriceSeries, PriceWindow};
use crate::error::FetchError;
use crate::settings::MarketConfig;

/// Read-only source of price history and market statistics
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_price_series(&self, window: PriceWindow) -> Result<PriceSeries, FetchError>;

    /// Every field is required; partial payloads are rejected
    async fn fetch_market_snapshot(&self) -> Result<MarketSnapshot, FetchError>;
}

pub struct CoinGeckoMarketData {
    client: Client,
    base_url: String,
    coin_id: String,
    symbol: String,
}

impl CoinGeckoMarketData {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            coin_id: config.coin_id.clone(),
            symbol: config.symbol.to_lowercase(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable(format!("{url}: HTTP status {status}")));
        }

        let body = response.bytes().await.map_err(|e| FetchError::transport(url, e))?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        serde_json::from_slice(&body).map_err(|e| FetchError::decode(url, e))
    }

    async fn fetch_coin(&self) -> Result<CoinMarketData, FetchError> {
        let url = format!("{}/coins/{}", self.base_url, self.coin_id);
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
        ];
        let coin: CoinResponse = self.get_json(&url, &query).await?;
        Ok(coin.market_data)
    }

    async fn fetch_dominance(&self) -> Result<f64, FetchError> {
        let url = format!("{}/global", self.base_url);
        let global: GlobalResponse = self.get_json(&url, &[]).await?;
        global
            .data
            .market_cap_percentage
            .get(&self.symbol)
            .copied()
            .ok_or_else(|| {
                FetchError::MalformedResponse(format!(
                    "{url}: market_cap_percentage has no entry for {}",
                    self.symbol
                ))
            })
    }
}

#[async_trait]
impl MarketData for CoinGeckoMarketData {
    async fn fetch_price_series(&self, window: PriceWindow) -> Result<PriceSeries, FetchError> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, self.coin_id);
        let query = [
            ("vs_currency", "usd".to_string()),
            ("days", window.days.to_string()),
        ];
        let chart: MarketChart = self.get_json(&url, &query).await?;

        let mut points = chart
            .prices
            .into_iter()
            .map(|(millis, price_usd)| -> Result<PricePoint, FetchError> {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(millis as i64)
                    .filter(|_| millis.is_finite())
                    .ok_or_else(|| {
                        FetchError::MalformedResponse(format!("{url}: bad timestamp {millis}"))
                    })?;
                Ok(PricePoint { timestamp, price_usd })
            })
            .collect::<Result<Vec<_>, FetchError>>()?;
        points.sort_by_key(|p| p.timestamp);

        Ok(PriceSeries { window, points })
    }

    async fn fetch_market_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
        let (coin, dominance_pct) = futures::try_join!(self.fetch_coin(), self.fetch_dominance())?;

        Ok(MarketSnapshot {
            price_usd: coin.current_price.usd,
            market_cap_usd: coin.market_cap.usd,
            volume_24h_usd: coin.total_volume.usd,
            price_change_24h_pct: coin.price_change_percentage_24h,
            price_change_7d_pct: coin.price_change_percentage_7d,
            circulating_supply: coin.circulating_supply,
            dominance_pct,
            ath_usd: coin.ath.usd,
            captured_at: Utc::now(),
        })
    }
}

#[derive(Deserialize)]
struct MarketChart {
    prices: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct CoinResponse {
    market_data: CoinMarketData,
}

#[derive(Deserialize)]
struct CoinMarketData {
    current_price: UsdQuote,
    market_cap: UsdQuote,
    total_volume: UsdQuote,
    ath: UsdQuote,
    price_change_percentage_24h: f64,
    price_change_percentage_7d: f64,
    circulating_supply: f64,
}

#[derive(Deserialize)]
struct UsdQuote {
    usd: f64,
}

#[derive(Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Deserialize)]
struct GlobalData {
    market_cap_percentage: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn market(server: &MockServer) -> CoinGeckoMarketData {
        CoinGeckoMarketData::new(&MarketConfig {
            base_url: server.uri(),
            coin_id: "bitcoin".to_string(),
            symbol: "BTC".to_string(),
            timeout_secs: 5,
            price_window_days: 30,
        })
        .unwrap()
    }

    fn coin_body() -> serde_json::Value {
        json!({
            "id": "bitcoin",
            "symbol": "btc",
            "market_data": {
                "current_price": { "usd": 64000.0, "eur": 59000.0 },
                "market_cap": { "usd": 1.26e12 },
                "total_volume": { "usd": 3.1e10 },
                "ath": { "usd": 73738.0 },
                "price_change_percentage_24h": -1.25,
                "price_change_percentage_7d": 4.5,
                "circulating_supply": 19_690_000.0
            }
        })
    }

    async fn mount_global(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/global"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "market_cap_percentage": { "btc": 52.4, "eth": 16.9 } }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_snapshot_combines_coin_and_global() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(coin_body()))
            .mount(&server)
            .await;
        mount_global(&server).await;

        let snapshot = market(&server).fetch_market_snapshot().await.unwrap();
        assert_eq!(snapshot.price_usd, 64_000.0);
        assert_eq!(snapshot.market_cap_usd, 1.26e12);
        assert_eq!(snapshot.volume_24h_usd, 3.1e10);
        assert_eq!(snapshot.price_change_7d_pct, 4.5);
        assert_eq!(snapshot.dominance_pct, 52.4);
        assert_eq!(snapshot.ath_usd, 73_738.0);
    }

    #[tokio::test]
    async fn test_missing_market_cap_is_malformed() {
        let server = MockServer::start().await;
        let mut body = coin_body();
        body["market_data"].as_object_mut().unwrap().remove("market_cap");
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        mount_global(&server).await;

        let err = market(&server).fetch_market_snapshot().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert!(err.to_string().contains("market_cap"));
    }

    #[tokio::test]
    async fn test_null_statistic_is_malformed() {
        let server = MockServer::start().await;
        let mut body = coin_body();
        body["market_data"]["price_change_percentage_7d"] = serde_json::Value::Null;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        mount_global(&server).await;

        let err = market(&server).fetch_market_snapshot().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_rate_limited_provider_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = market(&server).fetch_market_snapshot().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_price_series_uses_window_and_sorts_points() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin/market_chart"))
            .and(query_param("vs_currency", "usd"))
            .and(query_param("days", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prices": [[1_711_929_600_000u64, 70_100.5], [1_711_843_200_000u64, 69_702.3]],
                "market_caps": [],
                "total_volumes": []
            })))
            .mount(&server)
            .await;

        let series = market(&server)
            .fetch_price_series(PriceWindow { days: 7 })
            .await
            .unwrap();
        assert_eq!(series.window.days, 7);
        assert_eq!(series.points.len(), 2);
        assert!(series.points[0].timestamp < series.points[1].timestamp);
        assert_eq!(series.points[0].price_usd, 69_702.3);
    }

    #[tokio::test]
    async fn test_truncated_json_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin/market_chart"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"prices\": [[1, 2"))
            .mount(&server)
            .await;

        let err = market(&server)
            .fetch_price_series(PriceWindow::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }
}

// File: src/block_gateway.rs
// Block repository gateway - request/response wrapper over the explorer API

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::data_models::{BlockDetail, BlockSummary, FeeTiers};
use crate::error::FetchError;
use crate::settings::RepositoryConfig;

/// Source of block records. Implementations do no caching.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Most recent blocks first; an empty list is a valid answer
    async fn fetch_recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, FetchError>;

    /// Full record for one block hash
    async fn fetch_block_detail(&self, hash: &str) -> Result<BlockDetail, FetchError>;
}

/// HTTP client for `GET /api/blocks` and `GET /api/blocks/block?hash=`
pub struct HttpBlockRepository {
    client: Client,
    base_url: String,
}

impl HttpBlockRepository {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_payload<T: DeserializeOwned>(
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
        let body = response.bytes().await.map_err(|e| FetchError::transport(url, e))?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        if status == StatusCode::OK {
            let envelope: SuccessEnvelope<T> =
                serde_json::from_slice(&body).map_err(|e| FetchError::decode(url, e))?;
            return Ok(envelope.data);
        }

        let message = error_message(&body).unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::NOT_FOUND => FetchError::NotFound(message),
            _ => FetchError::UpstreamUnavailable(format!("{url}: {status}: {message}")),
        })
    }
}

#[async_trait]
impl BlockRepository for HttpBlockRepository {
    async fn fetch_recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, FetchError> {
        let url = format!("{}/api/blocks", self.base_url);
        let rows: Vec<BlockRow> = self.get_payload(&url, &[("limit", limit.to_string())]).await?;
        Ok(rows.into_iter().map(BlockRow::into_summary).collect())
    }

    async fn fetch_block_detail(&self, hash: &str) -> Result<BlockDetail, FetchError> {
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(FetchError::InvalidInput("block hash is required".to_string()));
        }

        let url = format!("{}/api/blocks/block", self.base_url);
        let row: BlockDetailRow = self.get_payload(&url, &[("hash", hash.to_string())]).await?;
        if row.hash != hash {
            return Err(FetchError::MalformedResponse(format!(
                "{url}: requested block {hash} but received {}",
                row.hash
            )));
        }
        Ok(row.into_detail())
    }
}

/// `{ data: .. }` from the detail route, `{ message: .. }` from the list route
#[derive(Deserialize)]
struct SuccessEnvelope<T> {
    #[serde(alias = "message")]
    data: T,
}

/// Failure text from `{ error }` or the list route's `{ message }`
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[derive(Deserialize)]
struct BlockRow {
    #[serde(deserialize_with = "lenient::i64")]
    id: i64,
    #[serde(deserialize_with = "lenient::u64")]
    height: u64,
    hash: String,
    time: DateTime<Utc>,
}

impl BlockRow {
    fn into_summary(self) -> BlockSummary {
        BlockSummary {
            id: self.id,
            height: self.height,
            hash: self.hash,
            time: self.time,
        }
    }
}

#[derive(Deserialize)]
struct BlockDetailRow {
    #[serde(deserialize_with = "lenient::i64")]
    id: i64,
    #[serde(deserialize_with = "lenient::u64")]
    height: u64,
    hash: String,
    time: DateTime<Utc>,
    previous_hash: String,
    #[serde(deserialize_with = "lenient::u64")]
    peer_count: u64,
    #[serde(deserialize_with = "lenient::u64")]
    high_fee_per_kb: u64,
    #[serde(deserialize_with = "lenient::u64")]
    medium_fee_per_kb: u64,
    #[serde(deserialize_with = "lenient::u64")]
    low_fee_per_kb: u64,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    price: Option<f64>,
    timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    unconfirmed_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    volume_24h: Option<f64>,
}

impl BlockDetailRow {
    fn into_detail(self) -> BlockDetail {
        BlockDetail {
            summary: BlockSummary {
                id: self.id,
                height: self.height,
                hash: self.hash,
                time: self.time,
            },
            previous_hash: self.previous_hash,
            peer_count: self.peer_count,
            fee_tiers: FeeTiers {
                high: self.high_fee_per_kb,
                medium: self.medium_fee_per_kb,
                low: self.low_fee_per_kb,
            },
            price: self.price,
            timestamp: self.timestamp,
            unconfirmed_count: self.unconfirmed_count,
            volume_24h: self.volume_24h,
        }
    }
}

/// Postgres BIGINT and NUMERIC columns come through JSON as strings
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(serde_json::Number),
        Text(String),
    }

    impl NumOrText {
        fn to_u64<E: Error>(&self) -> Result<u64, E> {
            match self {
                NumOrText::Num(n) => n
                    .as_u64()
                    .ok_or_else(|| E::custom(format!("expected unsigned integer, got {n}"))),
                NumOrText::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("expected unsigned integer, got {s:?}"))),
            }
        }

        fn to_i64<E: Error>(&self) -> Result<i64, E> {
            match self {
                NumOrText::Num(n) => n
                    .as_i64()
                    .ok_or_else(|| E::custom(format!("expected integer, got {n}"))),
                NumOrText::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("expected integer, got {s:?}"))),
            }
        }

        fn to_f64<E: Error>(&self) -> Result<f64, E> {
            let value = match self {
                NumOrText::Num(n) => n.as_f64(),
                NumOrText::Text(s) => s.trim().parse().ok(),
            };
            value
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| E::custom("expected finite number"))
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        NumOrText::deserialize(d)?.to_u64()
    }

    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        NumOrText::deserialize(d)?.to_i64()
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<NumOrText>::deserialize(d)?.map(|v| v.to_u64()).transpose()
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Option::<NumOrText>::deserialize(d)?.map(|v| v.to_f64()).transpose()
    }
}

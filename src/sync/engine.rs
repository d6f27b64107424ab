// File: src/sync/engine.rs
// Synchronous reducer behind the synchronizer: issues tagged requests and
// applies their completions in request order

use tracing::{debug, info, warn};

use super::resource::{Resource, Token};
use super::view_model::{ResourceStatus, SyncStatus, ViewModel, merge_recent_blocks};
use crate::data_models::{BlockDetail, BlockSummary, MarketSnapshot, PriceSeries, PriceWindow};
use crate::error::{ErrorKind, FetchError};

/// Knobs the engine needs from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub block_limit: usize,
    pub price_window: PriceWindow,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            block_limit: 10,
            price_window: PriceWindow::default(),
        }
    }
}

/// A gateway call the runtime should perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    RecentBlocks { token: Token, limit: usize },
    BlockDetail { token: Token, hash: String },
    Market { token: Token },
    PriceSeries { token: Token, window: PriceWindow },
}

/// Result of a gateway call, tagged with the request it answers
#[derive(Debug, Clone)]
pub enum Completion {
    RecentBlocks {
        token: Token,
        result: Result<Vec<BlockSummary>, FetchError>,
    },
    BlockDetail {
        token: Token,
        hash: String,
        result: Result<BlockDetail, FetchError>,
    },
    Market {
        token: Token,
        result: Result<MarketSnapshot, FetchError>,
    },
    PriceSeries {
        token: Token,
        result: Result<PriceSeries, FetchError>,
    },
}

/// Effect of applying a completion
#[derive(Debug, Default)]
pub struct Applied {
    pub changed: bool,
    /// Fetch triggered by the change (auto-selection of the newest block)
    pub follow_up: Option<FetchRequest>,
}

pub struct SyncEngine {
    settings: SyncSettings,
    next_token: u64,
    revision: u64,
    recent_blocks: Resource<Vec<BlockSummary>>,
    selected_hash: Option<String>,
    detail: Resource<BlockDetail>,
    /// Hash whose response last settled `detail`
    detail_settled_for: Option<String>,
    market: Resource<MarketSnapshot>,
    price_series: Resource<PriceSeries>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            next_token: 0,
            revision: 0,
            recent_blocks: Resource::default(),
            selected_hash: None,
            detail: Resource::default(),
            detail_settled_for: None,
            market: Resource::default(),
            price_series: Resource::default(),
        }
    }

    pub fn selected_hash(&self) -> Option<&str> {
        self.selected_hash.as_deref()
    }

    #[cfg(test)]
    pub fn detail(&self) -> &Resource<BlockDetail> {
        &self.detail
    }

    fn issue(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// One poll tick: refresh the polled axes and retry a detail fetch
    /// that is missing or failed with a retryable kind
    pub fn poll(&mut self) -> Vec<FetchRequest> {
        let mut requests = Vec::with_capacity(4);

        let token = self.issue();
        self.recent_blocks.begin(token);
        requests.push(FetchRequest::RecentBlocks {
            token,
            limit: self.settings.block_limit,
        });

        let token = self.issue();
        self.market.begin(token);
        requests.push(FetchRequest::Market { token });

        let token = self.issue();
        self.price_series.begin(token);
        requests.push(FetchRequest::PriceSeries {
            token,
            window: self.settings.price_window,
        });

        if let Some(request) = self.retry_detail() {
            requests.push(request);
        }

        self.touch();
        requests
    }

    fn retry_detail(&mut self) -> Option<FetchRequest> {
        let hash = self.selected_hash.clone()?;
        if self.detail.is_loading() {
            return None;
        }

        let settled_here = self.detail_settled_for.as_deref() == Some(hash.as_str());
        let retryable = self
            .detail
            .last_error()
            .is_some_and(|e| e.kind.is_retryable());
        if settled_here && !retryable {
            return None;
        }

        debug!("Re-requesting detail for {}", hash);
        Some(self.request_detail(hash))
    }

    fn request_detail(&mut self, hash: String) -> FetchRequest {
        let token = self.issue();
        self.detail.begin(token);
        FetchRequest::BlockDetail { token, hash }
    }

    /// Point the selection at `hash` and request its detail.
    /// Blank hashes are ignored.
    pub fn select_block(&mut self, hash: &str) -> Option<FetchRequest> {
        let hash = hash.trim();
        if hash.is_empty() {
            return None;
        }

        self.selected_hash = Some(hash.to_string());
        let request = self.request_detail(hash.to_string());
        self.touch();
        Some(request)
    }

    pub fn apply(&mut self, completion: Completion) -> Applied {
        let mut applied = Applied::default();

        match completion {
            Completion::RecentBlocks { token, result } => {
                let result = result.map(|blocks| merge_recent_blocks(blocks, self.settings.block_limit));
                log_failure("recent blocks", &result);
                if !self.recent_blocks.resolve(token, result) {
                    debug!("Discarding superseded recent-blocks response");
                    return applied;
                }
                applied.changed = true;

                if self.selected_hash.is_none() {
                    let newest = self
                        .recent_blocks
                        .value()
                        .and_then(|blocks| blocks.first())
                        .map(|b| b.hash.clone());
                    if let Some(hash) = newest {
                        info!("Auto-selecting newest block {}", hash);
                        applied.follow_up = self.select_block(&hash);
                    }
                }
            }

            Completion::BlockDetail { token, hash, result } => {
                if self.selected_hash.as_deref() != Some(hash.as_str()) || !self.detail.accepts(token) {
                    debug!("Discarding stale detail response for {}", hash);
                    return applied;
                }
                log_failure("block detail", &result);
                self.detail.resolve(token, result);
                self.detail_settled_for = Some(hash);
                applied.changed = true;
            }

            Completion::Market { token, result } => {
                log_failure("market snapshot", &result);
                if !self.market.resolve(token, result) {
                    debug!("Discarding superseded market response");
                    return applied;
                }
                applied.changed = true;
            }

            Completion::PriceSeries { token, result } => {
                log_failure("price series", &result);
                if !self.price_series.resolve(token, result) {
                    debug!("Discarding superseded price-series response");
                    return applied;
                }
                applied.changed = true;
            }
        }

        self.touch();
        applied
    }

    /// Invalidate every outstanding token. Late responses become no-ops.
    pub fn invalidate_in_flight(&mut self) -> bool {
        let mut changed = self.recent_blocks.cancel();
        changed |= self.detail.cancel();
        changed |= self.market.cancel();
        changed |= self.price_series.cancel();
        if changed {
            self.touch();
        }
        changed
    }

    pub fn snapshot(&self) -> ViewModel {
        let selected_detail = self
            .detail
            .value()
            .filter(|d| self.selected_hash.as_deref() == Some(d.hash()))
            .cloned();

        let detail_status = if self.detail.is_loading()
            || self.detail_settled_for.is_some() && self.detail_settled_for == self.selected_hash
        {
            ResourceStatus::of(&self.detail)
        } else {
            ResourceStatus::idle()
        };

        ViewModel {
            revision: self.revision,
            recent_blocks: self.recent_blocks.value().cloned().unwrap_or_default(),
            selected_hash: self.selected_hash.clone(),
            selected_detail,
            market: self.market.value().cloned(),
            price_series: self.price_series.value().cloned(),
            status: SyncStatus {
                recent_blocks: ResourceStatus::of(&self.recent_blocks),
                selected_detail: detail_status,
                market: ResourceStatus::of(&self.market),
                price_series: ResourceStatus::of(&self.price_series),
            },
        }
    }
}

fn log_failure<T>(what: &str, result: &Result<T, FetchError>) {
    let Err(err) = result else {
        return;
    };
    match err.kind() {
        ErrorKind::MalformedResponse => warn!("Schema violation in {} response: {}", what, err),
        ErrorKind::NotFound => info!("No record for {}: {}", what, err),
        _ => warn!("Fetching {} failed: {}", what, err),
    }
}

// File: src/sync/view_model.rs
// Read-only snapshot handed to the presentation layer

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::{ErrorNotice, Phase, Resource};
use crate::data_models::{BlockDetail, BlockSummary, MarketSnapshot, PriceSeries};

/// Fetch status of one sub-resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub phase: Phase,
    pub loading: bool,
    pub last_error: Option<ErrorNotice>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResourceStatus {
    pub fn of<T>(resource: &Resource<T>) -> Self {
        Self {
            phase: resource.phase(),
            loading: resource.is_loading(),
            last_error: resource.last_error().cloned(),
            updated_at: resource.updated_at(),
        }
    }

    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            loading: false,
            last_error: None,
            updated_at: None,
        }
    }

    /// Showing data that the latest attempt failed to refresh
    pub fn is_stale(&self) -> bool {
        self.phase == Phase::Failed
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::Ready | Phase::Failed)
    }
}

impl Default for ResourceStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub recent_blocks: ResourceStatus,
    pub selected_detail: ResourceStatus,
    pub market: ResourceStatus,
    pub price_series: ResourceStatus,
}

/// Consistent view of everything the synchronizer knows.
///
/// `selected_detail`, when present, always belongs to `selected_hash`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    /// Bumped on every change
    pub revision: u64,
    pub recent_blocks: Vec<BlockSummary>,
    pub selected_hash: Option<String>,
    pub selected_detail: Option<BlockDetail>,
    pub market: Option<MarketSnapshot>,
    pub price_series: Option<PriceSeries>,
    pub status: SyncStatus,
}

impl ViewModel {
    /// Index of the selection within `recent_blocks`, if it is listed
    pub fn selected_index(&self) -> Option<usize> {
        let hash = self.selected_hash.as_deref()?;
        self.recent_blocks.iter().position(|b| b.hash == hash)
    }

    /// Every polled axis has answered at least once and the selection
    /// (if any) has a settled detail
    pub fn is_settled(&self) -> bool {
        let detail_settled = self.selected_hash.is_none() || self.status.selected_detail.is_settled();
        self.status.recent_blocks.is_settled()
            && self.status.market.is_settled()
            && self.status.price_series.is_settled()
            && detail_settled
    }
}

/// Order most-recent-first, drop repeated hashes, keep at most `limit`
pub fn merge_recent_blocks(mut fetched: Vec<BlockSummary>, limit: usize) -> Vec<BlockSummary> {
    fetched.sort_by(|a, b| b.height.cmp(&a.height).then(b.id.cmp(&a.id)));

    let mut seen = HashSet::with_capacity(fetched.len());
    fetched.retain(|block| seen.insert(block.hash.clone()));
    fetched.truncate(limit);
    fetched
}

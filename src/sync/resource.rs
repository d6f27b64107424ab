// File: src/sync/resource.rs
// Per sub-resource fetch state: Idle -> Loading -> {Ready, Failed}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FetchError};

/// Request tag. Issued from one counter per engine, so later requests
/// always carry larger tokens, including across stop/start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Last failure recorded for a sub-resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One independently fetched slice of the view model.
///
/// `value` survives failures and new requests (stale-while-revalidate);
/// only a successful response replaces it.
#[derive(Debug, Clone)]
pub struct Resource<T> {
    phase: Phase,
    value: Option<T>,
    last_error: Option<ErrorNotice>,
    pending: Option<Token>,
    updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            value: None,
            last_error: None,
            pending: None,
            updated_at: None,
        }
    }
}

impl<T> Resource<T> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn last_error(&self) -> Option<&ErrorNotice> {
        self.last_error.as_ref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    /// Issue a request; any outstanding one is superseded
    pub fn begin(&mut self, token: Token) {
        self.pending = Some(token);
        self.phase = Phase::Loading;
    }

    /// True only for the most recently issued, still outstanding token
    pub fn accepts(&self, token: Token) -> bool {
        self.pending == Some(token)
    }

    /// Apply a response. Returns false when the token was superseded or
    /// invalidated, in which case nothing changes.
    pub fn resolve(&mut self, token: Token, result: Result<T, FetchError>) -> bool {
        if !self.accepts(token) {
            return false;
        }

        self.pending = None;
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.last_error = None;
                self.phase = Phase::Ready;
                self.updated_at = Some(Utc::now());
            }
            Err(err) => {
                self.fail(&err);
            }
        }
        true
    }

    fn fail(&mut self, err: &FetchError) {
        self.last_error = Some(ErrorNotice {
            kind: err.kind(),
            message: err.to_string(),
            at: Utc::now(),
        });
        self.phase = Phase::Failed;
    }

    /// Drop the outstanding request, falling back to the last settled phase.
    /// Returns true if a request was outstanding.
    pub fn cancel(&mut self) -> bool {
        if self.pending.take().is_none() {
            return false;
        }
        self.phase = if self.last_error.is_some() {
            Phase::Failed
        } else if self.value.is_some() {
            Phase::Ready
        } else {
            Phase::Idle
        };
        true
    }
}

//! Work items, per-item results and the batch report

use crate::identifier::Identifier;
use crate::{ErrorKind, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One identifier to fetch, consumed exactly once by exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    id: Identifier,
}

impl WorkItem {
    /// Create a work item for a normalized identifier
    pub fn new(id: Identifier) -> Self {
        Self { id }
    }

    /// Identifier to fetch
    pub fn id(&self) -> &str {
        self.id.as_str()
    }
}

/// Fetch outcome of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// The record was fetched
    Success,
    /// The record could not be fetched
    Error,
}

impl ItemStatus {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Success => "success",
            ItemStatus::Error => "error",
        }
    }
}

/// Outcome of one item
///
/// `status` reflects the fetch only. A record that was fetched but failed to
/// persist keeps `Success` and carries `error_kind = PersistFailed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Normalized identifier
    pub id: String,
    /// Fetch outcome
    pub status: ItemStatus,
    /// The fetched record, on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    /// Failure classification, or `PersistFailed` as a warning on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human readable detail for `error_kind`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the item resolved
    pub completed_at: DateTime<Utc>,
}

impl ItemResult {
    /// A fetched record
    pub fn success(id: impl Into<String>, record: Record) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Success,
            record: Some(record),
            error_kind: None,
            message: None,
            completed_at: Utc::now(),
        }
    }

    /// A failed fetch
    pub fn failure(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Error,
            record: None,
            error_kind: Some(kind),
            message: Some(message.into()),
            completed_at: Utc::now(),
        }
    }

    /// Result for an item no worker resolved before the batch ended
    pub fn unresolved(id: impl Into<String>, cause: ErrorKind) -> Self {
        let message = match cause {
            ErrorKind::Timeout => "batch deadline expired before the item was processed",
            _ => "batch cancelled before the item was processed",
        };
        Self::failure(id, cause, message)
    }

    /// Copy of this result carrying a persistence warning
    pub fn with_persist_warning(&self, message: impl Into<String>) -> Self {
        Self {
            error_kind: Some(ErrorKind::PersistFailed),
            message: Some(message.into()),
            ..self.clone()
        }
    }

    /// Whether the fetch succeeded
    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// Lifecycle of a single work item
///
/// ```text
/// Pending -> RateLimited -> Fetching -> Success
///                              |  ^
///                              v  |
///                 Retrying -> RateLimited
///                              |
///                              v
///                      PermanentFailure
/// ```
///
/// Any non-terminal state may move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// Accepted, not yet started
    Pending,
    /// Waiting for a rate limit token
    RateLimited,
    /// A fetch attempt is in flight
    Fetching,
    /// Waiting out a backoff delay
    Retrying,
    /// Fetched
    Success,
    /// Failed with no further attempts
    PermanentFailure,
    /// The batch ended before the item resolved
    Cancelled,
}

impl ItemState {
    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Success | ItemState::PermanentFailure | ItemState::Cancelled
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(self, next: ItemState) -> Result<ItemState, InvalidTransition> {
        use ItemState::*;

        let allowed = match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Pending) => false,
            (_, Cancelled) => true,
            (Pending, RateLimited) => true,
            (RateLimited, Fetching) => true,
            (Fetching, Success | Retrying | PermanentFailure) => true,
            (Retrying, RateLimited | PermanentFailure) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

/// A lifecycle transition that is not allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid item state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Current state
    pub from: ItemState,
    /// Rejected target state
    pub to: ItemState,
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// One result per normalized identifier, sorted by id
    pub results: Vec<ItemResult>,
    /// Number of normalized identifiers
    pub total: usize,
    /// Items whose fetch succeeded
    pub successful: usize,
    /// Items whose fetch failed
    pub failed: usize,
    /// Successful items that could not be persisted
    pub persist_failures: usize,
    /// Failure messages, capped
    pub errors: Vec<String>,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the batch finished
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    /// Build a report from resolved results
    ///
    /// Sorts by id and derives every counter from the results, keeping at most
    /// `max_error_detail` messages.
    pub fn from_results(
        mut results: Vec<ItemResult>,
        started_at: DateTime<Utc>,
        max_error_detail: usize,
    ) -> Self {
        results.sort_by(|a, b| a.id.cmp(&b.id));

        let successful = results.iter().filter(|r| r.is_success()).count();
        let persist_failures = results
            .iter()
            .filter(|r| r.is_success() && r.error_kind == Some(ErrorKind::PersistFailed))
            .count();

        let errors = results
            .iter()
            .filter(|r| !r.is_success())
            .take(max_error_detail)
            .map(|r| {
                format!(
                    "{}: {}: {}",
                    r.id,
                    r.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                    r.message.as_deref().unwrap_or("")
                )
            })
            .collect();

        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            persist_failures,
            errors,
            started_at,
            completed_at: Utc::now(),
            results,
        }
    }

    /// Check the counting invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.total != self.results.len() {
            return Err(format!(
                "total ({}) does not match result count ({})",
                self.total,
                self.results.len()
            ));
        }

        if self.successful + self.failed != self.total {
            return Err(format!(
                "successful ({}) + failed ({}) != total ({})",
                self.successful, self.failed, self.total
            ));
        }

        if self.results.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err("results are not strictly sorted by id".to_string());
        }

        Ok(())
    }

    /// Wall time of the batch
    pub fn duration(&self) -> Duration {
        (self.completed_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Result for one identifier
    pub fn result_for(&self, id: &str) -> Option<&ItemResult> {
        self.results
            .binary_search_by(|r| r.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.results[idx])
    }
}

//! Core data structures for page reviews
//!
//! A [`Review`] is one audit run over one page. It owns the ordered
//! [`Fact`]s produced by facters and the ordered [`Violation`]s produced by
//! validators; both are frozen once the review reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::error::ReviewError;

/// A named datum extracted about a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Definition key, e.g. `total.requests.js`
    pub key: String,

    /// Extracted value
    pub value: serde_json::Value,

    /// Unit from the definition (e.g. "bytes"), if any
    pub unit: Option<String>,

    /// Category from the definition
    pub category: String,
}

/// A scored finding keyed by a validator definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Definition key, e.g. `title.missing`
    pub key: String,

    /// Offending value (URL list, measured length, ...)
    pub value: serde_json::Value,

    /// Penalty points
    pub points: u32,
}

/// Review lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Created,
    FactsRunning,
    FactsDone,
    ValidatorsRunning,
    Completed,
    Failed,
}

impl ReviewStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_advance_to(&self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, next),
            (Created, FactsRunning)
                | (Created, Failed)
                | (FactsRunning, FactsDone)
                | (FactsDone, ValidatorsRunning)
                | (ValidatorsRunning, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::FactsRunning => "FACTS_RUNNING",
            Self::FactsDone => "FACTS_DONE",
            Self::ValidatorsRunning => "VALIDATORS_RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit run over one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Review identifier
    pub id: Uuid,

    /// Page under review
    pub url: String,

    /// Facts in emission order
    pub facts: Vec<Fact>,

    /// Violations in emission order
    pub violations: Vec<Violation>,

    /// Sum of violation points
    pub score: u64,

    /// Current status
    pub status: ReviewStatus,

    /// Why the review failed, if it did
    pub failure: Option<String>,

    /// When the review was created
    pub created_at: DateTime<Utc>,

    /// When the review reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Create a review in the CREATED state
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            facts: Vec::new(),
            violations: Vec::new(),
            score: 0,
            status: ReviewStatus::Created,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to the next status
    pub fn advance(&mut self, next: ReviewStatus) -> Result<(), ReviewError> {
        if !self.status.can_advance_to(next) {
            return Err(ReviewError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the review FAILED with a reason
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ReviewError> {
        self.advance(ReviewStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Recompute the total score from the recorded violations
    pub fn compute_score(&mut self) -> u64 {
        self.score = self.violations.iter().map(|v| u64::from(v.points)).sum();
        self.score
    }

    /// First fact recorded under `key`
    pub fn fact(&self, key: &str) -> Option<&Fact> {
        self.facts.iter().find(|f| f.key == key)
    }

    /// Violations recorded under `key`
    pub fn violations_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations.iter().filter(move |v| v.key == key)
    }
}

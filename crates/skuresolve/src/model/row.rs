//! Job rows: one supplier SKU per row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a single row.
///
/// Transitions only move forward: `queued → running → terminal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Queued,
    Running,
    ResolvedConfident,
    ResolvedNeedsReview,
    Unresolved,
    Error,
}

impl RowStatus {
    pub const TERMINAL: [RowStatus; 4] = [
        RowStatus::ResolvedConfident,
        RowStatus::ResolvedNeedsReview,
        RowStatus::Unresolved,
        RowStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Queued => "queued",
            RowStatus::Running => "running",
            RowStatus::ResolvedConfident => "resolved_confident",
            RowStatus::ResolvedNeedsReview => "resolved_needs_review",
            RowStatus::Unresolved => "unresolved",
            RowStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RowStatus::Queued | RowStatus::Running)
    }

    /// The only status a row may be in before moving to `self`.
    pub fn predecessor(&self) -> Option<RowStatus> {
        match self {
            RowStatus::Queued => None,
            RowStatus::Running => Some(RowStatus::Queued),
            _ => Some(RowStatus::Running),
        }
    }

    pub fn can_transition_to(&self, next: RowStatus) -> bool {
        next.predecessor() == Some(*self)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RowStatus::Queued),
            "running" => Ok(RowStatus::Running),
            "resolved_confident" => Ok(RowStatus::ResolvedConfident),
            "resolved_needs_review" => Ok(RowStatus::ResolvedNeedsReview),
            "unresolved" => Ok(RowStatus::Unresolved),
            "error" => Ok(RowStatus::Error),
            other => Err(format!("unknown row status '{}'", other)),
        }
    }
}

/// Why a row ended in `error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The resolver failed or returned an unusable answer.
    Resolver,
    /// The resolver answered but the result could not be recorded.
    Store,
    /// A previous driver died while the row was running.
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Resolver => "resolver",
            ErrorKind::Store => "store",
            ErrorKind::Interrupted => "interrupted",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolver" => Ok(ErrorKind::Resolver),
            "store" => Ok(ErrorKind::Store),
            "interrupted" => Ok(ErrorKind::Interrupted),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

/// One possible match offered by the resolver when it is not confident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<String>,
}

impl Candidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            score: None,
            matched_by: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Position of a row in its job's creation order.
///
/// Backed by the store's monotonically increasing sequence, so it stays
/// valid while rows change status underneath a paging loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowCursor(pub i64);

/// Identifying fields of a row to be submitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewRow {
    pub supplier_name: String,
    pub supplier_key: String,
    pub sku: String,
    #[serde(default)]
    pub ndc_item_code: Option<String>,
    pub product_name: String,
    pub brand_name: String,
}

/// A persisted row with its resolution outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
    pub id: String,
    /// Creation-order sequence number, used as the paging cursor.
    pub seq: i64,
    pub job_id: String,
    pub supplier_name: String,
    pub supplier_key: String,
    pub sku: String,
    pub ndc_item_code: Option<String>,
    pub product_name: String,
    pub brand_name: String,
    pub status: RowStatus,
    pub resolved_url: Option<String>,
    pub resolved_domain: Option<String>,
    pub confidence: Option<f64>,
    pub matched_by: Option<String>,
    pub reasons: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    pub fn cursor(&self) -> RowCursor {
        RowCursor(self.seq)
    }
}

//! Contract with the external resolution capability.
//!
//! The engine never looks inside a resolver: it hands over one row's
//! identifying fields and gets back a classification, or an error.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Candidate, JobRow, RowStatus};

/// Identifying fields sent to the resolver for one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveInput {
    pub tenant_id: String,
    pub supplier_name: String,
    pub supplier_key: String,
    pub sku: String,
    pub ndc_item_code: Option<String>,
    pub product_name: String,
    pub brand_name: String,
}

impl ResolveInput {
    pub fn from_row(tenant_id: &str, row: &JobRow) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            supplier_name: row.supplier_name.clone(),
            supplier_key: row.supplier_key.clone(),
            sku: row.sku.clone(),
            ndc_item_code: row.ndc_item_code.clone(),
            product_name: row.product_name.clone(),
            brand_name: row.brand_name.clone(),
        }
    }
}

/// What the resolver concluded about one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    ResolvedConfident {
        resolved_url: String,
        confidence: f64,
        matched_by: String,
        #[serde(default)]
        signals: Option<Vec<String>>,
    },
    ResolvedNeedsReview {
        #[serde(default)]
        candidates: Vec<Candidate>,
    },
    Unresolved {
        #[serde(default)]
        candidates: Vec<Candidate>,
    },
}

impl ResolutionResult {
    pub fn status(&self) -> RowStatus {
        match self {
            ResolutionResult::ResolvedConfident { .. } => RowStatus::ResolvedConfident,
            ResolutionResult::ResolvedNeedsReview { .. } => RowStatus::ResolvedNeedsReview,
            ResolutionResult::Unresolved { .. } => RowStatus::Unresolved,
        }
    }
}

/// Failures raised by a resolver. All of them end the row in `error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),

    #[error("resolver failed: {0}")]
    Failed(String),

    #[error("resolver returned an unusable result: {0}")]
    Unusable(String),

    #[error("resolver panicked: {0}")]
    Panicked(String),
}

/// Maps supplier identifying fields to a canonical product URL.
///
/// Implementations must be safe to call from several threads at once; the
/// engine may resolve rows of one page in parallel.
pub trait Resolver: Send + Sync {
    fn resolve(&self, input: &ResolveInput) -> Result<ResolutionResult, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&ResolveInput) -> Result<ResolutionResult, ResolveError> + Send + Sync,
{
    fn resolve(&self, input: &ResolveInput) -> Result<ResolutionResult, ResolveError> {
        self(input)
    }
}

/// Extracts the registrable host of a URL: lowercased, without scheme,
/// credentials, port or a leading `www.` label (kept when it is followed
/// by a bare top-level domain, as in `www.com`).
///
/// Returns `None` when the URL has no host.
pub fn resolved_domain(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let rest = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed.strip_prefix("//").unwrap_or(trimmed),
    };

    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    let host = if let Some(stripped) = host_port.strip_prefix('[') {
        // IPv6 literal
        stripped.split(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = match host.strip_prefix("www.") {
        Some(rest) if rest.contains('.') => rest,
        _ => host.as_str(),
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some(host.to_string())
}

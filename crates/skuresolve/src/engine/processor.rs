use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use super::retry::RetryPolicy;
use crate::error::EngineError;
use crate::model::{ErrorKind, JobRow, RowStatus};
use crate::resolver::{resolved_domain, ResolutionResult, ResolveError, ResolveInput, Resolver};
use crate::store::{RecordStore, RowUpdate};

/// Terminal state a processed row ended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row_id: String,
    pub status: RowStatus,
    pub error_kind: Option<ErrorKind>,
}

/// Drives a single row from `queued` to a terminal status.
pub struct RowProcessor {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn Resolver>,
    retry: RetryPolicy,
}

impl RowProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn Resolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            retry,
        }
    }

    /// Resolves one queued row and records the outcome.
    ///
    /// Resolver failures never escape: they end the row in `error`. An `Err`
    /// means the store could not record anything for the row, even after
    /// retries, and the run has to stop.
    pub fn process_row(&self, tenant_id: &str, row: &JobRow) -> Result<RowOutcome, EngineError> {
        let _row_span = info_span!("row", row_id = %row.id, sku = %row.sku).entered();

        self.retry.run("mark row running", || {
            self.store.update_row(&row.id, &RowUpdate::running())
        })?;

        let input = ResolveInput::from_row(tenant_id, row);
        let update = match self.call_resolver(&input).and_then(map_resolution) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Resolver failed");
                RowUpdate::error(ErrorKind::Resolver, e.to_string())
            }
        };

        match self
            .retry
            .run("record row result", || self.store.update_row(&row.id, &update))
        {
            Ok(()) => {
                debug!(status = %update.status, "Row finished");
                Ok(RowOutcome {
                    row_id: row.id.clone(),
                    status: update.status,
                    error_kind: update.error_kind,
                })
            }
            Err(e) => {
                warn!(error = %e, "Could not record row result, marking row as errored");
                let fallback =
                    RowUpdate::error(ErrorKind::Store, format!("failed to record result: {}", e));
                self.retry.run("record row store failure", || {
                    self.store.update_row(&row.id, &fallback)
                })?;
                Ok(RowOutcome {
                    row_id: row.id.clone(),
                    status: RowStatus::Error,
                    error_kind: Some(ErrorKind::Store),
                })
            }
        }
    }

    fn call_resolver(&self, input: &ResolveInput) -> Result<ResolutionResult, ResolveError> {
        match catch_unwind(AssertUnwindSafe(|| self.resolver.resolve(input))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ResolveError::Panicked(message))
            }
        }
    }
}

/// Turns a resolver answer into the row write that records it.
///
/// Answers that break the resolver contract are rejected as `Unusable`.
pub(crate) fn map_resolution(result: ResolutionResult) -> Result<RowUpdate, ResolveError> {
    let mut update = RowUpdate::running();
    update.status = result.status();

    match result {
        ResolutionResult::ResolvedConfident {
            resolved_url,
            confidence,
            matched_by,
            signals,
        } => {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(ResolveError::Unusable(format!(
                    "confidence {} outside 0..=1",
                    confidence
                )));
            }
            let domain = resolved_domain(&resolved_url).ok_or_else(|| {
                ResolveError::Unusable(format!("resolved url '{}' has no host", resolved_url))
            })?;

            update.resolved_url = Some(resolved_url);
            update.resolved_domain = Some(domain);
            update.confidence = Some(confidence);
            update.matched_by = Some(matched_by);
            update.reasons = signals.unwrap_or_default();
        }
        ResolutionResult::ResolvedNeedsReview { candidates }
        | ResolutionResult::Unresolved { candidates } => {
            update.candidates = candidates;
        }
    }

    Ok(update)
}

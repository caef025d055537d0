//! End-to-end job scenarios.

mod common;

use common::*;
use skuresolve::{ErrorKind, JobStatus, RowStatus};

#[test]
fn test_mixed_outcomes_end_partial() {
    let resolver = ScriptedResolver::new()
        .with("A1", Script::confident("https://www.brand.example/p/a1", 0.95))
        .with("B2", Script::Review { candidates: 2 })
        .with("C3", Script::Timeout);
    let harness = TestHarness::new(resolver);
    let runner = harness.runner(&ConfigBuilder::new().build());

    let job = runner.submit_job("tenant-1", &rows(&["A1", "B2", "C3"])).unwrap();
    let outcome = runner.run_job(&job.id).unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.status, JobStatus::Partial);
    assert_eq!(outcome.stats.resolved, 1);
    assert_eq!(outcome.stats.review, 1);
    assert_eq!(outcome.stats.unresolved, 0);
    assert_eq!(outcome.stats.errors, 1);

    let stored = harness.job(&job.id);
    assert_eq!(stored.status, JobStatus::Partial);
    assert_eq!(stored.resolved_count, 1);
    assert_eq!(stored.review_count, 1);
    assert_eq!(stored.unresolved_count, 0);
    assert_eq!(stored.error_count, 1);
    assert_conserved(&stored);

    let a1 = harness.row_by_sku(&job.id, "A1");
    assert_eq!(a1.status, RowStatus::ResolvedConfident);
    assert_eq!(a1.confidence, Some(0.95));
    assert_eq!(a1.resolved_domain.as_deref(), Some("brand.example"));
    assert_eq!(a1.reasons, vec!["sku=A1".to_string()]);

    let b2 = harness.row_by_sku(&job.id, "B2");
    assert_eq!(b2.status, RowStatus::ResolvedNeedsReview);
    assert_eq!(b2.candidates.len(), 2);
    assert!(b2.resolved_url.is_none());

    let c3 = harness.row_by_sku(&job.id, "C3");
    assert_eq!(c3.status, RowStatus::Error);
    assert_eq!(c3.error_kind, Some(ErrorKind::Resolver));
    assert!(c3.error_message.unwrap().contains("timed out"));
}

#[test]
fn test_all_confident_succeeds() {
    let skus: Vec<String> = (1..=5).map(|i| format!("OK{}", i)).collect();
    let harness = TestHarness::new(ScriptedResolver::all_confident(&skus));
    let runner = harness.runner(&ConfigBuilder::new().build());

    let sku_refs: Vec<&str> = skus.iter().map(String::as_str).collect();
    let job = runner.submit_job("tenant-1", &rows(&sku_refs)).unwrap();
    let outcome = runner.run_job(&job.id).unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.stats.resolved, 5);
    assert_eq!(outcome.stats.errors, 0);

    let stored = harness.job(&job.id);
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert_eq!(stored.error_count, 0);
    assert!(stored.completed_at.is_some());
    assert_conserved(&stored);
}

#[test]
fn test_all_errors_fail() {
    let resolver = ScriptedResolver::new()
        .with("E1", Script::Timeout)
        .with("E2", Script::Fail("upstream 503".to_string()))
        .with("E3", Script::Panic)
        .with("E4", Script::confident("not a url with a host://", 1.2));
    let harness = TestHarness::new(resolver);
    let runner = harness.runner(&ConfigBuilder::new().row_concurrency(2).build());

    let job = runner
        .submit_job("tenant-1", &rows(&["E1", "E2", "E3", "E4"]))
        .unwrap();
    let outcome = runner.run_job(&job.id).unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.stats.errors, 4);

    let stored = harness.job(&job.id);
    assert_eq!(stored.status, JobStatus::Failed);
    assert_conserved(&stored);
    for row in harness.rows(&job.id) {
        assert_eq!(row.status, RowStatus::Error);
        assert_eq!(row.error_kind, Some(ErrorKind::Resolver));
        assert!(row.error_message.is_some());
    }
}

#[test]
fn test_empty_job_succeeds_without_resolving() {
    let harness = TestHarness::new(ScriptedResolver::new());
    let runner = harness.runner(&ConfigBuilder::new().build());

    let job = runner.submit_job("tenant-1", &[]).unwrap();
    let outcome = runner.run_job(&job.id).unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.stats.total(), 0);
    assert_eq!(harness.resolver.total_calls(), 0);

    let stored = harness.job(&job.id);
    assert_eq!(stored.input_count, 0);
    assert_conserved(&stored);
}

#[test]
fn test_unresolved_rows_count_as_successes() {
    let harness = TestHarness::new(ScriptedResolver::new().with("X", Script::Timeout));
    let runner = harness.runner(&ConfigBuilder::new().build());

    let job = runner.submit_job("tenant-1", &rows(&["U1", "U2", "X"])).unwrap();
    let outcome = runner.run_job(&job.id).unwrap();

    assert_eq!(outcome.stats.unresolved, 2);
    assert_eq!(outcome.status, JobStatus::Partial);
}

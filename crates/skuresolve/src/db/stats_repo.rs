//! Aggregate queries over jobs and rows.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::model::{JobStats, JobStatus, RowStatus};

/// Number of rows of one job in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowTally {
    pub queued: u64,
    pub running: u64,
    pub resolved: u64,
    pub review: u64,
    pub unresolved: u64,
    pub errors: u64,
}

impl RowTally {
    /// Counts of rows that reached a terminal status.
    pub fn terminal_stats(&self) -> JobStats {
        JobStats {
            resolved: self.resolved,
            review: self.review,
            unresolved: self.unresolved,
            errors: self.errors,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.running + self.terminal_stats().total()
    }
}

/// Counts a job's rows by status straight from the table.
pub fn tally_rows(db: &Database, job_id: &str) -> Result<RowTally, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM job_rows WHERE job_id = ?1 GROUP BY status",
        )?;
        let counts = stmt
            .query_map(params![job_id], |row| {
                Ok((row.get::<_, RowStatus>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tally = RowTally::default();
        for (status, count) in counts {
            match status {
                RowStatus::Queued => tally.queued = count,
                RowStatus::Running => tally.running = count,
                RowStatus::ResolvedConfident => tally.resolved = count,
                RowStatus::ResolvedNeedsReview => tally.review = count,
                RowStatus::Unresolved => tally.unresolved = count,
                RowStatus::Error => tally.errors = count,
            }
        }
        Ok(tally)
    })
}

/// Job and row totals for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub tenant_id: String,
    /// Number of jobs per job status.
    pub jobs_by_status: BTreeMap<String, u64>,
    pub total_rows: u64,
    /// Summed final counts across jobs in a terminal status.
    pub settled: JobStats,
}

/// Summarizes all jobs of a tenant.
pub fn tenant_summary(db: &Database, tenant_id: &str) -> Result<TenantSummary, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*), COALESCE(SUM(input_count), 0),
             COALESCE(SUM(resolved_count), 0), COALESCE(SUM(review_count), 0),
             COALESCE(SUM(unresolved_count), 0), COALESCE(SUM(error_count), 0)
             FROM jobs WHERE tenant_id = ?1 GROUP BY status",
        )?;
        let groups = stmt
            .query_map(params![tenant_id], |row| {
                Ok((
                    row.get::<_, JobStatus>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                    JobStats {
                        resolved: row.get(3)?,
                        review: row.get(4)?,
                        unresolved: row.get(5)?,
                        errors: row.get(6)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = TenantSummary {
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };
        for (status, jobs, rows, stats) in groups {
            summary.jobs_by_status.insert(status.to_string(), jobs);
            summary.total_rows += rows;
            if status.is_terminal() {
                summary.settled.resolved += stats.resolved;
                summary.settled.review += stats.review;
                summary.settled.unresolved += stats.unresolved;
                summary.settled.errors += stats.errors;
            }
        }
        Ok(summary)
    })
}

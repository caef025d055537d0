//! Reads and guarded writes on the `jobs` table.

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{row_repo, Database, DatabaseError};
use crate::model::{Job, JobStatus, NewRow};
use crate::store::{JobUpdate, LeaseChange};

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    Ok(Job {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        status: row.get("status")?,
        input_count: row.get("input_count")?,
        resolved_count: row.get("resolved_count")?,
        review_count: row.get("review_count")?,
        unresolved_count: row.get("unresolved_count")?,
        error_count: row.get("error_count")?,
        lease_owner: row.get("lease_owner")?,
        lease_expires_at: row.get("lease_expires_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Creates a queued job together with all of its rows in one transaction.
///
/// Rows are inserted in slice order, which is the order the driver visits them.
pub fn create_with_rows(
    db: &Database,
    tenant_id: &str,
    rows: &[NewRow],
) -> Result<Job, DatabaseError> {
    let now = now_rfc3339();
    let job = Job {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        status: JobStatus::Queued,
        input_count: rows.len() as u64,
        resolved_count: 0,
        review_count: 0,
        unresolved_count: 0,
        error_count: 0,
        lease_owner: None,
        lease_expires_at: None,
        created_at: now.clone(),
        updated_at: now.clone(),
        completed_at: None,
    };

    db.with_transaction(|tx| {
        insert(tx, &job)?;
        for row in rows {
            row_repo::insert(tx, &job.id, row, &now)?;
        }
        Ok(())
    })?;

    log::info!(
        "Created job {} for tenant {} with {} rows",
        job.id,
        job.tenant_id,
        job.input_count
    );
    Ok(job)
}

fn insert(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, tenant_id, status, input_count, resolved_count, review_count,
         unresolved_count, error_count, lease_owner, lease_expires_at, created_at, updated_at,
         completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            job.id,
            job.tenant_id,
            job.status,
            job.input_count,
            job.resolved_count,
            job.review_count,
            job.unresolved_count,
            job.error_count,
            job.lease_owner,
            job.lease_expires_at,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Atomically takes ownership of a job for one driver run.
///
/// Succeeds when the job is `queued`, or `running` under a lease that expired
/// at or before `now_ms`. Returns `false` when someone else holds it or the
/// job is settled.
pub fn try_claim(
    db: &Database,
    id: &str,
    owner: &str,
    now_ms: i64,
    lease_ms: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', lease_owner = ?1, lease_expires_at = ?2,
             updated_at = ?3
             WHERE id = ?4 AND (status = 'queued' OR (status = 'running'
               AND (lease_expires_at IS NULL OR lease_expires_at <= ?5)))",
            params![owner, now_ms.saturating_add(lease_ms), now_rfc3339(), id, now_ms],
        )?;
        Ok(changed == 1)
    })
}

/// Applies a partial update to a job.
///
/// With `update.owner` set, the write only lands while that owner holds the
/// lease on a running job; otherwise `LeaseLost` is returned.
pub fn update(db: &Database, id: &str, update: &JobUpdate) -> Result<(), DatabaseError> {
    let changed = db.with_conn(|conn| {
        let now = now_rfc3339();
        let mut sets = vec!["updated_at = ?1".to_string()];
        let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(now.clone())];

        if let Some(status) = update.status {
            param_values.push(Box::new(status));
            sets.push(format!("status = ?{}", param_values.len()));
            if status.is_settled() {
                param_values.push(Box::new(now.clone()));
                sets.push(format!("completed_at = ?{}", param_values.len()));
            }
        }
        if let Some(stats) = update.stats {
            for (column, value) in [
                ("resolved_count", stats.resolved),
                ("review_count", stats.review),
                ("unresolved_count", stats.unresolved),
                ("error_count", stats.errors),
            ] {
                param_values.push(Box::new(value));
                sets.push(format!("{} = ?{}", column, param_values.len()));
            }
        }
        match update.lease {
            LeaseChange::Keep => {}
            LeaseChange::Renew { expires_at_ms } => {
                param_values.push(Box::new(expires_at_ms));
                sets.push(format!("lease_expires_at = ?{}", param_values.len()));
            }
            LeaseChange::Release => {
                sets.push("lease_expires_at = NULL".to_string());
            }
        }

        param_values.push(Box::new(id.to_string()));
        let mut where_clause = format!("id = ?{}", param_values.len());
        if let Some(ref owner) = update.owner {
            param_values.push(Box::new(owner.clone()));
            where_clause.push_str(&format!(
                " AND status = 'running' AND lease_owner = ?{}",
                param_values.len()
            ));
        }

        let sql = format!("UPDATE jobs SET {} WHERE {}", sets.join(", "), where_clause);
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        Ok(conn.execute(&sql, params_ref.as_slice())?)
    })?;

    if changed == 0 {
        return match find_by_id(db, id)? {
            None => Err(DatabaseError::NotFound {
                entity: "job",
                id: id.to_string(),
            }),
            Some(_) => Err(DatabaseError::LeaseLost {
                job_id: id.to_string(),
            }),
        };
    }
    Ok(())
}

/// Moves a queued or running job to `cancelled`.
///
/// Returns `false` when the job is already settled.
pub fn request_cancel(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    let changed = db.with_conn(|conn| {
        let now = now_rfc3339();
        Ok(conn.execute(
            "UPDATE jobs SET status = 'cancelled', lease_expires_at = NULL,
             updated_at = ?1, completed_at = ?1
             WHERE id = ?2 AND status IN ('queued', 'running')",
            params![now, id],
        )?)
    })?;

    if changed == 0 && find_by_id(db, id)?.is_none() {
        return Err(DatabaseError::NotFound {
            entity: "job",
            id: id.to_string(),
        });
    }
    Ok(changed == 1)
}

/// Queries jobs with filters, returning (jobs, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref tenant_id) = filter.tenant_id {
            param_values.push(Box::new(tenant_id.clone()));
            conditions.push(format!("tenant_id = ?{}", param_values.len()));
        }
        if let Some(status) = filter.status {
            param_values.push(Box::new(status));
            conditions.push(format!("status = ?{}", param_values.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let jobs: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((jobs, total))
    })
}

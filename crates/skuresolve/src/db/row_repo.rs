//! Reads and transition-guarded writes on the `job_rows` table.
//!
//! Rows are paged by `seq`, never by offset: a row leaves the `queued`
//! filter as soon as it is processed, which would shift every later offset.

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::{ErrorKind, JobRow, NewRow, RowCursor, RowStatus};
use crate::store::RowUpdate;

impl ToSql for RowStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RowStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for ErrorKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ErrorKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Decodes a JSON array column into a typed list.
fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> Result<Vec<T>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn row_from_row(row: &Row<'_>) -> Result<JobRow, rusqlite::Error> {
    Ok(JobRow {
        id: row.get("id")?,
        seq: row.get("seq")?,
        job_id: row.get("job_id")?,
        supplier_name: row.get("supplier_name")?,
        supplier_key: row.get("supplier_key")?,
        sku: row.get("sku")?,
        ndc_item_code: row.get("ndc_item_code")?,
        product_name: row.get("product_name")?,
        brand_name: row.get("brand_name")?,
        status: row.get("status")?,
        resolved_url: row.get("resolved_url")?,
        resolved_domain: row.get("resolved_domain")?,
        confidence: row.get("confidence")?,
        matched_by: row.get("matched_by")?,
        reasons: json_column(row, "reasons")?,
        candidates: json_column(row, "candidates")?,
        error_message: row.get("error_message")?,
        error_kind: row.get("error_kind")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Inserts a queued row. Called inside the job-creation transaction.
pub(crate) fn insert(
    conn: &Connection,
    job_id: &str,
    row: &NewRow,
    created_at: &str,
) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO job_rows (id, job_id, supplier_name, supplier_key, sku, ndc_item_code,
         product_name, brand_name, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            job_id,
            row.supplier_name,
            row.supplier_key,
            row.sku,
            row.ndc_item_code,
            row.product_name,
            row.brand_name,
            RowStatus::Queued,
            created_at,
        ],
    )?;
    Ok(id)
}

/// Finds a row by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM job_rows WHERE id = ?1",
                params![id],
                row_from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns up to `limit` queued rows of a job, in creation order, strictly
/// after `after`.
pub fn queued_page(
    db: &Database,
    job_id: &str,
    after: Option<RowCursor>,
    limit: usize,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_rows
             WHERE job_id = ?1 AND status = 'queued' AND seq > ?2
             ORDER BY seq LIMIT ?3",
        )?;
        let after_seq = after.map(|c| c.0).unwrap_or(0);
        let rows = stmt
            .query_map(params![job_id, after_seq, limit as i64], row_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All rows of a job in creation order.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM job_rows WHERE job_id = ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map(params![job_id], row_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Writes a row transition.
///
/// The current status is read and checked with
/// [`RowStatus::can_transition_to`]; the write then only lands if the row
/// still holds that status.
pub fn update(db: &Database, id: &str, update: &RowUpdate) -> Result<(), DatabaseError> {
    let invalid = |from: RowStatus| DatabaseError::InvalidTransition {
        row_id: id.to_string(),
        from: from.to_string(),
        to: update.status.to_string(),
    };

    db.with_conn(|conn| {
        let current: Option<RowStatus> = conn
            .query_row(
                "SELECT status FROM job_rows WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(from) = current else {
            return Err(DatabaseError::NotFound {
                entity: "row",
                id: id.to_string(),
            });
        };
        if !from.can_transition_to(update.status) {
            return Err(invalid(from));
        }

        let reasons = serde_json::to_string(&update.reasons)?;
        let candidates = serde_json::to_string(&update.candidates)?;
        let changed = conn.execute(
            "UPDATE job_rows SET status = ?1, resolved_url = ?2, resolved_domain = ?3,
             confidence = ?4, matched_by = ?5, reasons = ?6, candidates = ?7,
             error_message = ?8, error_kind = ?9, updated_at = ?10
             WHERE id = ?11 AND status = ?12",
            params![
                update.status,
                update.resolved_url,
                update.resolved_domain,
                update.confidence,
                update.matched_by,
                reasons,
                candidates,
                update.error_message,
                update.error_kind,
                Utc::now().to_rfc3339(),
                id,
                from,
            ],
        )?;
        // Another process moved the row between the read and the write.
        if changed == 0 {
            return Err(invalid(from));
        }
        Ok(())
    })
}

/// Moves every row a dead driver left `running` to `error`.
pub fn interrupt_running(
    db: &Database,
    job_id: &str,
    message: &str,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE job_rows SET status = ?1, error_kind = ?2, error_message = ?3,
             updated_at = ?4
             WHERE job_id = ?5 AND status = ?6",
            params![
                RowStatus::Error,
                ErrorKind::Interrupted,
                message,
                Utc::now().to_rfc3339(),
                job_id,
                RowStatus::Running,
            ],
        )?;
        Ok(changed as u64)
    })
}

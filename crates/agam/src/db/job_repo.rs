//! Job repository: CRUD operations for the `jobs` and `job_inputs` tables.
//!
//! Status writes are guarded in SQL. Each returns whether a row actually
//! changed, so callers can tell a lost race from a successful transition.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub operation: String,
    pub file_type: String,
    pub output_filename: Option<String>,
    pub processed_filename: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub result_blob: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            operation: row.get("operation")?,
            file_type: row.get("file_type")?,
            output_filename: row.get("output_filename")?,
            processed_filename: row.get("processed_filename")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            result_blob: row.get("result_blob")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// One uploaded file belonging to a job.
#[derive(Debug, Clone)]
pub struct InputRow {
    pub job_id: String,
    pub position: i64,
    pub original_filename: String,
    pub blob_ref: String,
    pub size_bytes: i64,
}

impl InputRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            position: row.get("position")?,
            original_filename: row.get("original_filename")?,
            blob_ref: row.get("blob_ref")?,
            size_bytes: row.get("size_bytes")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a job and its inputs in one transaction.
pub fn insert(db: &Database, job: &JobRow, inputs: &[InputRow]) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, kind, operation, file_type, output_filename,
             processed_filename, status, error_message, result_blob, created_at,
             updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.kind,
                job.operation,
                job.file_type,
                job.output_filename,
                job.processed_filename,
                job.status,
                job.error_message,
                job.result_blob,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        for input in inputs {
            tx.execute(
                "INSERT INTO job_inputs (job_id, position, original_filename, blob_ref, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    input.job_id,
                    input.position,
                    input.original_filename,
                    input.blob_ref,
                    input.size_bytes,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Inputs of a job in upload order.
pub fn inputs_for(db: &Database, job_id: &str) -> Result<Vec<InputRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM job_inputs WHERE job_id = ?1 ORDER BY position ASC")?;
        let rows = stmt
            .query_map(params![job_id], InputRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref kind) = filter.kind {
            conditions.push(format!("kind = ?{}", param_values.len() + 1));
            param_values.push(Box::new(kind.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// `pending` → `processing`.
pub fn mark_processing(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, updated_at],
        )?;
        Ok(changed == 1)
    })
}

/// Non-terminal → `completed`, recording the result.
pub fn mark_completed(
    db: &Database,
    id: &str,
    result_blob: &str,
    processed_filename: &str,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', result_blob = ?2, processed_filename = ?3,
             error_message = NULL, updated_at = ?4, completed_at = ?4
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, result_blob, processed_filename, completed_at],
        )?;
        Ok(changed == 1)
    })
}

/// Non-terminal → `failed`, recording the error text.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error_message: &str,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?2, result_blob = NULL,
             updated_at = ?3, completed_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, error_message, completed_at],
        )?;
        Ok(changed == 1)
    })
}

/// Fails every job still `pending` or `processing`. Returns how many rows
/// changed.
pub fn fail_unfinished(
    db: &Database,
    error_message: &str,
    completed_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?1, result_blob = NULL,
             updated_at = ?2, completed_at = ?2
             WHERE status IN ('pending', 'processing')",
            params![error_message, completed_at],
        )?;
        Ok(changed)
    })
}

/// Deletes a job; its inputs go with it through the foreign key cascade.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    })
}

/// Cheap reachability probe.
pub fn ping(db: &Database) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            kind: "merge".to_string(),
            operation: "merge".to_string(),
            file_type: "pdf".to_string(),
            output_filename: Some("merged_document".to_string()),
            processed_filename: None,
            status: "pending".to_string(),
            error_message: None,
            result_blob: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            completed_at: None,
        }
    }

    fn sample_inputs(job_id: &str) -> Vec<InputRow> {
        ["b.pdf", "a.pdf"]
            .iter()
            .enumerate()
            .map(|(i, name)| InputRow {
                job_id: job_id.to_string(),
                position: i as i64,
                original_filename: name.to_string(),
                blob_ref: format!("inputs/{}", name),
                size_bytes: 10,
            })
            .collect()
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1"), &sample_inputs("job-1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.kind, "merge");
        assert_eq!(found.status, "pending");
        assert_eq!(found.output_filename.as_deref(), Some("merged_document"));
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_inputs_keep_upload_order() {
        let db = test_db();
        insert(&db, &sample_job("job-2"), &sample_inputs("job-2")).unwrap();

        let inputs = inputs_for(&db, "job-2").unwrap();
        let names: Vec<_> = inputs.iter().map(|i| i.original_filename.as_str()).collect();
        assert_eq!(names, ["b.pdf", "a.pdf"]);
    }

    #[test]
    fn test_insert_is_atomic() {
        let db = test_db();
        let mut inputs = sample_inputs("job-3");
        // Duplicate primary key makes the second input insert fail.
        inputs[1].position = 0;

        assert!(insert(&db, &sample_job("job-3"), &inputs).is_err());
        assert!(find_by_id(&db, "job-3").unwrap().is_none());
    }

    #[test]
    fn test_status_transitions() {
        let db = test_db();
        insert(&db, &sample_job("t1"), &[]).unwrap();

        assert!(mark_processing(&db, "t1", "2026-01-01T00:00:01Z").unwrap());
        assert!(!mark_processing(&db, "t1", "2026-01-01T00:00:02Z").unwrap());
        assert!(mark_completed(&db, "t1", "results/x.pdf", "merged.pdf", "2026-01-01T00:00:03Z")
            .unwrap());

        let found = find_by_id(&db, "t1").unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.result_blob.as_deref(), Some("results/x.pdf"));
        assert_eq!(found.processed_filename.as_deref(), Some("merged.pdf"));
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let db = test_db();
        insert(&db, &sample_job("t2"), &[]).unwrap();
        assert!(mark_failed(&db, "t2", "boom", "2026-01-01T00:00:01Z").unwrap());

        assert!(!mark_completed(&db, "t2", "results/x.pdf", "x.pdf", "2026-01-01T00:00:02Z")
            .unwrap());
        assert!(!mark_failed(&db, "t2", "again", "2026-01-01T00:00:03Z").unwrap());

        let found = find_by_id(&db, "t2").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(found.error_message.as_deref(), Some("boom"));
        assert!(found.result_blob.is_none());
    }

    #[test]
    fn test_fail_unfinished_leaves_terminal_jobs_alone() {
        let db = test_db();
        for id in ["open", "running", "done"] {
            insert(&db, &sample_job(id), &[]).unwrap();
        }
        assert!(mark_processing(&db, "running", "2026-01-01T00:00:01Z").unwrap());
        assert!(mark_completed(&db, "done", "results/d.pdf", "d.pdf", "2026-01-01T00:00:02Z")
            .unwrap());

        let changed = fail_unfinished(&db, "restarted", "2026-01-01T00:00:03Z").unwrap();
        assert_eq!(changed, 2);

        for id in ["open", "running"] {
            let found = find_by_id(&db, id).unwrap().unwrap();
            assert_eq!(found.status, "failed");
            assert_eq!(found.error_message.as_deref(), Some("restarted"));
            assert_eq!(found.completed_at.as_deref(), Some("2026-01-01T00:00:03Z"));
        }
        let done = find_by_id(&db, "done").unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.result_blob.as_deref(), Some("results/d.pdf"));

        assert_eq!(fail_unfinished(&db, "again", "2026-01-01T00:00:04Z").unwrap(), 0);
    }

    #[test]
    fn test_delete_cascades_inputs() {
        let db = test_db();
        insert(&db, &sample_job("d1"), &sample_inputs("d1")).unwrap();

        assert!(delete(&db, "d1").unwrap());
        assert!(!delete(&db, "d1").unwrap());
        assert!(inputs_for(&db, "d1").unwrap().is_empty());
    }

    #[test]
    fn test_query_filter_and_pagination() {
        let db = test_db();
        for i in 0..10 {
            let mut job = sample_job(&format!("p{}", i));
            job.created_at = format!("2026-01-{:02}T00:00:00Z", i + 1);
            if i % 2 == 0 {
                job.kind = "conversion".to_string();
            }
            insert(&db, &job, &[]).unwrap();
        }

        let (rows, total) = query(
            &db,
            &JobFilter {
                limit: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 10);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "p9");

        let (rows, total) = query(
            &db,
            &JobFilter {
                kind: Some("conversion".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 5);
        assert!(rows.iter().all(|r| r.kind == "conversion"));
    }

    #[test]
    fn test_ping() {
        assert!(ping(&test_db()).is_ok());
    }
}

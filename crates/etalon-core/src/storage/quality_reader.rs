use chrono::{DateTime, Utc};
use rusqlite::Row;
use tracing::warn;

use crate::error::Result;
use crate::models::{QualityIssue, QualityMetric};
use crate::storage::database::ConnectionPool;

/// Read-only access to the quality tables written by the analyzer.
///
/// Individual rows that fail to decode are counted, logged and skipped;
/// one bad row never aborts a bulk read.
pub struct QualityReader<'a> {
    pool: &'a ConnectionPool,
}

impl<'a> QualityReader<'a> {
    pub fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn metrics(&self) -> Result<Vec<QualityMetric>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT id, name, category, value, measured_at FROM quality_metrics ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_metric)?;

        let mut metrics = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match row {
                Ok(metric) => metrics.push(metric),
                Err(err) => {
                    skipped += 1;
                    warn!(error = %err, "skipping undecodable quality metric row");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "quality metric rows skipped during bulk read");
        }
        Ok(metrics)
    }

    pub fn issues(&self) -> Result<Vec<QualityIssue>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT id, entity_ref, description, severity, created_at FROM quality_issues ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_issue)?;

        let mut issues = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match row {
                Ok(issue) => issues.push(issue),
                Err(err) => {
                    skipped += 1;
                    warn!(error = %err, "skipping undecodable quality issue row");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "quality issue rows skipped during bulk read");
        }
        Ok(issues)
    }
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<QualityMetric> {
    Ok(QualityMetric {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        value: row.get(3)?,
        measured_at: timestamp(row, 4)?,
    })
}

fn row_to_issue(row: &Row<'_>) -> rusqlite::Result<QualityIssue> {
    Ok(QualityIssue {
        id: row.get(0)?,
        entity_ref: row.get(1)?,
        description: row.get(2)?,
        severity: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::open_in_memory;

    #[test]
    fn reads_metrics_and_skips_bad_rows() {
        let pool = open_in_memory().unwrap();
        {
            let conn = pool.get_connection();
            conn.execute_batch(
                "INSERT INTO quality_metrics (name, category, value, measured_at)
                 VALUES ('nomenclature_completeness', 'completeness', 0.8, '2026-01-01T00:00:00Z');
                 INSERT INTO quality_metrics (name, category, value, measured_at)
                 VALUES ('counterparty_validity', 'validity', 0.6, 'not-a-timestamp');",
            )
            .unwrap();
        }

        let reader = QualityReader::new(&pool);
        let metrics = reader.metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "nomenclature_completeness");
    }

    #[test]
    fn reads_issues() {
        let pool = open_in_memory().unwrap();
        {
            let conn = pool.get_connection();
            conn.execute_batch(
                "INSERT INTO quality_issues (entity_ref, description, severity, created_at)
                 VALUES (1, 'missing code', 'HIGH', '2026-01-01T00:00:00Z');",
            )
            .unwrap();
        }

        let reader = QualityReader::new(&pool);
        let issues = reader.issues().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, "HIGH");
    }
}

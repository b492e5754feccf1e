use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::Benchmark;

use super::fold_name;

pub struct SqliteBenchmarkRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteBenchmarkRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    pub fn create(&self, benchmark: &Benchmark) -> Result<()> {
        if benchmark.variations.is_empty() {
            return Err(CoreError::Validation(
                "benchmark must carry at least one variation".to_string(),
            ));
        }
        self.conn.execute(
            "INSERT INTO benchmarks
             (id, entity_type, canonical_name, variations, attributes, source_upload_id, source_client_id, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                benchmark.id.to_string(),
                benchmark.entity_type,
                benchmark.canonical_name,
                serde_json::to_string(&benchmark.variations)?,
                serde_json::to_string(&benchmark.attributes)?,
                benchmark.source_upload_id,
                benchmark.source_client_id,
                benchmark.is_active,
                benchmark.created_at.to_rfc3339(),
                benchmark.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, benchmark: &Benchmark) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE benchmarks
             SET entity_type = ?1, canonical_name = ?2, variations = ?3, attributes = ?4,
                 source_upload_id = ?5, source_client_id = ?6, is_active = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                benchmark.entity_type,
                benchmark.canonical_name,
                serde_json::to_string(&benchmark.variations)?,
                serde_json::to_string(&benchmark.attributes)?,
                benchmark.source_upload_id,
                benchmark.source_client_id,
                benchmark.is_active,
                Utc::now().to_rfc3339(),
                benchmark.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::BenchmarkNotFound(benchmark.id.to_string()));
        }
        Ok(())
    }

    pub fn find(&self, id: &Uuid) -> Result<Option<Benchmark>> {
        self.conn
            .query_row(
                &format!("{SELECT_BENCHMARK} WHERE id = ?1"),
                params![id.to_string()],
                row_to_benchmark,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Exact lookup: the folded name must equal the folded canonical name or
    /// one of the folded variations of an active benchmark.
    pub fn find_exact(&self, name: &str, entity_type: &str) -> Result<Option<Benchmark>> {
        let needle = fold_name(name);
        if needle.is_empty() {
            return Ok(None);
        }
        for benchmark in self.list_active(entity_type)? {
            let hit = benchmark
                .variations
                .iter()
                .any(|variation| fold_name(variation) == needle)
                || fold_name(&benchmark.canonical_name) == needle;
            if hit {
                return Ok(Some(benchmark));
            }
        }
        Ok(None)
    }

    pub fn list_active(&self, entity_type: &str) -> Result<Vec<Benchmark>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_BENCHMARK} WHERE entity_type = ?1 AND is_active = 1 ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![entity_type], row_to_benchmark)?;
        collect(rows)
    }

    pub fn list(
        &self,
        entity_type: Option<&str>,
        active_only: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Benchmark>> {
        let sql = format!(
            "{SELECT_BENCHMARK}
             WHERE (?1 IS NULL OR entity_type = ?1) AND (?2 = 0 OR is_active = 1)
             ORDER BY created_at DESC, id LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![entity_type, active_only, limit as i64, offset as i64],
            row_to_benchmark,
        )?;
        collect(rows)
    }

    pub fn soft_delete(&self, id: &Uuid) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE benchmarks SET is_active = 0, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(updated > 0)
    }
}

const SELECT_BENCHMARK: &str =
    "SELECT id, entity_type, canonical_name, variations, attributes, source_upload_id, source_client_id, is_active, created_at, updated_at
     FROM benchmarks";

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<Benchmark>>,
) -> Result<Vec<Benchmark>> {
    let mut benchmarks = Vec::new();
    for row in rows {
        benchmarks.push(row?);
    }
    Ok(benchmarks)
}

fn row_to_benchmark(row: &Row<'_>) -> rusqlite::Result<Benchmark> {
    let id_raw: String = row.get(0)?;
    let id = Uuid::parse_str(&id_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let variations_raw: String = row.get(3)?;
    let variations: Vec<String> = serde_json::from_str(&variations_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let attributes_raw: String = row.get(4)?;
    let attributes = serde_json::from_str(&attributes_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Benchmark {
        id,
        entity_type: row.get(1)?,
        canonical_name: row.get(2)?,
        variations,
        attributes,
        source_upload_id: row.get(5)?,
        source_client_id: row.get(6)?,
        is_active: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
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

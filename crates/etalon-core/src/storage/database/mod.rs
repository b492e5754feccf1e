mod connection;
mod schema;

pub use connection::ConnectionPool;
pub use schema::{apply_pragmas, init_schema};

use std::path::Path;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Benchmark, NewStage, NormalizationSession, NormalizationStage, SessionStatus,
};
use crate::storage::repositories::{
    BenchmarkStore, SessionStore, SqliteBenchmarkRepository, SqliteSessionRepository,
};

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        schema::init_schema(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        schema::init_schema(&conn)?;
    }
    Ok(pool)
}

/// Facade over the session/benchmark repositories sharing one pool.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { pool: open_database(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { pool: open_in_memory()? })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Seed a source record row; returns its id. Sessions reference records
    /// and duplicate scans read names from them.
    pub fn insert_record(&self, name: &str) -> Result<i64> {
        let conn = self.pool.get_connection();
        conn.execute("INSERT INTO records (name) VALUES (?1)", rusqlite::params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_names(&self, limit: usize) -> Result<Vec<(i64, String)>> {
        let conn = self.pool.get_connection();
        let mut stmt =
            conn.prepare("SELECT id, name FROM records ORDER BY id LIMIT ?1")?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

impl SessionStore for Database {
    fn create_session(&self, record_ref: i64, original_name: &str) -> Result<NormalizationSession> {
        SqliteSessionRepository::new(self.pool.get_connection()).create(record_ref, original_name)
    }

    fn get_session(&self, session_id: i64) -> Result<Option<NormalizationSession>> {
        SqliteSessionRepository::new(self.pool.get_connection()).find(session_id)
    }

    fn append_stage(&self, session_id: i64, stage: NewStage) -> Result<NormalizationStage> {
        SqliteSessionRepository::new(self.pool.get_connection()).append_stage(session_id, stage)
    }

    fn history(&self, session_id: i64) -> Result<Vec<NormalizationStage>> {
        SqliteSessionRepository::new(self.pool.get_connection()).history(session_id)
    }

    fn revert_to_stage(&self, session_id: i64, target_stage_id: i64) -> Result<NormalizationSession> {
        SqliteSessionRepository::new(self.pool.get_connection())
            .revert_to_stage(session_id, target_stage_id)
    }

    fn update_canonical_name(&self, session_id: i64, name: &str) -> Result<()> {
        SqliteSessionRepository::new(self.pool.get_connection())
            .update_canonical_name(session_id, name)
    }

    fn update_status(&self, session_id: i64, status: SessionStatus) -> Result<()> {
        SqliteSessionRepository::new(self.pool.get_connection()).update_status(session_id, status)
    }

    fn set_stage_category(&self, stage_id: i64, category: &serde_json::Value) -> Result<()> {
        SqliteSessionRepository::new(self.pool.get_connection())
            .set_stage_category(stage_id, category)
    }

    fn backfill_record_category(&self, record_ref: i64, category: &str) -> Result<()> {
        SqliteSessionRepository::new(self.pool.get_connection())
            .backfill_record_category(record_ref, category)
    }
}

impl BenchmarkStore for Database {
    fn get(&self, id: &Uuid) -> Result<Option<Benchmark>> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).find(id)
    }

    fn find_exact(&self, name: &str, entity_type: &str) -> Result<Option<Benchmark>> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).find_exact(name, entity_type)
    }

    fn list_active(&self, entity_type: &str) -> Result<Vec<Benchmark>> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).list_active(entity_type)
    }

    fn list(
        &self,
        entity_type: Option<&str>,
        active_only: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Benchmark>> {
        SqliteBenchmarkRepository::new(self.pool.get_connection())
            .list(entity_type, active_only, limit, offset)
    }

    fn create(&self, benchmark: &Benchmark) -> Result<()> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).create(benchmark)
    }

    fn update(&self, benchmark: &Benchmark) -> Result<()> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).update(benchmark)
    }

    fn soft_delete(&self, id: &Uuid) -> Result<bool> {
        SqliteBenchmarkRepository::new(self.pool.get_connection()).soft_delete(id)
    }
}

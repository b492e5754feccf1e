use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{CoreError, Result};
use crate::models::{NewStage, NormalizationSession, NormalizationStage, SessionStatus, StageKind};

pub struct SqliteSessionRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteSessionRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    pub fn create(&self, record_ref: i64, original_name: &str) -> Result<NormalizationSession> {
        if original_name.trim().is_empty() {
            return Err(CoreError::Validation("original name must not be empty".to_string()));
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO sessions (record_ref, original_name, current_name, stage_count, status, created_at, updated_at)
             VALUES (?1, ?2, ?2, 0, 'active', ?3, ?3)",
            params![record_ref, original_name, now.to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(NormalizationSession {
            id,
            record_ref,
            original_name: original_name.to_string(),
            current_name: original_name.to_string(),
            stage_count: 0,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn find(&self, session_id: i64) -> Result<Option<NormalizationSession>> {
        self.conn
            .query_row(
                "SELECT id, record_ref, original_name, current_name, stage_count, status, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Append one stage and move the session's canonical name to its output
    /// in a single transaction.
    pub fn append_stage(&self, session_id: i64, stage: NewStage) -> Result<NormalizationStage> {
        // the pool serializes access, so an unchecked transaction is safe here
        let tx = self.conn.unchecked_transaction()?;

        let stage_count: u32 = tx
            .query_row(
                "SELECT stage_count FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(CoreError::SessionNotFound(session_id))?;

        let now = Utc::now();
        let ordinal = stage_count;
        let category_json = stage
            .category
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            "INSERT INTO stages (session_id, ordinal, kind, input_name, output_name, confidence, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                ordinal,
                stage.kind.as_str(),
                stage.input_name,
                stage.output_name,
                stage.confidence,
                category_json,
                now.to_rfc3339(),
            ],
        )?;
        let stage_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions
             SET current_name = ?1, stage_count = ?2, status = 'active', updated_at = ?3
             WHERE id = ?4",
            params![stage.output_name, ordinal + 1, now.to_rfc3339(), session_id],
        )?;

        tx.commit()?;

        Ok(NormalizationStage {
            id: stage_id,
            session_id,
            ordinal,
            kind: stage.kind,
            input_name: stage.input_name,
            output_name: stage.output_name,
            confidence: stage.confidence,
            category: stage.category,
            created_at: now,
        })
    }

    pub fn history(&self, session_id: i64) -> Result<Vec<NormalizationStage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, ordinal, kind, input_name, output_name, confidence, category, created_at
             FROM stages WHERE session_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_stage)?;
        let mut stages = Vec::new();
        for row in rows {
            stages.push(row?);
        }
        Ok(stages)
    }

    /// Point the session back at an earlier stage's output. Later stages are
    /// left in place; only the canonical name and status change, atomically.
    pub fn revert_to_stage(&self, session_id: i64, target_stage_id: i64) -> Result<NormalizationSession> {
        let tx = self.conn.unchecked_transaction()?;

        let output_name: String = tx
            .query_row(
                "SELECT output_name FROM stages WHERE id = ?1 AND session_id = ?2",
                params![target_stage_id, session_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(CoreError::StageNotFound(target_stage_id))?;

        let now = Utc::now();
        let updated = tx.execute(
            "UPDATE sessions SET current_name = ?1, status = 'reverted', updated_at = ?2 WHERE id = ?3",
            params![output_name, now.to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(CoreError::SessionNotFound(session_id));
        }

        tx.commit()?;

        self.find(session_id)?.ok_or(CoreError::SessionNotFound(session_id))
    }

    pub fn update_canonical_name(&self, session_id: i64, name: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET current_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, Utc::now().to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(CoreError::SessionNotFound(session_id));
        }
        Ok(())
    }

    pub fn update_status(&self, session_id: i64, status: SessionStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(CoreError::SessionNotFound(session_id));
        }
        Ok(())
    }

    pub fn set_stage_category(&self, stage_id: i64, category: &serde_json::Value) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE stages SET category = ?1 WHERE id = ?2",
            params![serde_json::to_string(category)?, stage_id],
        )?;
        if updated == 0 {
            return Err(CoreError::StageNotFound(stage_id));
        }
        Ok(())
    }

    pub fn backfill_record_category(&self, record_ref: i64, category: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE records SET category = ?1 WHERE id = ?2",
            params![category, record_ref],
        )?;
        Ok(())
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<NormalizationSession> {
    let status_raw: String = row.get(5)?;
    let status = SessionStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown session status: {status_raw}").into(),
        )
    })?;
    Ok(NormalizationSession {
        id: row.get(0)?,
        record_ref: row.get(1)?,
        original_name: row.get(2)?,
        current_name: row.get(3)?,
        stage_count: row.get(4)?,
        status,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn row_to_stage(row: &Row<'_>) -> rusqlite::Result<NormalizationStage> {
    let kind_raw: String = row.get(3)?;
    let kind = StageKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown stage kind: {kind_raw}").into(),
        )
    })?;
    let category_raw: Option<String> = row.get(7)?;
    let category = match category_raw {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
        })?),
        None => None,
    };
    Ok(NormalizationStage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ordinal: row.get(2)?,
        kind,
        input_name: row.get(4)?,
        output_name: row.get(5)?,
        confidence: row.get(6)?,
        category,
        created_at: timestamp(row, 8)?,
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

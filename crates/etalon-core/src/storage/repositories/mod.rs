mod benchmark_repository;
mod session_repository;

pub use benchmark_repository::SqliteBenchmarkRepository;
pub use session_repository::SqliteSessionRepository;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Benchmark, NewStage, NormalizationSession, NormalizationStage, SessionStatus};

/// Case/whitespace folding applied before exact name comparison.
pub fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Persistence contract for normalization sessions and their stage trail.
///
/// `append_stage` and `revert_to_stage` are atomic: a reader never observes
/// a stage row without the matching canonical-name update, or vice versa.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, record_ref: i64, original_name: &str) -> Result<NormalizationSession>;
    fn get_session(&self, session_id: i64) -> Result<Option<NormalizationSession>>;
    fn append_stage(&self, session_id: i64, stage: NewStage) -> Result<NormalizationStage>;
    fn history(&self, session_id: i64) -> Result<Vec<NormalizationStage>>;
    fn revert_to_stage(&self, session_id: i64, target_stage_id: i64) -> Result<NormalizationSession>;
    fn update_canonical_name(&self, session_id: i64, name: &str) -> Result<()>;
    fn update_status(&self, session_id: i64, status: SessionStatus) -> Result<()>;
    fn set_stage_category(&self, stage_id: i64, category: &serde_json::Value) -> Result<()>;
    /// Best-effort category back-fill into the downstream record.
    fn backfill_record_category(&self, record_ref: i64, category: &str) -> Result<()>;
}

/// Persistence contract for curated benchmark records.
pub trait BenchmarkStore: Send + Sync {
    fn get(&self, id: &Uuid) -> Result<Option<Benchmark>>;
    /// Exact match on the folded canonical name or any folded variation.
    fn find_exact(&self, name: &str, entity_type: &str) -> Result<Option<Benchmark>>;
    fn list_active(&self, entity_type: &str) -> Result<Vec<Benchmark>>;
    fn list(
        &self,
        entity_type: Option<&str>,
        active_only: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Benchmark>>;
    fn create(&self, benchmark: &Benchmark) -> Result<()>;
    fn update(&self, benchmark: &Benchmark) -> Result<()>;
    /// Soft delete: clears the active flag, keeps the row.
    fn soft_delete(&self, id: &Uuid) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_name_collapses_case_and_whitespace() {
        assert_eq!(fold_name("  ООО\t«Ромашка»   Плюс "), "ооо «ромашка» плюс");
        assert_eq!(fold_name("Болт М6х20"), fold_name("болт  м6х20"));
    }
}

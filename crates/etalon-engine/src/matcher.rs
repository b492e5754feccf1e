use std::sync::Arc;

use etalon_core::{Benchmark, BenchmarkStore};
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::similarity::SimilarityEngine;

/// Default acceptance threshold for a fuzzy benchmark hit.
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.82;

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkMatch {
    pub benchmark: Benchmark,
    pub score: f64,
    pub exact: bool,
}

/// Authoritative lookup of the canonical name for an entity type. Cheap, so
/// it always runs before the AI corrector; callers must not reach for AI
/// when this returns a match.
pub struct BenchmarkMatcher {
    store: Arc<dyn BenchmarkStore>,
    similarity: Arc<SimilarityEngine>,
    accept_threshold: f64,
}

impl BenchmarkMatcher {
    pub fn new(store: Arc<dyn BenchmarkStore>, similarity: Arc<SimilarityEngine>) -> Self {
        Self {
            store,
            similarity,
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Exact match on the folded canonical name or any variation first, then
    /// the best fuzzy hit at or above the acceptance threshold. Ties break
    /// exact > higher score > most recently created benchmark.
    pub fn find_best_match(&self, name: &str, entity_type: &str) -> Result<Option<BenchmarkMatch>> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }
        if entity_type.trim().is_empty() {
            return Err(EngineError::Validation(
                "entity type must not be empty".to_string(),
            ));
        }

        if let Some(benchmark) = self.store.find_exact(name, entity_type)? {
            return Ok(Some(BenchmarkMatch {
                benchmark,
                score: 1.0,
                exact: true,
            }));
        }

        // list_active comes back newest-first, so on equal scores the more
        // recently created benchmark wins by keeping the first candidate
        let mut best: Option<BenchmarkMatch> = None;
        for benchmark in self.store.list_active(entity_type)? {
            let mut benchmark_score = 0.0f64;
            for variation in &benchmark.variations {
                let score = self.similarity.score(name, variation, None)?;
                benchmark_score = benchmark_score.max(score);
            }
            let better = match &best {
                Some(current) => benchmark_score > current.score,
                None => true,
            };
            if better {
                best = Some(BenchmarkMatch {
                    benchmark,
                    score: benchmark_score,
                    exact: false,
                });
            }
        }

        match best {
            Some(hit) if hit.score >= self.accept_threshold => {
                debug!(
                    score = hit.score,
                    benchmark = %hit.benchmark.canonical_name,
                    "fuzzy benchmark hit"
                );
                Ok(Some(hit))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etalon_core::Database;

    fn seeded_store() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        let mut bolt = Benchmark::new("nomenclature", "Болт М6х20");
        bolt.push_variation("Болт М6х20 оцинкованный");
        db.create(&bolt).unwrap();
        let cable = Benchmark::new("nomenclature", "Кабель ВВГ 3х2.5");
        db.create(&cable).unwrap();
        let firm = Benchmark::new("counterparty", "ООО Ромашка");
        db.create(&firm).unwrap();
        Arc::new(db)
    }

    #[test]
    fn exact_hit_wins_with_full_score() {
        let store = seeded_store();
        let matcher = BenchmarkMatcher::new(store, Arc::new(SimilarityEngine::new(100)));

        let hit = matcher.find_best_match("болт  м6х20", "nomenclature").unwrap().unwrap();
        assert!(hit.exact);
        assert_eq!(hit.score, 1.0);
        assert_eq!(hit.benchmark.canonical_name, "Болт М6х20");
    }

    #[test]
    fn fuzzy_hit_above_threshold() {
        let store = seeded_store();
        let matcher = BenchmarkMatcher::new(store, Arc::new(SimilarityEngine::new(100)))
            .with_threshold(0.7);

        let hit = matcher
            .find_best_match("Болт М6х20 оцинкованый", "nomenclature")
            .unwrap()
            .unwrap();
        assert!(!hit.exact);
        assert!(hit.score >= 0.7);
        assert_eq!(hit.benchmark.canonical_name, "Болт М6х20");
    }

    #[test]
    fn below_threshold_is_not_found() {
        let store = seeded_store();
        let matcher = BenchmarkMatcher::new(store, Arc::new(SimilarityEngine::new(100)));

        let miss = matcher.find_best_match("Совершенно другой товар", "nomenclature").unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn entity_type_isolates_benchmarks() {
        let store = seeded_store();
        let matcher = BenchmarkMatcher::new(store, Arc::new(SimilarityEngine::new(100)));

        let miss = matcher.find_best_match("Болт М6х20", "counterparty").unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn empty_inputs_fail_validation() {
        let store = seeded_store();
        let matcher = BenchmarkMatcher::new(store, Arc::new(SimilarityEngine::new(100)));

        assert!(matcher.find_best_match("  ", "nomenclature").is_err());
        assert!(matcher.find_best_match("Болт", "").is_err());
    }
}

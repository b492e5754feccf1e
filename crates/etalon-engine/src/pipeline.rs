use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use etalon_core::{
    NewStage, NormalizationSession, NormalizationStage, SessionStore, StageKind,
};
use serde::Serialize;
use tracing::warn;

use crate::ai::NameCorrector;
use crate::error::{EngineError, Result};
use crate::matcher::BenchmarkMatcher;
use crate::patterns::PatternDetector;

// ─── results ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub kind: StageKind,
    pub output_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Structured outcome of every pipeline operation. Serialization to any
/// loose map format happens at the caller's boundary, not here.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: i64,
    pub current_name: String,
    pub stage_count: u32,
    pub status: etalon_core::SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<StageSummary>,
}

// ─── NormalizationPipeline ─────────────────────────────────

/// Versioned normalization state machine. Every mutating operation appends
/// an immutable stage and fixes the session's canonical name in the same
/// store transaction; a per-session lock serializes concurrent appends while
/// different sessions proceed independently.
pub struct NormalizationPipeline {
    store: Arc<dyn SessionStore>,
    detector: PatternDetector,
    matcher: Option<BenchmarkMatcher>,
    corrector: Option<Arc<dyn NameCorrector>>,
    entity_type: String,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl NormalizationPipeline {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            detector: PatternDetector::new(),
            matcher: None,
            corrector: None,
            entity_type: "nomenclature".to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Benchmark lookup tried before any AI call.
    pub fn with_matcher(mut self, matcher: BenchmarkMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn NameCorrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }

    fn session_lock(&self, session_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(session_id).or_default())
    }

    fn load_session(&self, session_id: i64) -> Result<NormalizationSession> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))
    }

    fn result_for(
        &self,
        session: NormalizationSession,
        last_stage: Option<&NormalizationStage>,
    ) -> SessionResult {
        SessionResult {
            session_id: session.id,
            current_name: session.current_name,
            stage_count: session.stage_count,
            status: session.status,
            last_stage: last_stage.map(|stage| StageSummary {
                kind: stage.kind,
                output_name: stage.output_name.clone(),
                confidence: stage.confidence,
            }),
        }
    }

    /// Create a session at its initial state: canonical name = original name.
    pub fn start_session(&self, record_ref: i64, original_name: &str) -> Result<SessionResult> {
        if original_name.trim().is_empty() {
            return Err(EngineError::Validation(
                "original name must not be empty".to_string(),
            ));
        }
        let session = self.store.create_session(record_ref, original_name)?;
        Ok(self.result_for(session, None))
    }

    /// Run pattern detection and fixes over the current name. A stage is
    /// appended even when nothing changed — the audit trail records the
    /// no-op.
    pub async fn apply_patterns(&self, session_id: i64) -> Result<SessionResult> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let session = self.load_session(session_id)?;
        let input = session.current_name.clone();
        let output = self.detector.fix(&input);

        let stage = self
            .store
            .append_stage(session_id, NewStage::pattern(input, output))?;
        let session = self.load_session(session_id)?;
        Ok(self.result_for(session, Some(&stage)))
    }

    /// Benchmark lookup first; only on a miss is the AI corrector invoked.
    /// Requires a configured corrector with an available credential.
    pub async fn apply_ai_correction(
        &self,
        session_id: i64,
        use_chat: bool,
        context: &[String],
    ) -> Result<SessionResult> {
        let corrector = self
            .corrector
            .as_ref()
            .ok_or_else(|| {
                EngineError::Validation("AI corrector is not configured".to_string())
            })?
            .clone();
        if !corrector.is_available() {
            return Err(EngineError::Validation(
                "AI credential is not available".to_string(),
            ));
        }

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let session = self.load_session(session_id)?;
        let input = session.current_name.clone();

        let benchmark_hit = match &self.matcher {
            Some(matcher) => matcher.find_best_match(&input, &self.entity_type)?,
            None => None,
        };

        let stage = match benchmark_hit {
            Some(hit) => {
                let confidence = if hit.exact { 1.0 } else { hit.score };
                NewStage::ai(input, hit.benchmark.canonical_name.clone(), confidence)
            }
            None => {
                let chat_context: &[String] = if use_chat { context } else { &[] };
                let correction = corrector.correct(&input, chat_context).await?;
                NewStage::ai(input, correction.normalized_name, correction.confidence)
            }
        };

        let stage = self.store.append_stage(session_id, stage)?;
        let session = self.load_session(session_id)?;
        Ok(self.result_for(session, Some(&stage)))
    }

    /// Merge a category tag onto the latest stage. Never changes the
    /// canonical name; the record back-fill is best-effort.
    pub async fn apply_categorization(
        &self,
        session_id: i64,
        category: &str,
    ) -> Result<SessionResult> {
        if category.trim().is_empty() {
            return Err(EngineError::Validation("category must not be empty".to_string()));
        }

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let session = self.load_session(session_id)?;
        let history = self.store.history(session_id)?;
        let Some(last) = history.last() else {
            return Err(EngineError::Validation(
                "session has no stages to categorize".to_string(),
            ));
        };

        let merged = match &last.category {
            Some(previous) => serde_json::json!({
                "category": category,
                "previous": previous,
            }),
            None => serde_json::json!({ "category": category }),
        };
        self.store.set_stage_category(last.id, &merged)?;

        if let Err(err) = self
            .store
            .backfill_record_category(session.record_ref, category)
        {
            warn!(record_ref = session.record_ref, error = %err, "category back-fill skipped");
        }

        let history = self.store.history(session_id)?;
        let session = self.load_session(session_id)?;
        Ok(self.result_for(session, history.last()))
    }

    /// Move the canonical name back to the indexed stage's output. Later
    /// stages stay in the trail; a failed revert leaves the session as-is.
    pub async fn revert_to_stage(&self, session_id: i64, stage_index: usize) -> Result<SessionResult> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        self.load_session(session_id)?;
        let history = self.store.history(session_id)?;
        if stage_index >= history.len() {
            return Err(EngineError::Validation(format!(
                "stage index {stage_index} out of range, session has {} stages",
                history.len()
            )));
        }
        let target = &history[stage_index];

        let session = self.store.revert_to_stage(session_id, target.id)?;
        Ok(self.result_for(session, Some(target)))
    }

    pub fn history(&self, session_id: i64) -> Result<Vec<NormalizationStage>> {
        // ensure NotFound for an absent session rather than an empty trail
        self.load_session(session_id)?;
        Ok(self.store.history(session_id)?)
    }

    pub fn session(&self, session_id: i64) -> Result<NormalizationSession> {
        self.load_session(session_id)
    }

    pub fn current_name(&self, session_id: i64) -> Result<String> {
        Ok(self.load_session(session_id)?.current_name)
    }
}

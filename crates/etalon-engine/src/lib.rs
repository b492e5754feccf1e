//! Etalon Engine — normalization pipeline, hybrid similarity, duplicate
//! resolution, quality scoring.

pub mod ai;
pub mod duplicates;
pub mod error;
pub mod matcher;
pub mod patterns;
pub mod pipeline;
pub mod quality;
pub mod similarity;
pub mod state;

pub use ai::{
    AiCorrection, AiCorrector, CacheStats, CallStats, CorrectionSuggestion, CredentialSource,
    NameCorrector, PatternAwareCorrector, StatsCollector,
};
pub use duplicates::{
    DetectionOptions, DetectionTask, DuplicateDetectionCoordinator, RecordSource, TaskStatus,
};
pub use error::{EngineError, Result};
pub use matcher::{BenchmarkMatch, BenchmarkMatcher};
pub use patterns::{PatternDetector, PatternKind, PatternMatch, PatternSeverity, PatternSummary};
pub use pipeline::{NormalizationPipeline, SessionResult, StageSummary};
pub use quality::{EntityQuality, QualityScorer, QualitySummary, SeverityCounts};
pub use similarity::{ScoreBreakdown, SimilarityEngine, SimilarityWeights, MAX_BATCH_PAIRS};
pub use state::{RunState, RunStatus};

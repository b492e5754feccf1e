mod benchmark;
mod quality;
mod session;

pub use benchmark::Benchmark;
pub use quality::{MetricCategory, QualityIssue, QualityMetric, Severity};
pub use session::{
    NewStage, NormalizationSession, NormalizationStage, SessionStatus, StageKind,
};

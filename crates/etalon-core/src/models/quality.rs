use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Severity ──────────────────────────────────────────────

/// Issue severity buckets. Rows can carry arbitrary strings, so parsing
/// is fallible and the scorer decides what to do with strays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

// ─── MetricCategory ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Completeness,
    Consistency,
    Uniqueness,
    Validity,
}

impl MetricCategory {
    pub const ALL: [Self; 4] = [
        Self::Completeness,
        Self::Consistency,
        Self::Uniqueness,
        Self::Validity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Consistency => "consistency",
            Self::Uniqueness => "uniqueness",
            Self::Validity => "validity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completeness" => Some(Self::Completeness),
            "consistency" => Some(Self::Consistency),
            "uniqueness" => Some(Self::Uniqueness),
            "validity" => Some(Self::Validity),
            _ => None,
        }
    }
}

// ─── QualityMetric / QualityIssue ──────────────────────────

/// One scored observation written by the quality analyzer. The engine only
/// reads these. Category and severity stay raw strings here: rows come from
/// databases the analyzer version may be ahead of or behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetric {
    pub id: i64,
    /// Metric name; entity-type rollups key off keywords inside it.
    pub name: String,
    pub category: String,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub id: i64,
    pub entity_ref: i64,
    pub description: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_is_strict_uppercase() {
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("critical"), None);
        assert_eq!(Severity::parse("WARN"), None);
    }

    #[test]
    fn category_roundtrip() {
        for category in MetricCategory::ALL {
            assert_eq!(MetricCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(MetricCategory::parse("novelty"), None);
    }
}

use std::collections::HashMap;

use etalon_core::{MetricCategory, QualityIssue, QualityMetric, Severity};
use serde::Serialize;
use tracing::warn;

// ─── results ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Per-entity-type rollup of the four metric categories. A category the
/// entity has no metric for stays at 0.0 and is excluded from the overall
/// average rather than dragging it down.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EntityQuality {
    pub completeness: f64,
    pub consistency: f64,
    pub uniqueness: f64,
    pub validity: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualitySummary {
    pub overall_score: f64,
    pub severity_counts: SeverityCounts,
    pub category_averages: HashMap<String, f64>,
    pub entity_rollups: HashMap<String, EntityQuality>,
}

// ─── QualityScorer ─────────────────────────────────────────

/// Pure aggregation over analyzer-written metrics and issues. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Arithmetic mean of all metric values; 0.0 for an empty set.
    pub fn overall_score(&self, metrics: &[QualityMetric]) -> f64 {
        if metrics.is_empty() {
            return 0.0;
        }
        metrics.iter().map(|m| m.value).sum::<f64>() / metrics.len() as f64
    }

    /// Bucket issues by severity. Unrecognized labels are logged and
    /// skipped, never counted into a wrong bucket.
    pub fn severity_counts(&self, issues: &[QualityIssue]) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for issue in issues {
            match Severity::parse(&issue.severity) {
                Some(Severity::Critical) => counts.critical += 1,
                Some(Severity::High) => counts.high += 1,
                Some(Severity::Medium) => counts.medium += 1,
                Some(Severity::Low) => counts.low += 1,
                None => {
                    warn!(severity = %issue.severity, issue = issue.id, "unknown issue severity, skipping");
                }
            }
        }
        counts
    }

    /// True per-category averages keyed by the raw category label.
    pub fn category_averages(&self, metrics: &[QualityMetric]) -> HashMap<String, f64> {
        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for metric in metrics {
            let entry = sums.entry(metric.category.clone()).or_insert((0.0, 0));
            entry.0 += metric.value;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(category, (sum, count))| (category, sum / count as f64))
            .collect()
    }

    /// Group metrics by the entity type inferred from the metric name and
    /// roll the known categories up per entity.
    pub fn entity_rollups(&self, metrics: &[QualityMetric]) -> HashMap<String, EntityQuality> {
        let mut rollups: HashMap<String, EntityQuality> = HashMap::new();
        for metric in metrics {
            let entity = entity_type_of(&metric.name);
            let rollup = rollups.entry(entity.to_string()).or_default();
            match MetricCategory::parse(&metric.category) {
                Some(MetricCategory::Completeness) => rollup.completeness = metric.value,
                Some(MetricCategory::Consistency) => rollup.consistency = metric.value,
                Some(MetricCategory::Uniqueness) => rollup.uniqueness = metric.value,
                Some(MetricCategory::Validity) => rollup.validity = metric.value,
                None => {
                    warn!(category = %metric.category, metric = %metric.name, "unknown metric category, skipping rollup");
                }
            }
        }

        for rollup in rollups.values_mut() {
            rollup.overall = nonzero_mean(&[
                rollup.completeness,
                rollup.consistency,
                rollup.uniqueness,
                rollup.validity,
            ]);
        }
        rollups
    }

    pub fn summarize(&self, metrics: &[QualityMetric], issues: &[QualityIssue]) -> QualitySummary {
        QualitySummary {
            overall_score: self.overall_score(metrics),
            severity_counts: self.severity_counts(issues),
            category_averages: self.category_averages(metrics),
            entity_rollups: self.entity_rollups(metrics),
        }
    }
}

/// Keyword heuristic over the metric name.
fn entity_type_of(metric_name: &str) -> &'static str {
    let lower = metric_name.to_lowercase();
    if lower.contains("nomenclature") {
        "nomenclature"
    } else if lower.contains("counterparty") {
        "counterparty"
    } else {
        "unknown"
    }
}

/// Mean over the nonzero entries; 0.0 when all are absent.
fn nonzero_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| **value > 0.0)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(name: &str, category: &str, value: f64) -> QualityMetric {
        QualityMetric {
            id: 0,
            name: name.to_string(),
            category: category.to_string(),
            value,
            measured_at: Utc::now(),
        }
    }

    fn issue(severity: &str) -> QualityIssue {
        QualityIssue {
            id: 0,
            entity_ref: 1,
            description: "test".to_string(),
            severity: severity.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_metrics_score_zero_not_error() {
        assert_eq!(QualityScorer::new().overall_score(&[]), 0.0);
    }

    #[test]
    fn overall_is_the_plain_mean() {
        let metrics = vec![
            metric("nomenclature_completeness", "completeness", 0.8),
            metric("nomenclature_validity", "validity", 0.4),
        ];
        let score = QualityScorer::new().overall_score(&metrics);
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn unknown_severities_are_skipped() {
        let issues = vec![
            issue("CRITICAL"),
            issue("HIGH"),
            issue("HIGH"),
            issue("WARN"),
            issue("low"),
        ];
        let counts = QualityScorer::new().severity_counts(&issues);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.high, 2);
        assert_eq!(counts.medium, 0);
        assert_eq!(counts.low, 0, "lowercase label is not a valid severity");
    }

    #[test]
    fn category_averages_are_true_means() {
        let metrics = vec![
            metric("a", "completeness", 0.9),
            metric("b", "completeness", 0.5),
            metric("c", "validity", 1.0),
        ];
        let averages = QualityScorer::new().category_averages(&metrics);
        assert!((averages["completeness"] - 0.7).abs() < 1e-9);
        assert!((averages["validity"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn entity_rollups_exclude_absent_categories() {
        let metrics = vec![
            metric("nomenclature_completeness", "completeness", 0.8),
            metric("nomenclature_uniqueness", "uniqueness", 0.6),
            metric("counterparty_validity", "validity", 0.9),
            metric("orphan_metric", "consistency", 0.5),
        ];
        let rollups = QualityScorer::new().entity_rollups(&metrics);

        let nomenclature = rollups["nomenclature"];
        assert!((nomenclature.overall - 0.7).abs() < 1e-9, "mean of the two present categories");
        assert_eq!(nomenclature.validity, 0.0);

        let counterparty = rollups["counterparty"];
        assert!((counterparty.overall - 0.9).abs() < 1e-9);

        assert!((rollups["unknown"].overall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn summary_composes_all_parts() {
        let metrics = vec![metric("nomenclature_completeness", "completeness", 1.0)];
        let issues = vec![issue("MEDIUM")];
        let summary = QualityScorer::new().summarize(&metrics, &issues);
        assert_eq!(summary.overall_score, 1.0);
        assert_eq!(summary.severity_counts.medium, 1);
        assert_eq!(summary.entity_rollups.len(), 1);
    }
}

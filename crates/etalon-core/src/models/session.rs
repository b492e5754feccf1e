use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── SessionStatus ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Reverted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Reverted => "reverted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "reverted" => Some(Self::Reverted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── StageKind ─────────────────────────────────────────────

/// Kind of a normalization stage in a session's audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    #[serde(rename = "pattern")]
    Pattern,
    #[serde(rename = "ai")]
    Ai,
    #[serde(rename = "categorization")]
    Categorization,
    #[serde(rename = "revert-marker")]
    RevertMarker,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Ai => "ai",
            Self::Categorization => "categorization",
            Self::RevertMarker => "revert-marker",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pattern" => Some(Self::Pattern),
            "ai" => Some(Self::Ai),
            "categorization" => Some(Self::Categorization),
            "revert-marker" => Some(Self::RevertMarker),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── NormalizationSession ──────────────────────────────────

/// One normalization run for a single source record. Never physically
/// deleted; revert only flips the status and repositions the current name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationSession {
    pub id: i64,
    /// The source record this session normalizes.
    pub record_ref: i64,
    pub original_name: String,
    pub current_name: String,
    pub stage_count: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── NormalizationStage ────────────────────────────────────

/// One immutable step in a session's audit trail. Ordinals grow
/// monotonically and are never renumbered, including after a revert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationStage {
    pub id: i64,
    pub session_id: i64,
    pub ordinal: u32,
    pub kind: StageKind,
    pub input_name: String,
    pub output_name: String,
    /// Unset for deterministic stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Structured category tag, merged in by categorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Stage payload before it has been persisted and given an id/ordinal.
#[derive(Debug, Clone)]
pub struct NewStage {
    pub kind: StageKind,
    pub input_name: String,
    pub output_name: String,
    pub confidence: Option<f64>,
    pub category: Option<serde_json::Value>,
}

impl NewStage {
    pub fn pattern(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Pattern,
            input_name: input.into(),
            output_name: output.into(),
            confidence: None,
            category: None,
        }
    }

    pub fn ai(input: impl Into<String>, output: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: StageKind::Ai,
            input_name: input.into(),
            output_name: output.into(),
            confidence: Some(confidence),
            category: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_kind_roundtrip() {
        for kind in [
            StageKind::Pattern,
            StageKind::Ai,
            StageKind::Categorization,
            StageKind::RevertMarker,
        ] {
            assert_eq!(StageKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            let restored: StageKind = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, kind);
        }
        assert_eq!(StageKind::RevertMarker.as_str(), "revert-marker");
        assert_eq!(StageKind::parse("unknown"), None);
    }

    #[test]
    fn session_status_roundtrip() {
        assert_eq!(SessionStatus::parse("active"), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::parse("reverted"), Some(SessionStatus::Reverted));
        assert_eq!(SessionStatus::parse(""), None);
    }

    #[test]
    fn new_stage_constructors() {
        let stage = NewStage::pattern("a", "b");
        assert_eq!(stage.kind, StageKind::Pattern);
        assert!(stage.confidence.is_none());

        let stage = NewStage::ai("a", "b", 0.9);
        assert_eq!(stage.confidence, Some(0.9));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A curated canonical reference record. Matched against by exact or fuzzy
/// name over its variation set; deactivated via the flag, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: Uuid,
    pub entity_type: String,
    pub canonical_name: String,
    /// Accepted spellings. Non-empty; the first entry is the canonical name.
    pub variations: Vec<String>,
    /// Free-form attributes carried over from the curated source rows.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_upload_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_client_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Benchmark {
    pub fn new(entity_type: impl Into<String>, canonical_name: impl Into<String>) -> Self {
        let canonical_name = canonical_name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            variations: vec![canonical_name.clone()],
            canonical_name,
            attributes: serde_json::Map::new(),
            source_upload_id: None,
            source_client_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a variation, keeping the set unique and the canonical first.
    pub fn push_variation(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name.is_empty() || self.variations.iter().any(|v| v == &name) {
            return;
        }
        self.variations.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_is_first_variation() {
        let mut benchmark = Benchmark::new("nomenclature", "Болт М6х20");
        benchmark.push_variation("Болт M6x20");
        benchmark.push_variation("Болт М6х20"); // duplicate, ignored
        benchmark.push_variation("");

        assert_eq!(benchmark.variations.len(), 2);
        assert_eq!(benchmark.variations[0], benchmark.canonical_name);
    }

    #[test]
    fn serde_roundtrip() {
        let benchmark = Benchmark::new("counterparty", "ООО Ромашка");
        let json = serde_json::to_string(&benchmark).unwrap();
        let restored: Benchmark = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, benchmark.id);
        assert_eq!(restored.canonical_name, "ООО Ромашка");
        assert!(restored.is_active);
    }
}

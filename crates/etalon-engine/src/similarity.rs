use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use etalon_core::fold_name;
use rphonetic::{DoubleMetaphone, Encoder};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{EngineError, Result};

/// Hard ceiling on the number of pairs accepted by one batch call.
pub const MAX_BATCH_PAIRS: usize = 1000;

// ─── SimilarityWeights ─────────────────────────────────────

/// Weights for the four hybrid sub-scores. The default set sums to 1.0;
/// caller-supplied sets are used as-is — no forced renormalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub jaro_winkler: f64,
    pub lcs: f64,
    pub trigram: f64,
    pub phonetic: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            jaro_winkler: 0.4,
            lcs: 0.25,
            trigram: 0.2,
            phonetic: 0.15,
        }
    }
}

impl SimilarityWeights {
    fn validate(&self) -> Result<()> {
        let all = [self.jaro_winkler, self.lcs, self.trigram, self.phonetic];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Validation(
                "similarity weights must be finite and non-negative".to_string(),
            ));
        }
        if all.iter().sum::<f64>() == 0.0 {
            return Err(EngineError::Validation(
                "at least one similarity weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable fingerprint for cache keying.
    fn fingerprint(&self) -> u64 {
        let mut acc = 0xcbf2_9ce4_8422_2325u64;
        for bits in [
            self.jaro_winkler.to_bits(),
            self.lcs.to_bits(),
            self.trigram.to_bits(),
            self.phonetic.to_bits(),
        ] {
            acc ^= bits;
            acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
        }
        acc
    }
}

/// Per-algorithm sub-scores plus the weighted hybrid.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreBreakdown {
    pub jaro_winkler: f64,
    pub lcs: f64,
    pub trigram: f64,
    pub phonetic: f64,
    pub hybrid: f64,
}

// ─── score cache ───────────────────────────────────────────

struct ScoreCache {
    map: HashMap<(String, String, u64), (f64, u64)>,
    capacity: usize,
    counter: u64,
}

impl ScoreCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity: capacity.max(1),
            counter: 0,
        }
    }

    fn get(&mut self, key: &(String, String, u64)) -> Option<f64> {
        self.counter += 1;
        let counter = self.counter;
        self.map.get_mut(key).map(|entry| {
            entry.1 = counter;
            entry.0
        })
    }

    fn insert(&mut self, key: (String, String, u64), score: f64) {
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            // evict the least recently touched entry
            if let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&oldest);
            }
        }
        self.counter += 1;
        self.map.insert(key, (score, self.counter));
    }
}

// ─── SimilarityEngine ──────────────────────────────────────

/// Weighted hybrid string similarity over four algorithms, with a bounded,
/// concurrency-safe result cache. Scores are symmetric in their arguments.
pub struct SimilarityEngine {
    default_weights: SimilarityWeights,
    cache: Mutex<ScoreCache>,
}

impl SimilarityEngine {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            default_weights: SimilarityWeights::default(),
            cache: Mutex::new(ScoreCache::new(cache_capacity)),
        }
    }

    pub fn with_weights(mut self, weights: SimilarityWeights) -> Self {
        self.default_weights = weights;
        self
    }

    pub fn default_weights(&self) -> SimilarityWeights {
        self.default_weights
    }

    /// Hybrid score in [0, 1]. Two empty inputs are a validation error;
    /// one empty input scores 0.0 against anything non-empty.
    pub fn score(&self, a: &str, b: &str, weights: Option<&SimilarityWeights>) -> Result<f64> {
        let weights = weights.copied().unwrap_or(self.default_weights);
        weights.validate()?;

        let left = fold(a);
        let right = fold(b);
        if left.is_empty() && right.is_empty() {
            return Err(EngineError::Validation(
                "similarity of two empty strings is undefined".to_string(),
            ));
        }

        // symmetric cache key: order the pair
        let key = if left <= right {
            (left.clone(), right.clone(), weights.fingerprint())
        } else {
            (right.clone(), left.clone(), weights.fingerprint())
        };
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Ok(cached);
        }

        let score = combine(&breakdown(&left, &right), &weights);
        self.cache.lock().unwrap().insert(key, score);
        Ok(score)
    }

    /// Like `score`, plus the per-algorithm sub-scores. Not cached.
    pub fn score_detailed(
        &self,
        a: &str,
        b: &str,
        weights: Option<&SimilarityWeights>,
    ) -> Result<ScoreBreakdown> {
        let weights = weights.copied().unwrap_or(self.default_weights);
        weights.validate()?;

        let left = fold(a);
        let right = fold(b);
        if left.is_empty() && right.is_empty() {
            return Err(EngineError::Validation(
                "similarity of two empty strings is undefined".to_string(),
            ));
        }

        let mut parts = breakdown(&left, &right);
        parts.hybrid = combine(&parts, &weights);
        Ok(parts)
    }

    /// Score every pair; rejects an empty list and more than
    /// `MAX_BATCH_PAIRS` pairs. Returns the scores and the cache entry count
    /// after the batch.
    pub fn batch_score(
        &self,
        pairs: &[(String, String)],
        weights: Option<&SimilarityWeights>,
    ) -> Result<(Vec<f64>, usize)> {
        if pairs.is_empty() {
            return Err(EngineError::Validation(
                "pair list must not be empty".to_string(),
            ));
        }
        if pairs.len() > MAX_BATCH_PAIRS {
            return Err(EngineError::Validation(format!(
                "at most {MAX_BATCH_PAIRS} pairs allowed per batch, got {}",
                pairs.len()
            )));
        }

        let mut scores = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            scores.push(self.score(a, b, weights)?);
        }
        Ok((scores, self.cache_len()))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().map.len()
    }

    pub fn clear_cache(&self) -> usize {
        let mut cache = self.cache.lock().unwrap();
        let evicted = cache.map.len();
        cache.map.clear();
        evicted
    }
}

fn combine(parts: &ScoreBreakdown, weights: &SimilarityWeights) -> f64 {
    let weighted = parts.jaro_winkler * weights.jaro_winkler
        + parts.lcs * weights.lcs
        + parts.trigram * weights.trigram
        + parts.phonetic * weights.phonetic;
    weighted.clamp(0.0, 1.0)
}

fn breakdown(left: &str, right: &str) -> ScoreBreakdown {
    ScoreBreakdown {
        jaro_winkler: strsim::jaro_winkler(left, right),
        lcs: lcs_ratio(left, right),
        trigram: trigram_similarity(left, right),
        phonetic: phonetic_similarity(left, right),
        hybrid: 0.0,
    }
}

/// Case/whitespace folding shared by all sub-algorithms.
fn fold(s: &str) -> String {
    fold_name(s)
}

/// Longest-common-subsequence length ratio: 2·lcs / (|a| + |b|).
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let left: Vec<char> = a.chars().collect();
    let right: Vec<char> = b.chars().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; right.len() + 1];
    let mut row = vec![0usize; right.len() + 1];
    for lc in &left {
        for (j, rc) in right.iter().enumerate() {
            row[j + 1] = if lc == rc {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    let lcs = prev[right.len()];
    2.0 * lcs as f64 / (left.len() + right.len()) as f64
}

/// Character-trigram Jaccard similarity. Short strings fall back to a
/// character-set Jaccard so that tiny names still compare meaningfully.
fn trigram_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let left = char_ngrams(a, 3);
    let right = char_ngrams(b, 3);
    if left.is_empty() || right.is_empty() {
        let left: HashSet<char> = a.chars().collect();
        let right: HashSet<char> = b.chars().collect();
        return jaccard(&left, &right);
    }
    jaccard(&left, &right)
}

fn char_ngrams(s: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < n {
        return HashSet::new();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

fn jaccard<T: std::hash::Hash + Eq>(left: &HashSet<T>, right: &HashSet<T>) -> f64 {
    let intersection = left.intersection(right).count();
    let union = left.union(right).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Phonetic signal: DoubleMetaphone over a Latin transliteration. Equal
/// codes score 1.0; otherwise the codes themselves are compared with
/// Jaro-Winkler so near-misses still contribute.
fn phonetic_similarity(a: &str, b: &str) -> f64 {
    let left = transliterate(a);
    let right = transliterate(b);
    if left.is_empty() || right.is_empty() {
        // no phonetic content (digits, punctuation); fall back to equality
        return if a == b { 1.0 } else { 0.0 };
    }

    let encoder = DoubleMetaphone::default();
    let code_left = encoder.encode(&left);
    let code_right = encoder.encode(&right);
    if code_left.is_empty() || code_right.is_empty() {
        return if left == right { 1.0 } else { 0.0 };
    }
    if code_left == code_right {
        return 1.0;
    }
    strsim::jaro_winkler(&code_left, &code_right)
}

/// Cyrillic-to-Latin transliteration feeding the phonetic encoder; keeps
/// ASCII letters, drops digits and punctuation, collapses whitespace.
fn transliterate(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.nfd() {
        for lc in ch.to_lowercase() {
            if lc.is_ascii_alphabetic() {
                out.push(lc);
                continue;
            }
            if lc.is_whitespace() {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
                continue;
            }
            let mapped = match lc {
                'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d",
                'е' | 'ё' | 'э' => "e", 'ж' => "zh", 'з' => "z", 'и' | 'й' => "i",
                'к' => "k", 'л' => "l", 'м' => "m", 'н' => "n", 'о' => "o",
                'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t", 'у' => "u",
                'ф' => "f", 'х' => "h", 'ц' => "ts", 'ч' => "ch", 'ш' => "sh",
                'щ' => "sch", 'ы' => "y", 'ю' => "yu", 'я' => "ya",
                _ => "",
            };
            out.push_str(mapped);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_similarity_is_maximal() {
        let engine = SimilarityEngine::new(100);
        for name in ["Болт М6х20", "ООО Ромашка", "x"] {
            let score = engine.score(name, name, None).unwrap();
            assert!((score - 1.0).abs() < 1e-9, "{name}: {score}");
        }
    }

    #[test]
    fn score_is_symmetric() {
        let engine = SimilarityEngine::new(100);
        let ab = engine.score("ООО Ромашка", "Ромашка ООО", None).unwrap();
        let ba = engine.score("Ромашка ООО", "ООО Ромашка", None).unwrap();
        assert_eq!(ab, ba);
        assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn both_empty_is_an_error_one_empty_is_not() {
        let engine = SimilarityEngine::new(100);
        assert!(matches!(
            engine.score("", "  ", None),
            Err(EngineError::Validation(_))
        ));
        let score = engine.score("", "Болт", None).unwrap();
        assert!((0.0..0.5).contains(&score));
    }

    #[test]
    fn similar_names_score_above_dissimilar_ones() {
        let engine = SimilarityEngine::new(100);
        let close = engine.score("Болт М6х20", "Болт М6x20", None).unwrap();
        let far = engine.score("Болт М6х20", "Кабель ВВГ 3х2.5", None).unwrap();
        assert!(close > far);
        assert!(close > 0.7, "close pair scored {close}");
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = SimilarityWeights::default();
        let sum = w.jaro_winkler + w.lcs + w.trigram + w.phonetic;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn caller_weights_are_used_as_is() {
        let engine = SimilarityEngine::new(100);
        let only_jw = SimilarityWeights { jaro_winkler: 1.0, lcs: 0.0, trigram: 0.0, phonetic: 0.0 };
        let score = engine.score("Болт М6х20", "Болт М6х20 оцинк", Some(&only_jw)).unwrap();
        let expected = strsim::jaro_winkler(&fold("Болт М6х20"), &fold("Болт М6х20 оцинк"));
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_weights_are_rejected() {
        let engine = SimilarityEngine::new(100);
        let bad = SimilarityWeights { jaro_winkler: -0.1, lcs: 0.5, trigram: 0.3, phonetic: 0.3 };
        assert!(engine.score("a", "b", Some(&bad)).is_err());
    }

    #[test]
    fn batch_rules() {
        let engine = SimilarityEngine::new(100);
        let one = vec![("ООО Ромашка".to_string(), "Романша ООО".to_string())];
        let (scores, _) = engine.batch_score(&one, None).unwrap();
        assert_eq!(scores.len(), 1);
        assert!((0.0..=1.0).contains(&scores[0]));

        assert!(matches!(
            engine.batch_score(&[], None),
            Err(EngineError::Validation(_))
        ));

        let oversized: Vec<_> = (0..=MAX_BATCH_PAIRS)
            .map(|i| (format!("a{i}"), format!("b{i}")))
            .collect();
        assert!(matches!(
            engine.batch_score(&oversized, None),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn cache_is_bounded() {
        let engine = SimilarityEngine::new(8);
        for i in 0..50 {
            engine.score(&format!("товар {i}"), "эталон", None).unwrap();
        }
        assert!(engine.cache_len() <= 8);
        let evicted = engine.clear_cache();
        assert!(evicted <= 8);
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn detailed_breakdown_is_consistent() {
        let engine = SimilarityEngine::new(100);
        let parts = engine.score_detailed("Болт М6х20", "Болт М6x20", None).unwrap();
        for sub in [parts.jaro_winkler, parts.lcs, parts.trigram, parts.phonetic, parts.hybrid] {
            assert!((0.0..=1.0).contains(&sub));
        }
        let score = engine.score("Болт М6х20", "Болт М6x20", None).unwrap();
        assert!((parts.hybrid - score).abs() < 1e-9);
    }

    #[test]
    fn phonetic_transliteration_matches_spelling_variants() {
        // same word spelled in Cyrillic and Latin should agree phonetically
        let sim = phonetic_similarity("ромашка", "romashka");
        assert!(sim > 0.9, "phonetic similarity was {sim}");
    }
}

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static STANDARD_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(ГОСТ|ОСТ|ТУ|СТО|DIN|ISO)\b\s*[РP]?\s*(\d+(?:[.\-]\d+)*)?").expect("valid regex")
});
static LEADING_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d{2,}[-_/][\d\w-]*\s+").expect("valid regex"));
static ARTICLE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bарт\.?\s*№?\s*[\w/-]+").expect("valid regex"));
static BOILERPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(б/у|в ассортименте|уценка|некондиция)\b").expect("valid regex"));
static DUP_SEPARATOR_RE: Lazy<Regex> =
    // Rust's `regex` crate (RE2) has no backreferences; match a run of 2+
    // separators and collapse to the first one via the `$1` capture.
    Lazy::new(|| Regex::new(r"([,;/.\-])[,;/.\-]+").expect("valid regex"));
static WRAPPING_QUOTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*["'«](.+)["'»]\s*$"#).expect("valid regex"));
static TRAILING_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s,;.\-]+$").expect("valid regex"));
static ODD_WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\\t\u{00A0}]|  +").expect("valid regex"));

// ─── PatternMatch ──────────────────────────────────────────

/// Kind of structural noise detected in a raw name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Standard designations: ГОСТ/ОСТ/ТУ/СТО/DIN/ISO plus the number.
    StandardCode,
    /// Leading SKU codes and `арт.` markers.
    ArticleCode,
    BoilerplateToken,
    DuplicateSeparator,
    WrappingQuotes,
    TrailingPunctuation,
    OddWhitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected noise pattern. Transient: recomputed on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub severity: PatternSeverity,
    /// The first matching fragment, for display.
    pub fragment: String,
    pub auto_fixable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternSummary {
    pub total: usize,
    pub auto_fixable: usize,
    pub by_kind: HashMap<PatternKind, usize>,
    pub by_severity: HashMap<PatternSeverity, usize>,
}

// ─── PatternDetector ───────────────────────────────────────

/// Deterministic detector for structural noise in raw names. Detection has
/// no side effects and no I/O; fixes apply in a fixed precedence so that
/// `fix(fix(name)) == fix(name)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, name: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();

        // structural patterns first, cosmetic after; fixes run in this order
        for (re, kind, severity) in [
            (&*LEADING_CODE_RE, PatternKind::ArticleCode, PatternSeverity::High),
            (&*ARTICLE_MARKER_RE, PatternKind::ArticleCode, PatternSeverity::High),
            (&*STANDARD_CODE_RE, PatternKind::StandardCode, PatternSeverity::High),
            (&*BOILERPLATE_RE, PatternKind::BoilerplateToken, PatternSeverity::Medium),
            (&*WRAPPING_QUOTES_RE, PatternKind::WrappingQuotes, PatternSeverity::Low),
            (&*DUP_SEPARATOR_RE, PatternKind::DuplicateSeparator, PatternSeverity::Low),
            (&*TRAILING_PUNCT_RE, PatternKind::TrailingPunctuation, PatternSeverity::Low),
            (&*ODD_WHITESPACE_RE, PatternKind::OddWhitespace, PatternSeverity::Low),
        ] {
            if let Some(found) = re.find(name) {
                matches.push(PatternMatch {
                    kind,
                    severity,
                    fragment: found.as_str().to_string(),
                    auto_fixable: true,
                });
            }
        }

        // dedupe ArticleCode reported by both of its regexes
        matches.dedup_by_key(|m| m.kind);

        // a fix that would erase the whole name is not a fix: escalate and
        // refuse to auto-apply
        if !matches.is_empty() && self.apply_fixes(name, &matches).is_empty() {
            for m in &mut matches {
                if matches!(m.kind, PatternKind::StandardCode | PatternKind::ArticleCode) {
                    m.severity = PatternSeverity::Critical;
                    m.auto_fixable = false;
                }
            }
        }

        matches
    }

    /// Apply the auto-fixable subset of `matches` to `name`. Structural/code
    /// fixes run before cosmetic ones; a final trim+collapse keeps repeated
    /// application idempotent.
    pub fn apply_fixes(&self, name: &str, matches: &[PatternMatch]) -> String {
        let mut fixed = name.to_string();

        for kind in [
            PatternKind::ArticleCode,
            PatternKind::StandardCode,
            PatternKind::BoilerplateToken,
            PatternKind::WrappingQuotes,
            PatternKind::DuplicateSeparator,
            PatternKind::TrailingPunctuation,
            PatternKind::OddWhitespace,
        ] {
            if !matches.iter().any(|m| m.kind == kind && m.auto_fixable) {
                continue;
            }
            fixed = match kind {
                PatternKind::ArticleCode => {
                    let pass = LEADING_CODE_RE.replace_all(&fixed, "");
                    ARTICLE_MARKER_RE.replace_all(&pass, "").into_owned()
                }
                PatternKind::StandardCode => STANDARD_CODE_RE.replace_all(&fixed, "").into_owned(),
                PatternKind::BoilerplateToken => BOILERPLATE_RE.replace_all(&fixed, "").into_owned(),
                PatternKind::WrappingQuotes => WRAPPING_QUOTES_RE.replace(&fixed, "$1").into_owned(),
                PatternKind::DuplicateSeparator => DUP_SEPARATOR_RE.replace_all(&fixed, "$1").into_owned(),
                PatternKind::TrailingPunctuation => TRAILING_PUNCT_RE.replace(&fixed, "").into_owned(),
                PatternKind::OddWhitespace => ODD_WHITESPACE_RE.replace_all(&fixed, " ").into_owned(),
            };
        }

        fixed.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Detect and fix until nothing changes. Stripping trailing junk can
    /// expose a wrapping-quote or code pattern that the first pass missed,
    /// and every fix only shrinks the string, so the loop terminates.
    pub fn fix(&self, name: &str) -> String {
        let mut current = name.to_string();
        loop {
            let matches = self.detect(&current);
            let next = self.apply_fixes(&current, &matches);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    pub fn summarize(&self, matches: &[PatternMatch]) -> PatternSummary {
        let mut summary = PatternSummary {
            total: matches.len(),
            ..Default::default()
        };
        for m in matches {
            *summary.by_kind.entry(m.kind).or_insert(0) += 1;
            *summary.by_severity.entry(m.severity).or_insert(0) += 1;
            if m.auto_fixable {
                summary.auto_fixable += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_and_strips_standard_code() {
        let detector = PatternDetector::new();
        let matches = detector.detect("Болт М6х20 ГОСТ 7798-70");
        assert!(matches.iter().any(|m| m.kind == PatternKind::StandardCode && m.auto_fixable));
        assert_eq!(detector.fix("Болт М6х20 ГОСТ 7798-70"), "Болт М6х20");
    }

    #[test]
    fn strips_bare_standard_marker_without_number() {
        let detector = PatternDetector::new();
        assert_eq!(detector.fix("Болт М6х20 ГОСТ"), "Болт М6х20");
    }

    #[test]
    fn strips_leading_article_code() {
        let detector = PatternDetector::new();
        assert_eq!(detector.fix("00-00001234 Гайка М10"), "Гайка М10");
        assert_eq!(detector.fix("Гайка М10 арт. 4523-А"), "Гайка М10");
    }

    #[test]
    fn collapses_noise_and_quotes() {
        let detector = PatternDetector::new();
        assert_eq!(detector.fix("«Кабель  ВВГ,,3х2.5»"), "Кабель ВВГ,3х2.5");
        assert_eq!(detector.fix("Подшипник 6204 б/у ,"), "Подшипник 6204");
    }

    #[test]
    fn fix_is_idempotent() {
        let detector = PatternDetector::new();
        for name in [
            "Болт М6х20 ГОСТ 7798-70",
            "00-00001234 Гайка М10 арт. 99",
            "  «Труба   стальная»  --  б/у ,, ",
            "уже чистое название",
        ] {
            let once = detector.fix(name);
            let twice = detector.fix(&once);
            assert_eq!(once, twice, "fix must be idempotent for {name:?}");
        }
    }

    #[test]
    fn clean_name_has_no_matches() {
        let detector = PatternDetector::new();
        assert!(detector.detect("Болт М6х20").is_empty());
    }

    #[test]
    fn code_only_name_is_critical_and_preserved() {
        let detector = PatternDetector::new();
        let matches = detector.detect("ГОСТ 7798-70");
        assert!(matches.iter().any(|m| m.severity == PatternSeverity::Critical));
        // the destructive fix is not auto-applied
        assert_eq!(detector.fix("ГОСТ 7798-70"), "ГОСТ 7798-70");
    }

    #[test]
    fn summary_counts_by_kind_and_severity() {
        let detector = PatternDetector::new();
        let matches = detector.detect("00-001 Болт ГОСТ 7798-70 б/у ,,");
        let summary = detector.summarize(&matches);
        assert_eq!(summary.total, matches.len());
        assert_eq!(summary.auto_fixable, matches.len());
        assert_eq!(summary.by_kind[&PatternKind::StandardCode], 1);
        assert!(summary.by_severity[&PatternSeverity::High] >= 2);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use etalon_core::AiConfig;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::patterns::PatternDetector;

/// Below this confidence an AI suggestion is flagged for manual review.
const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.75;

// ─── NameCorrector ─────────────────────────────────────────

/// One corrected name from the AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCorrection {
    pub normalized_name: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// The injectable correction seam: production uses `AiCorrector`, tests use
/// counting mocks.
#[async_trait]
pub trait NameCorrector: Send + Sync {
    async fn correct(&self, name: &str, context: &[String]) -> Result<AiCorrection>;

    /// Whether a call can be attempted at all (e.g. a credential exists).
    fn is_available(&self) -> bool {
        true
    }
}

/// Zero-argument credential accessor. Absence degrades, never panics.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

impl CredentialSource for etalon_core::AppConfig {
    fn api_key(&self) -> Option<String> {
        self.ai_api_key()
    }
}

// ─── cache & stats ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub memory_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CallStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub average_latency_ms: f64,
}

struct ResponseCache {
    map: HashMap<String, (AiCorrection, u64)>,
    capacity: usize,
    counter: u64,
    hits: u64,
    misses: u64,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity: capacity.max(1),
            counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, name: &str) -> Option<AiCorrection> {
        self.counter += 1;
        let counter = self.counter;
        match self.map.get_mut(name) {
            Some(entry) => {
                entry.1 = counter;
                self.hits += 1;
                Some(entry.0.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, name: String, correction: AiCorrection) {
        if self.map.len() >= self.capacity && !self.map.contains_key(&name) {
            if let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(key, _)| key.clone())
            {
                self.map.remove(&oldest);
            }
        }
        self.counter += 1;
        self.map.insert(name, (correction, self.counter));
    }

    fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let memory_bytes = self
            .map
            .iter()
            .map(|(key, (value, _))| {
                key.len() + value.normalized_name.len() + value.reasoning.len() + 16
            })
            .sum();
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 },
            entries: self.map.len(),
            memory_bytes,
        }
    }
}

/// Tracks backend calls actually attempted: unavailable-credential failures
/// never reach the network and are not counted here.
#[derive(Default)]
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    total: u64,
    success: u64,
    failed: u64,
    total_latency_ms: f64,
}

impl StatsCollector {
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += 1;
        inner.success += 1;
        inner.total_latency_ms += latency.as_secs_f64() * 1000.0;
    }

    pub fn record_failure(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += 1;
        inner.failed += 1;
        inner.total_latency_ms += latency.as_secs_f64() * 1000.0;
    }

    pub fn snapshot(&self) -> CallStats {
        let inner = self.inner.lock().unwrap();
        CallStats {
            total_calls: inner.total,
            successful_calls: inner.success,
            failed_calls: inner.failed,
            average_latency_ms: if inner.total == 0 {
                0.0
            } else {
                inner.total_latency_ms / inner.total as f64
            },
        }
    }
}

// ─── AiCorrector ───────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Production corrector over an OpenAI-compatible chat endpoint, wrapped
/// with a bounded response cache and a call-stats collector. Usable without
/// a credential: every call then fails fast with `ServiceUnavailable` and
/// the cache/stats readers keep returning zeroed structures.
pub struct AiCorrector {
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    cache: Mutex<ResponseCache>,
    stats: StatsCollector,
}

impl AiCorrector {
    pub fn new(config: &AiConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        Self {
            credentials,
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            cache: Mutex::new(ResponseCache::new(config.cache_capacity)),
            stats: StatsCollector::default(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap().stats()
    }

    pub fn call_stats(&self) -> CallStats {
        self.stats.snapshot()
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.api_key().is_some()
    }

    async fn request(&self, api_key: &str, name: &str, context: &[String]) -> Result<AiCorrection> {
        let mut content = format!(
            "Normalize this item or counterparty name from an accounting export: {name:?}. \
             Reply with JSON: {{\"normalized_name\": string, \"confidence\": number in [0,1], \"reasoning\": string}}."
        );
        if !context.is_empty() {
            content.push_str("\nKnown issues in the raw name:\n");
            for line in context {
                content.push_str("- ");
                content.push_str(line);
                content.push('\n');
            }
        }
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature: 0.1,
        };

        let mut attempt = 0u32;
        loop {
            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status() == 429 => {
                    if attempt >= self.max_retries {
                        return Err(EngineError::Api("rate limited".to_string()));
                    }
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    let status = r.status().as_u16();
                    let msg = r.text().await.unwrap_or_default();
                    return Err(EngineError::Api(format!("HTTP {status}: {msg}")));
                }
                Ok(r) => {
                    let parsed: ChatResponse = r.json().await?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|choice| choice.message.content)
                        .ok_or_else(|| EngineError::Api("empty choices in reply".to_string()))?;
                    return Ok(parse_correction(&content));
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(EngineError::Http(err));
                    }
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn parse_correction(content: &str) -> AiCorrection {
    if let Ok(correction) = serde_json::from_str::<AiCorrection>(content.trim()) {
        return AiCorrection {
            confidence: correction.confidence.clamp(0.0, 1.0),
            ..correction
        };
    }
    // model ignored the JSON contract; take the text as the name
    AiCorrection {
        normalized_name: content.trim().to_string(),
        confidence: 0.5,
        reasoning: "unstructured model reply".to_string(),
    }
}

#[async_trait]
impl NameCorrector for AiCorrector {
    async fn correct(&self, name: &str, context: &[String]) -> Result<AiCorrection> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }
        let Some(api_key) = self.credentials.api_key() else {
            return Err(EngineError::ServiceUnavailable(
                "AI credential is not configured".to_string(),
            ));
        };

        if let Some(cached) = self.cache.lock().unwrap().get(name) {
            debug!(name, "AI correction served from cache");
            return Ok(cached);
        }

        let started = Instant::now();
        match self.request(&api_key, name, context).await {
            Ok(correction) => {
                self.stats.record_success(started.elapsed());
                self.cache
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), correction.clone());
                Ok(correction)
            }
            Err(err) => {
                self.stats.record_failure(started.elapsed());
                Err(err)
            }
        }
    }

    fn is_available(&self) -> bool {
        self.is_configured()
    }
}

// ─── PatternAwareCorrector ─────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionSuggestion {
    pub original_name: String,
    pub algorithmic_fix: String,
    pub ai_suggested_fix: Option<String>,
    pub final_suggestion: String,
    pub confidence: f64,
    pub reasoning: String,
    pub requires_review: bool,
}

/// Couples the deterministic detector with the AI corrector: detected
/// patterns bias the prompt, and a suggestion that is uncertain or strays
/// from the deterministic fix is flagged for review.
pub struct PatternAwareCorrector {
    detector: PatternDetector,
    corrector: Arc<dyn NameCorrector>,
}

impl PatternAwareCorrector {
    pub fn new(corrector: Arc<dyn NameCorrector>) -> Self {
        Self {
            detector: PatternDetector::new(),
            corrector,
        }
    }

    pub async fn suggest(&self, name: &str) -> Result<CorrectionSuggestion> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }

        let matches = self.detector.detect(name);
        let algorithmic_fix = self.detector.fix(name);
        let context: Vec<String> = matches
            .iter()
            .map(|m| format!("{:?}: {:?}", m.kind, m.fragment))
            .collect();

        match self.corrector.correct(name, &context).await {
            Ok(correction) => {
                let requires_review = correction.confidence < REVIEW_CONFIDENCE_THRESHOLD
                    || correction.normalized_name != algorithmic_fix;
                Ok(CorrectionSuggestion {
                    original_name: name.to_string(),
                    algorithmic_fix,
                    final_suggestion: correction.normalized_name.clone(),
                    ai_suggested_fix: Some(correction.normalized_name),
                    confidence: correction.confidence,
                    reasoning: correction.reasoning,
                    requires_review,
                })
            }
            Err(err) => {
                warn!(error = %err, "AI suggestion unavailable, falling back to deterministic fix");
                Ok(CorrectionSuggestion {
                    original_name: name.to_string(),
                    final_suggestion: algorithmic_fix.clone(),
                    algorithmic_fix,
                    ai_suggested_fix: None,
                    confidence: 0.0,
                    reasoning: format!("AI unavailable: {err}"),
                    requires_review: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoKey;
    impl CredentialSource for NoKey {
        fn api_key(&self) -> Option<String> {
            None
        }
    }

    struct FixedKey(&'static str);
    impl CredentialSource for FixedKey {
        fn api_key(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn corrector_for(endpoint: String, credentials: Arc<dyn CredentialSource>) -> AiCorrector {
        let config = AiConfig {
            endpoint,
            max_retries: 0,
            ..Default::default()
        };
        AiCorrector::new(&config, credentials)
    }

    #[tokio::test]
    async fn missing_credential_fails_fast_with_zeroed_stats() {
        let corrector = corrector_for("http://127.0.0.1:1/never".to_string(), Arc::new(NoKey));
        assert!(!corrector.is_configured());

        let err = corrector.correct("Болт М6х20", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::ServiceUnavailable(_)));

        let cache = corrector.cache_stats();
        assert_eq!(cache.entries, 0);
        assert_eq!(cache.hits, 0);
        let calls = corrector.call_stats();
        assert_eq!(calls.total_calls, 0);
        assert_eq!(calls.average_latency_ms, 0.0);
    }

    #[tokio::test]
    async fn successful_call_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let reply = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content":
                "{\"normalized_name\": \"Болт М6х20\", \"confidence\": 0.9, \"reasoning\": \"stripped standard code\"}"}}]
        });
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .expect(1)
            .create_async()
            .await;

        let corrector = corrector_for(
            format!("{}/v1/chat/completions", server.url()),
            Arc::new(FixedKey("test-key")),
        );

        let first = corrector.correct("Болт М6х20 ГОСТ", &[]).await.unwrap();
        assert_eq!(first.normalized_name, "Болт М6х20");
        assert_eq!(first.confidence, 0.9);

        // second call must be served from the cache, not the backend
        let second = corrector.correct("Болт М6х20 ГОСТ", &[]).await.unwrap();
        assert_eq!(second.normalized_name, first.normalized_name);
        mock.assert_async().await;

        let cache = corrector.cache_stats();
        assert_eq!(cache.entries, 1);
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 1);
        assert_eq!(cache.hit_rate, 0.5);
        assert!(cache.memory_bytes > 0);

        let calls = corrector.call_stats();
        assert_eq!(calls.total_calls, 1);
        assert_eq!(calls.successful_calls, 1);
    }

    #[tokio::test]
    async fn backend_error_is_recorded_as_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let corrector = corrector_for(
            format!("{}/v1/chat/completions", server.url()),
            Arc::new(FixedKey("test-key")),
        );

        let err = corrector.correct("Гайка М10", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Api(_)));
        let calls = corrector.call_stats();
        assert_eq!(calls.failed_calls, 1);
        assert_eq!(calls.successful_calls, 0);
    }

    #[test]
    fn unstructured_reply_falls_back() {
        let correction = parse_correction("Болт М6х20");
        assert_eq!(correction.normalized_name, "Болт М6х20");
        assert_eq!(correction.confidence, 0.5);
    }

    struct CannedCorrector {
        name: &'static str,
        confidence: f64,
    }

    #[async_trait]
    impl NameCorrector for CannedCorrector {
        async fn correct(&self, _name: &str, _context: &[String]) -> Result<AiCorrection> {
            Ok(AiCorrection {
                normalized_name: self.name.to_string(),
                confidence: self.confidence,
                reasoning: "canned".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn suggestion_matching_deterministic_fix_needs_no_review() {
        let aware = PatternAwareCorrector::new(Arc::new(CannedCorrector {
            name: "Болт М6х20",
            confidence: 0.9,
        }));
        let suggestion = aware.suggest("Болт М6х20 ГОСТ").await.unwrap();
        assert_eq!(suggestion.algorithmic_fix, "Болт М6х20");
        assert_eq!(suggestion.final_suggestion, "Болт М6х20");
        assert!(!suggestion.requires_review);
    }

    #[tokio::test]
    async fn divergent_or_uncertain_suggestion_requires_review() {
        let aware = PatternAwareCorrector::new(Arc::new(CannedCorrector {
            name: "Болт шестигранный М6х20",
            confidence: 0.9,
        }));
        let divergent = aware.suggest("Болт М6х20 ГОСТ").await.unwrap();
        assert!(divergent.requires_review);

        let aware = PatternAwareCorrector::new(Arc::new(CannedCorrector {
            name: "Болт М6х20",
            confidence: 0.4,
        }));
        let uncertain = aware.suggest("Болт М6х20 ГОСТ").await.unwrap();
        assert!(uncertain.requires_review);
    }

    #[tokio::test]
    async fn unavailable_ai_degrades_to_deterministic_fix() {
        let corrector = corrector_for("http://127.0.0.1:1/never".to_string(), Arc::new(NoKey));
        let aware = PatternAwareCorrector::new(Arc::new(corrector));
        let suggestion = aware.suggest("Болт М6х20 ГОСТ").await.unwrap();
        assert_eq!(suggestion.final_suggestion, "Болт М6х20");
        assert!(suggestion.ai_suggested_fix.is_none());
        assert!(!suggestion.requires_review);
    }
}

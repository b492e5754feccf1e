use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::similarity::{SimilarityEngine, SimilarityWeights};

pub const DEFAULT_THRESHOLD: f64 = 0.75;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_ITEMS: usize = 1000;

// ─── RecordSource ──────────────────────────────────────────

/// Supplies the `(id, name)` rows of a dataset scope to a scan worker.
pub trait RecordSource: Send + Sync {
    fn fetch_names(&self, scope: i64, max_items: usize) -> etalon_core::Result<Vec<(i64, String)>>;
}

impl RecordSource for etalon_core::Database {
    fn fetch_names(&self, _scope: i64, max_items: usize) -> etalon_core::Result<Vec<(i64, String)>> {
        self.record_names(max_items)
    }
}

// ─── DetectionTask ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

/// In-memory job descriptor. Mutated only by the owning worker; readers get
/// snapshots via `task_status`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionTask {
    pub id: u64,
    pub status: TaskStatus,
    pub processed_pairs: usize,
    pub total_pairs: usize,
    pub progress: f64,
    pub found_groups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DetectionOptions {
    /// Accepted as-is inside (0, 1]; anything else resets to the default.
    pub threshold: f64,
    /// Pairs scored between progress checkpoints; non-positive resets.
    pub batch_size: i64,
    /// Full hybrid scoring; `false` uses the cheaper Jaro-Winkler-only pass.
    pub use_advanced: bool,
    pub weights: Option<SimilarityWeights>,
    /// Cap on dataset rows pulled into one scan; non-positive resets.
    pub max_items: i64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE as i64,
            use_advanced: true,
            weights: None,
            max_items: DEFAULT_MAX_ITEMS as i64,
        }
    }
}

// ─── coordinator ───────────────────────────────────────────

/// Launches and tracks asynchronous duplicate scans. Tasks stay queryable
/// after completion; once the registry grows past the retention cap the
/// oldest finished tasks are evicted.
pub struct DuplicateDetectionCoordinator {
    similarity: Arc<SimilarityEngine>,
    source: Arc<dyn RecordSource>,
    tasks: Arc<RwLock<HashMap<u64, DetectionTask>>>,
    stop: Arc<AtomicBool>,
    next_id: AtomicU64,
    retained_tasks: usize,
}

impl DuplicateDetectionCoordinator {
    pub fn new(
        similarity: Arc<SimilarityEngine>,
        source: Arc<dyn RecordSource>,
        retained_tasks: usize,
    ) -> Self {
        Self {
            similarity,
            source,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            stop: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
            retained_tasks: retained_tasks.max(1),
        }
    }

    /// Validate and normalize inputs, register the task and hand the scan to
    /// a background worker. Returns immediately with the task id.
    pub fn start_detection(&self, scope: i64, options: DetectionOptions) -> Result<u64> {
        if scope <= 0 {
            return Err(EngineError::Validation(format!(
                "dataset scope must be a positive identifier, got {scope}"
            )));
        }

        let threshold = if options.threshold > 0.0 && options.threshold <= 1.0 {
            options.threshold
        } else {
            DEFAULT_THRESHOLD
        };
        let batch_size = if options.batch_size > 0 {
            options.batch_size as usize
        } else {
            DEFAULT_BATCH_SIZE
        };
        let max_items = if options.max_items > 0 {
            options.max_items as usize
        } else {
            DEFAULT_MAX_ITEMS
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut tasks = self.tasks.write().unwrap();
            evict_finished(&mut tasks, self.retained_tasks);
            tasks.insert(
                id,
                DetectionTask {
                    id,
                    status: TaskStatus::Running,
                    processed_pairs: 0,
                    total_pairs: 0,
                    progress: 0.0,
                    found_groups: 0,
                    error: None,
                    started_at: Utc::now(),
                    completed_at: None,
                },
            );
        }
        info!(task = id, scope, threshold, batch_size, "duplicate scan started");

        let similarity = Arc::clone(&self.similarity);
        let source = Arc::clone(&self.source);
        let tasks = Arc::clone(&self.tasks);
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            let outcome = run_scan(
                id,
                scope,
                threshold,
                batch_size,
                max_items,
                options.use_advanced,
                options.weights,
                similarity,
                source,
                Arc::clone(&tasks),
                stop,
            )
            .await;

            let mut tasks = tasks.write().unwrap();
            if let Some(task) = tasks.get_mut(&id) {
                task.completed_at = Some(Utc::now());
                match outcome {
                    Ok(groups) => {
                        task.status = TaskStatus::Completed;
                        task.found_groups = groups;
                        task.progress = 100.0;
                    }
                    Err(err) => {
                        warn!(task = id, error = %err, "duplicate scan failed");
                        task.status = TaskStatus::Failed;
                        task.error = Some(err.to_string());
                    }
                }
            }
        });

        Ok(id)
    }

    /// Snapshot of a task, including finished ones still in retention.
    pub fn task_status(&self, id: u64) -> Option<DetectionTask> {
        self.tasks.read().unwrap().get(&id).cloned()
    }

    /// Cooperative stop: running workers observe the flag at their next
    /// batch boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().unwrap().len()
    }
}

fn evict_finished(tasks: &mut HashMap<u64, DetectionTask>, retained: usize) {
    let mut finished: Vec<(u64, DateTime<Utc>)> = tasks
        .values()
        .filter(|task| task.status != TaskStatus::Running)
        .map(|task| (task.id, task.completed_at.unwrap_or(task.started_at)))
        .collect();
    if finished.len() <= retained {
        return;
    }
    finished.sort_by_key(|(_, completed)| *completed);
    let excess = finished.len() - retained;
    for (id, _) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_scan(
    task_id: u64,
    scope: i64,
    threshold: f64,
    batch_size: usize,
    max_items: usize,
    use_advanced: bool,
    weights: Option<SimilarityWeights>,
    similarity: Arc<SimilarityEngine>,
    source: Arc<dyn RecordSource>,
    tasks: Arc<RwLock<HashMap<u64, DetectionTask>>>,
    stop: Arc<AtomicBool>,
) -> Result<usize> {
    let rows = source.fetch_names(scope, max_items)?;
    let names: Vec<String> = rows.into_iter().map(|(_, name)| name).collect();

    let n = names.len();
    let total_pairs = n.saturating_mul(n.saturating_sub(1)) / 2;
    {
        let mut tasks = tasks.write().unwrap();
        if let Some(task) = tasks.get_mut(&task_id) {
            task.total_pairs = total_pairs;
        }
    }
    if total_pairs == 0 {
        return Ok(0);
    }

    let mut dsu = DisjointSet::new(n);
    let mut processed = 0usize;
    let mut since_checkpoint = 0usize;

    for i in 0..n {
        for j in (i + 1)..n {
            if names[i].trim().is_empty() || names[j].trim().is_empty() {
                processed += 1;
                since_checkpoint += 1;
                continue;
            }
            let score = if use_advanced {
                similarity.score(&names[i], &names[j], weights.as_ref())?
            } else {
                strsim::jaro_winkler(&names[i].to_lowercase(), &names[j].to_lowercase())
            };
            if score >= threshold {
                dsu.union(i, j);
            }
            processed += 1;
            since_checkpoint += 1;

            if since_checkpoint >= batch_size {
                since_checkpoint = 0;
                if stop.load(Ordering::SeqCst) {
                    debug!(task = task_id, processed, "scan observed stop flag");
                    return Err(EngineError::Internal(
                        "detection stopped before completion".to_string(),
                    ));
                }
                {
                    let mut tasks = tasks.write().unwrap();
                    if let Some(task) = tasks.get_mut(&task_id) {
                        task.processed_pairs = processed;
                        task.progress = processed as f64 / total_pairs as f64 * 100.0;
                        task.found_groups = dsu.group_count();
                    }
                }
                tokio::task::yield_now().await;
            }
        }
    }

    {
        let mut tasks = tasks.write().unwrap();
        if let Some(task) = tasks.get_mut(&task_id) {
            task.processed_pairs = processed;
        }
    }
    Ok(dsu.group_count())
}

// ─── DisjointSet ───────────────────────────────────────────

#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
            size: vec![1; size],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, left: usize, right: usize) {
        let left_root = self.find(left);
        let right_root = self.find(right);
        if left_root == right_root {
            return;
        }

        let (winner, loser) = if self.rank[left_root] >= self.rank[right_root] {
            (left_root, right_root)
        } else {
            (right_root, left_root)
        };
        self.parent[loser] = winner;
        self.size[winner] += self.size[loser];
        if self.rank[winner] == self.rank[loser] {
            self.rank[winner] += 1;
        }
    }

    /// Number of components with more than one member.
    fn group_count(&mut self) -> usize {
        let indexes: Vec<usize> = (0..self.parent.len()).collect();
        let mut groups = std::collections::HashSet::new();
        for idx in indexes {
            let root = self.find(idx);
            if self.size[root] > 1 {
                groups.insert(root);
            }
        }
        groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedSource(Vec<(i64, String)>);

    impl RecordSource for FixedSource {
        fn fetch_names(&self, _scope: i64, max_items: usize) -> etalon_core::Result<Vec<(i64, String)>> {
            Ok(self.0.iter().take(max_items).cloned().collect())
        }
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn fetch_names(&self, _scope: i64, _max_items: usize) -> etalon_core::Result<Vec<(i64, String)>> {
            Err(etalon_core::CoreError::Validation("no such dataset".to_string()))
        }
    }

    fn coordinator(source: Arc<dyn RecordSource>) -> DuplicateDetectionCoordinator {
        DuplicateDetectionCoordinator::new(Arc::new(SimilarityEngine::new(10_000)), source, 64)
    }

    async fn wait_finished(
        coordinator: &DuplicateDetectionCoordinator,
        id: u64,
    ) -> DetectionTask {
        for _ in 0..200 {
            let task = coordinator.task_status(id).expect("task registered");
            if task.status != TaskStatus::Running {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan did not finish in time");
    }

    #[tokio::test]
    async fn finds_duplicate_groups() {
        let source = Arc::new(FixedSource(vec![
            (1, "Болт М6х20".to_string()),
            (2, "Болт  м6х20".to_string()),
            (3, "Кабель ВВГ 3х2.5".to_string()),
            (4, "кабель ВВГ 3x2.5".to_string()),
            (5, "Подшипник 6204".to_string()),
        ]));
        let coordinator = coordinator(source);

        let id = coordinator
            .start_detection(1, DetectionOptions::default())
            .unwrap();
        let task = wait_finished(&coordinator, id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.found_groups, 2);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.processed_pairs, task.total_pairs);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn out_of_range_threshold_falls_back_to_default() {
        let source = Arc::new(FixedSource(vec![
            (1, "один".to_string()),
            (2, "два".to_string()),
        ]));
        let coordinator = coordinator(source);

        let id = coordinator
            .start_detection(
                7,
                DetectionOptions {
                    threshold: 1.5,
                    batch_size: 0,
                    ..Default::default()
                },
            )
            .expect("out-of-range inputs normalize instead of failing");
        let task = wait_finished(&coordinator, id).await;
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn non_positive_scope_fails_validation() {
        let coordinator = coordinator(Arc::new(FixedSource(vec![])));
        assert!(matches!(
            coordinator.start_detection(0, DetectionOptions::default()),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            coordinator.start_detection(-5, DetectionOptions::default()),
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn source_failure_lands_in_task_error() {
        let coordinator = coordinator(Arc::new(FailingSource));
        let id = coordinator
            .start_detection(1, DetectionOptions::default())
            .unwrap();
        let task = wait_finished(&coordinator, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap_or_default().contains("no such dataset"));
    }

    #[tokio::test]
    async fn completed_tasks_stay_queryable_and_registry_is_capped() {
        let source = Arc::new(FixedSource(vec![(1, "один".to_string())]));
        let coordinator =
            DuplicateDetectionCoordinator::new(Arc::new(SimilarityEngine::new(100)), source, 2);

        let mut last = 0;
        for _ in 0..5 {
            last = coordinator
                .start_detection(1, DetectionOptions::default())
                .unwrap();
            wait_finished(&coordinator, last).await;
        }

        assert!(coordinator.task_status(last).is_some());
        assert!(coordinator.task_count() <= 3, "retention cap must bound the registry");
    }

    #[tokio::test]
    async fn stop_flag_is_observed_at_batch_boundary() {
        let names: Vec<(i64, String)> = (0..80)
            .map(|i| (i, format!("товарная позиция номер {i}")))
            .collect();
        let coordinator = coordinator(Arc::new(FixedSource(names)));
        coordinator.request_stop();

        let id = coordinator
            .start_detection(
                1,
                DetectionOptions {
                    batch_size: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        let task = wait_finished(&coordinator, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap_or_default().contains("stopped"));
        coordinator.clear_stop();
    }
}

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct RunInner {
    running: bool,
    processed: u64,
    succeeded: u64,
    failed: u64,
    started_at: Option<DateTime<Utc>>,
}

/// The single authoritative "is normalization running" flag plus its run
/// counters. Components that need the answer query this manager instead of
/// keeping their own copy, so the views cannot drift apart.
#[derive(Default)]
pub struct RunState {
    inner: Mutex<RunInner>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as started, resetting the counters. Starting twice is a
    /// validation error.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(EngineError::Validation(
                "normalization is already running".to_string(),
            ));
        }
        *inner = RunInner {
            running: true,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        Ok(())
    }

    /// Clear the running flag; returns whether a run was active. In-flight
    /// workers observe the change through their stop checks at the next
    /// batch boundary.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was_running = inner.running;
        inner.running = false;
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    pub fn record_processed(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.processed += 1;
        if success {
            inner.succeeded += 1;
        } else {
            inner.failed += 1;
        }
    }

    pub fn status(&self) -> RunStatus {
        let inner = self.inner.lock().unwrap();
        let elapsed_ms = inner
            .started_at
            .map(|started| {
                (Utc::now() - started).num_milliseconds().max(0) as u64
            })
            .unwrap_or(0);
        RunStatus {
            running: inner.running,
            processed: inner.processed,
            succeeded: inner.succeeded,
            failed: inner.failed,
            started_at: inner.started_at,
            elapsed_ms,
        }
    }

    /// Cooperative stop check for workers: returns true once the run should
    /// halt.
    pub fn stop_check(self: &Arc<Self>) -> impl Fn() -> bool + Send + Sync + 'static {
        let state = Arc::clone(self);
        move || !state.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_start_is_rejected() {
        let state = RunState::new();
        state.start().unwrap();
        assert!(state.start().is_err());
        assert!(state.stop());
        assert!(!state.stop(), "second stop reports nothing was running");
        state.start().unwrap();
    }

    #[test]
    fn counters_reset_on_start() {
        let state = RunState::new();
        state.start().unwrap();
        state.record_processed(true);
        state.record_processed(false);

        let status = state.status();
        assert_eq!(status.processed, 2);
        assert_eq!(status.succeeded, 1);
        assert_eq!(status.failed, 1);
        assert!(status.running);

        state.stop();
        state.start().unwrap();
        assert_eq!(state.status().processed, 0);
    }

    #[test]
    fn stop_check_observes_the_flag() {
        let state = Arc::new(RunState::new());
        state.start().unwrap();
        let should_stop = state.stop_check();
        assert!(!should_stop());
        state.stop();
        assert!(should_stop());
    }
}

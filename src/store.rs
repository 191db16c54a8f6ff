//! In-memory loop store.
//!
//! Tracks active loops, their iteration history, and cancellation flags.
//! Completed entries linger for the retention window so callers can still
//! inspect state and iterations, then get evicted by `purge_expired`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::domain::{Iteration, LoopState, LoopStatus};

struct LoopEntry {
    state: LoopState,
    iterations: Vec<Iteration>,
    cancel: Arc<AtomicBool>,
    completed_at: Option<Instant>,
}

/// Registry of running and recently-completed loops.
pub struct LoopStore {
    entries: Mutex<HashMap<String, LoopEntry>>,
    retention: Duration,
}

impl LoopStore {
    /// Create a store with the given completed-loop retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Register a new loop. Returns its cancellation flag.
    pub fn register(&self, state: LoopState) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        let loop_id = state.loop_id.clone();
        self.lock().insert(
            loop_id,
            LoopEntry {
                state,
                iterations: Vec::new(),
                cancel: cancel.clone(),
                completed_at: None,
            },
        );
        cancel
    }

    /// Append an iteration to a loop's history.
    pub fn push_iteration(&self, loop_id: &str, iteration: Iteration) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(loop_id) {
            entry.state.current_iteration = iteration.number;
            entry.iterations.push(iteration);
        }
    }

    /// State snapshot for a loop, if known.
    pub fn state(&self, loop_id: &str) -> Option<LoopState> {
        self.lock().get(loop_id).map(|e| e.state.clone())
    }

    /// Iteration history for a loop, if known.
    pub fn iterations(&self, loop_id: &str) -> Option<Vec<Iteration>> {
        self.lock().get(loop_id).map(|e| e.iterations.clone())
    }

    /// Request cancellation of a loop. Returns false for unknown loops and
    /// loops that already finished.
    pub fn cancel(&self, loop_id: &str) -> bool {
        let entries = self.lock();
        match entries.get(loop_id) {
            Some(entry) if !entry.state.status.is_terminal() => {
                entry.cancel.store(true, Ordering::SeqCst);
                tracing::info!(loop_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Mark a loop completed and start its retention clock.
    pub fn mark_completed(&self, loop_id: &str, status: LoopStatus, final_confidence: Option<f64>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(loop_id) {
            entry.state.status = status;
            entry.state.final_confidence = final_confidence;
            entry.completed_at = Some(Instant::now());
        }
    }

    /// Number of loops still running.
    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| e.state.status == LoopStatus::Active)
            .count()
    }

    /// Evict completed loops past the retention window. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| match e.completed_at {
            Some(completed) => completed.elapsed() < self.retention,
            None => true,
        });
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoopEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LoopStore {
        LoopStore::new(Duration::from_secs(600))
    }

    #[test]
    fn test_register_and_lookup() {
        let store = store();
        store.register(LoopState::new("loop-1", "req-1"));

        let state = store.state("loop-1").unwrap();
        assert_eq!(state.status, LoopStatus::Active);
        assert_eq!(store.active_count(), 1);
        assert!(store.iterations("loop-1").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_loop() {
        let store = store();
        assert!(store.state("missing").is_none());
        assert!(store.iterations("missing").is_none());
        assert!(!store.cancel("missing"));
    }

    #[test]
    fn test_push_iteration_advances_state() {
        let store = store();
        store.register(LoopState::new("loop-1", "req-1"));
        store.push_iteration("loop-1", Iteration::new(0, "gen-0", "val-0"));
        store.push_iteration("loop-1", Iteration::new(1, "gen-1", "val-1"));

        assert_eq!(store.iterations("loop-1").unwrap().len(), 2);
        assert_eq!(store.state("loop-1").unwrap().current_iteration, 1);
    }

    #[test]
    fn test_cancel_sets_flag() {
        let store = store();
        let cancel = store.register(LoopState::new("loop-1", "req-1"));
        assert!(!cancel.load(Ordering::SeqCst));
        assert!(store.cancel("loop-1"));
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_completed_loop_refused() {
        let store = store();
        let cancel = store.register(LoopState::new("loop-1", "req-1"));
        store.mark_completed("loop-1", LoopStatus::Completed, Some(0.85));
        assert!(!store.cancel("loop-1"));
        assert!(!cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mark_completed_updates_state() {
        let store = store();
        store.register(LoopState::new("loop-1", "req-1"));
        store.mark_completed("loop-1", LoopStatus::Completed, Some(0.9));

        let state = store.state("loop-1").unwrap();
        assert_eq!(state.status, LoopStatus::Completed);
        assert_eq!(state.final_confidence, Some(0.9));
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_purge_keeps_active_loops() {
        let store = LoopStore::new(Duration::from_millis(0));
        store.register(LoopState::new("loop-1", "req-1"));
        store.register(LoopState::new("loop-2", "req-2"));
        store.mark_completed("loop-2", LoopStatus::Completed, None);

        assert_eq!(store.purge_expired(), 1);
        assert!(store.state("loop-1").is_some());
        assert!(store.state("loop-2").is_none());
    }

    #[test]
    fn test_purge_respects_retention() {
        let store = LoopStore::new(Duration::from_secs(3600));
        store.register(LoopState::new("loop-1", "req-1"));
        store.mark_completed("loop-1", LoopStatus::Completed, None);
        assert_eq!(store.purge_expired(), 0);
        assert!(store.state("loop-1").is_some());
    }
}

//! Trackable units of work.
//!
//! Every long-running operation (value collection, scanning, pointer pool
//! construction, trace/retrace) runs as a `TrackableTask`: a dedicated
//! thread reporting fractional progress through an atomic and honoring a
//! cooperative `CancellationToken`. Callers poll or block on the handle.
//!
//! Tasks may carry an identifier. Two tasks with the same identifier never
//! run concurrently: the second issue is rejected with `TaskError::Conflict`
//! immediately rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use dashmap::DashSet;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

// Progress is stored in hundredths of a percent so an AtomicU32 suffices.
const PROGRESS_SCALE: f32 = 100.0;
const PROGRESS_MAX: u32 = 100 * PROGRESS_SCALE as u32;

/// How a task ended. Cancellation is an outcome, not an error path; partial
/// results built before cancellation are discarded by the caller.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(anyhow::Error),
}

impl<T> TaskOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

/// Handed to the worker closure: progress reporting plus the cancellation
/// flag the worker is expected to poll at each unit of work.
pub struct TaskHandle {
    progress: Arc<AtomicU32>,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn report_progress(&self, percent: f32) {
        let clamped = percent.clamp(0.0, 100.0);
        self.progress.store((clamped * PROGRESS_SCALE) as u32, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Registry of in-flight task identifiers. Owned by the `ScanContext`, not
/// a global.
#[derive(Default)]
pub struct TaskRegistry {
    in_flight: DashSet<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` on a dedicated thread. Fails fast with
    /// `TaskError::Conflict` if `identifier` is already in flight.
    pub fn spawn<T, F>(self: &Arc<Self>, name: &str, identifier: Option<&str>, work: F) -> Result<TrackableTask<T>>
    where
        T: Send + 'static,
        F: FnOnce(&TaskHandle) -> TaskOutcome<T> + Send + 'static,
    {
        if let Some(id) = identifier
            && !self.in_flight.insert(id.to_string())
        {
            warn!("task '{name}' rejected: identifier '{id}' already in flight");
            return Err(TaskError::Conflict { identifier: id.to_string() }.into());
        }

        let progress = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let handle = TaskHandle {
            progress: Arc::clone(&progress),
            token: token.clone(),
        };

        let guard = Deregister {
            registry: Arc::clone(self),
            identifier: identifier.map(str::to_string),
        };
        let task_name = name.to_string();

        let join = thread::spawn(move || {
            let _guard = guard;
            let outcome = work(&handle);
            match &outcome {
                TaskOutcome::Completed(_) => debug!("task '{task_name}' completed"),
                TaskOutcome::Cancelled => debug!("task '{task_name}' cancelled"),
                TaskOutcome::Failed(err) => warn!("task '{task_name}' failed: {err:#}"),
            }
            outcome
        });

        Ok(TrackableTask {
            name: name.to_string(),
            progress,
            token,
            join: Some(join),
        })
    }
}

// Removes the identifier even if the worker panics.
struct Deregister {
    registry: Arc<TaskRegistry>,
    identifier: Option<String>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        if let Some(id) = self.identifier.take() {
            self.registry.in_flight.remove(&id);
        }
    }
}

/// Caller-side handle to a running task.
pub struct TrackableTask<T> {
    name: String,
    progress: Arc<AtomicU32>,
    token: CancellationToken,
    join: Option<JoinHandle<TaskOutcome<T>>>,
}

impl<T> TrackableTask<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fractional progress in percent, 0.0..=100.0.
    pub fn progress(&self) -> f32 {
        self.progress.load(Ordering::Relaxed).min(PROGRESS_MAX) as f32 / PROGRESS_SCALE
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    /// Blocks until the task ends and returns its outcome.
    pub fn wait(mut self) -> TaskOutcome<T> {
        match self.join.take() {
            Some(join) => match join.join() {
                Ok(outcome) => outcome,
                Err(_) => TaskOutcome::Failed(anyhow::anyhow!("task '{}' panicked", self.name)),
            },
            None => TaskOutcome::Failed(anyhow::anyhow!("task '{}' already waited", self.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::time::Duration;

    #[test]
    fn duplicate_identifier_conflicts_while_first_is_running() {
        let registry = Arc::new(TaskRegistry::new());
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let first = registry
            .spawn("collect", Some("value-collect"), move |_handle| {
                release_rx.recv().ok();
                TaskOutcome::Completed(())
            })
            .unwrap();

        let second = registry.spawn::<(), _>("collect", Some("value-collect"), |_handle| TaskOutcome::Completed(()));
        let err = second.err().expect("duplicate identifier must be rejected");
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::Conflict { identifier }) if identifier == "value-collect"
        ));

        release_tx.send(()).unwrap();
        assert!(first.wait().completed().is_some());

        // Identifier is free again once the first task finished.
        let third = registry.spawn("collect", Some("value-collect"), |_handle| TaskOutcome::Completed(()));
        assert!(third.is_ok());
        third.unwrap().wait();
    }

    #[test]
    fn cancellation_is_an_outcome() {
        let registry = Arc::new(TaskRegistry::new());
        let task = registry
            .spawn::<(), _>("spin", None, |handle: &TaskHandle| {
                while !handle.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                TaskOutcome::Cancelled
            })
            .unwrap();

        task.cancel();
        assert!(task.wait().is_cancelled());
    }

    #[test]
    fn progress_round_trips_through_the_atomic() {
        let registry = Arc::new(TaskRegistry::new());
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let (reported_tx, reported_rx) = crossbeam_channel::bounded::<()>(0);
        let task = registry
            .spawn("progress", None, move |handle| {
                handle.report_progress(42.5);
                reported_tx.send(()).unwrap();
                done_rx.recv().ok();
                handle.report_progress(100.0);
                TaskOutcome::Completed(7u32)
            })
            .unwrap();

        reported_rx.recv().unwrap();
        assert!((task.progress() - 42.5).abs() < 0.01);
        done_tx.send(()).unwrap();
        assert_eq!(task.wait().completed(), Some(7));
    }
}

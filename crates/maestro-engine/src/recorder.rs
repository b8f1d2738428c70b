// ABOUTME: Run-scoped recorder that owns the mutable Run while the engine executes it.
// ABOUTME: Every log, step update, and run patch is applied here and forwarded to the RunObserver.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use maestro_core::{LogLevel, LogPhase, Run, RunLog, RunPatch, Step};

/// Callbacks invoked as a run progresses. Observers receive deltas against
/// the run the engine owns; they never see a shared collection.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, _entry: &RunLog) {}

    fn on_step_update(&self, _step: &Step) {}

    fn on_run_update(&self, _patch: &RunPatch) {}
}

/// Observer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Observer that forwards run logs to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_log(&self, entry: &RunLog) {
        let step = entry.step_id.as_deref().unwrap_or("-");
        let phase = entry.phase.label();
        match entry.level {
            LogLevel::Error => {
                tracing::error!(agent = %entry.agent_name, step, phase, "{}", entry.message)
            }
            LogLevel::Warn => {
                tracing::warn!(agent = %entry.agent_name, step, phase, "{}", entry.message)
            }
            LogLevel::Debug => {
                tracing::debug!(agent = %entry.agent_name, step, phase, "{}", entry.message)
            }
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(agent = %entry.agent_name, step, phase, "{}", entry.message)
            }
        }
    }

    fn on_run_update(&self, patch: &RunPatch) {
        if let Some(status) = patch.status {
            tracing::info!(?status, "run status changed");
        }
    }
}

/// Exclusive, run-scoped access to the Run being executed.
///
/// Concurrent steps of one wave share the recorder by reference; the lock is
/// held only for the duration of a single mutation and its observer callback,
/// so observers see updates in the same order they land in the Run.
pub struct RunRecorder<'a> {
    run: Mutex<&'a mut Run>,
    observer: &'a dyn RunObserver,
}

impl<'a> RunRecorder<'a> {
    pub fn new(run: &'a mut Run, observer: &'a dyn RunObserver) -> Self {
        Self {
            run: Mutex::new(run),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, &'a mut Run> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a log entry to the run trace.
    pub fn log(&self, entry: RunLog) {
        let mut run = self.lock();
        self.observer.on_log(&entry);
        run.logs.push(entry);
    }

    /// Shorthand for a run-level (no step) entry.
    pub fn note(&self, agent_name: &str, level: LogLevel, phase: LogPhase, message: String) {
        self.log(RunLog::new(agent_name, level, phase, message));
    }

    /// Store the step (replacing any record with the same id).
    pub fn update_step(&self, step: &Step) {
        let mut run = self.lock();
        run.upsert_step(step.clone());
        self.observer.on_step_update(step);
    }

    /// Merge a partial update into the run.
    pub fn patch(&self, patch: RunPatch) {
        let mut run = self.lock();
        run.apply_patch(&patch);
        self.observer.on_run_update(&patch);
    }

    /// Add usage to the run totals.
    pub fn add_usage(&self, tokens: u64, cost: Option<f64>) {
        if tokens == 0 && cost.is_none() {
            return;
        }
        let mut run = self.lock();
        let patch = RunPatch {
            total_tokens: Some(run.total_tokens + tokens),
            total_cost: Some(run.total_cost + cost.unwrap_or(0.0)),
            ..RunPatch::default()
        };
        run.apply_patch(&patch);
        self.observer.on_run_update(&patch);
    }

    /// Mark the run finished with the given status and final output.
    pub fn finish(&self, status: maestro_core::RunStatus, final_output: String) {
        self.patch(RunPatch {
            status: Some(status),
            final_output: Some(final_output),
            completed_at: Some(Utc::now()),
            ..RunPatch::default()
        });
    }

    /// Current stored record of one step.
    pub fn step(&self, step_id: &str) -> Option<Step> {
        self.lock().step(step_id).cloned()
    }

    /// Read from the run without exposing the lock.
    pub fn with_run<R>(&self, f: impl FnOnce(&Run) -> R) -> R {
        let run = self.lock();
        f(&run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::{PlanStep, RunStatus, StepStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        logs: AtomicUsize,
        steps: AtomicUsize,
        patches: AtomicUsize,
    }

    impl RunObserver for Counting {
        fn on_log(&self, _entry: &RunLog) {
            self.logs.fetch_add(1, Ordering::SeqCst);
        }

        fn on_step_update(&self, _step: &Step) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_update(&self, _patch: &RunPatch) {
            self.patches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn plan_step(id: &str) -> PlanStep {
        PlanStep {
            step_id: id.to_string(),
            agent_id: "a".to_string(),
            agent_name: "A".to_string(),
            description: String::new(),
            input_mapping: Default::default(),
            depends_on: vec![],
        }
    }

    #[test]
    fn recorder_applies_and_forwards_every_update() {
        let observer = Counting::default();
        let mut run = Run::new("orch", "goal");
        {
            let recorder = RunRecorder::new(&mut run, &observer);
            recorder.note("Orch", LogLevel::Info, LogPhase::Planning, "planning".to_string());
            let mut step = Step::from_plan(&plan_step("s1"));
            recorder.update_step(&step);
            step.status = StepStatus::Completed;
            recorder.update_step(&step);
            recorder.add_usage(10, Some(0.25));
            recorder.add_usage(5, None);
            recorder.finish(RunStatus::Completed, "done".to_string());
        }

        assert_eq!(run.logs.len(), 1);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].status, StepStatus::Completed);
        assert_eq!(run.total_tokens, 15);
        assert!((run.total_cost - 0.25).abs() < f64::EPSILON);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.final_output.as_deref(), Some("done"));
        assert!(run.completed_at.is_some());

        assert_eq!(observer.logs.load(Ordering::SeqCst), 1);
        assert_eq!(observer.steps.load(Ordering::SeqCst), 2);
        assert_eq!(observer.patches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_usage_is_not_reported() {
        let observer = Counting::default();
        let mut run = Run::new("orch", "goal");
        RunRecorder::new(&mut run, &observer).add_usage(0, None);
        assert_eq!(observer.patches.load(Ordering::SeqCst), 0);
    }
}

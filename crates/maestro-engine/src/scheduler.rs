// ABOUTME: Scheduler runs a plan's steps to completion, sequentially or in dependency-ordered parallel waves.
// ABOUTME: Per-step execution resolves input, invokes the specialist under retry/timeout, and records the outcome.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;

use maestro_agent::{SpecialistInvoker, input_problems};
use maestro_core::{
    Agent, Artifact, ExecutionPlan, LogLevel, LogPhase, PlanStep, RunLog, Step, StepStatus,
};

use crate::error::StepError;
use crate::recorder::RunRecorder;
use crate::resolver::{AccumulatedContext, resolve_input};
use crate::retry::{with_retry, with_timeout};

/// Reason recorded on steps whose dependencies never completed.
pub const DEPENDENCIES_NOT_SATISFIED: &str = "dependencies not satisfied";

/// Executes the steps of one run.
pub struct Scheduler<'s, 'r> {
    invoker: &'s SpecialistInvoker,
    recorder: &'s RunRecorder<'r>,
    specialists: &'s [&'s Agent],
    max_attempts: u32,
    retry_delay: Duration,
    step_timeout: Duration,
}

impl<'s, 'r> Scheduler<'s, 'r> {
    pub fn new(
        invoker: &'s SpecialistInvoker,
        recorder: &'s RunRecorder<'r>,
        specialists: &'s [&'s Agent],
    ) -> Self {
        Self {
            invoker,
            recorder,
            specialists,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            step_timeout: Duration::from_millis(60_000),
        }
    }

    pub fn retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Run steps one at a time in plan order.
    ///
    /// A step runs when its dependencies completed or when the step right
    /// before it completed; otherwise it is skipped and the loop moves on.
    pub async fn run_sequential(&self, plan: &ExecutionPlan, ctx: &mut AccumulatedContext) {
        let mut previous_completed = false;
        for plan_step in &plan.steps {
            let deps_met = plan_step.depends_on.iter().all(|d| ctx.is_completed(d));
            if !deps_met && !previous_completed {
                self.skip(plan_step, DEPENDENCIES_NOT_SATISFIED);
                continue;
            }
            let step = self.execute_step(plan_step, ctx).await;
            previous_completed = ctx.record_completed(step);
        }
    }

    /// Run every ready step concurrently, one wave at a time, until nothing
    /// is ready. Steps left over are blocked by failures and get skipped.
    pub async fn run_parallel(&self, plan: &ExecutionPlan, ctx: &mut AccumulatedContext) {
        let mut finished: HashSet<String> = HashSet::new();
        let mut wave_number = 0;

        loop {
            let ready: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|s| !finished.contains(&s.step_id))
                .filter(|s| s.depends_on.iter().all(|d| ctx.is_completed(d)))
                .collect();
            if ready.is_empty() {
                break;
            }

            wave_number += 1;
            tracing::info!(
                wave = wave_number,
                steps = ready.len(),
                "dispatching wave"
            );

            let shared: &AccumulatedContext = ctx;
            let outcomes = join_all(ready.iter().map(|s| self.execute_step(s, shared))).await;

            for step in outcomes {
                finished.insert(step.id.clone());
                ctx.record_completed(step);
            }
        }

        for plan_step in &plan.steps {
            if !finished.contains(&plan_step.step_id) {
                let blocked: Vec<&str> = plan_step
                    .depends_on
                    .iter()
                    .filter(|d| !ctx.is_completed(d))
                    .map(String::as_str)
                    .collect();
                let reason = format!(
                    "{} (blocked by {})",
                    DEPENDENCIES_NOT_SATISFIED,
                    blocked.join(", ")
                );
                self.skip(plan_step, &reason);
            }
        }
    }

    fn skip(&self, plan_step: &PlanStep, reason: &str) {
        let mut step = self
            .recorder
            .step(&plan_step.step_id)
            .unwrap_or_else(|| Step::from_plan(plan_step));
        step.status = StepStatus::Skipped;
        step.error = Some(reason.to_string());
        step.completed_at = Some(Utc::now());
        self.recorder.update_step(&step);

        tracing::info!(step_id = %plan_step.step_id, reason, "step skipped");
        self.recorder.log(
            RunLog::new(
                &plan_step.agent_name,
                LogLevel::Warn,
                LogPhase::Delegation,
                format!("Skipped {}: {}", plan_step.step_id, reason),
            )
            .for_step(&plan_step.step_id),
        );
    }

    /// Exact id first, then a case-insensitive match on id or name.
    pub fn find_agent(&self, agent_id: &str) -> Option<&'s Agent> {
        let wanted = agent_id.trim();
        self.specialists
            .iter()
            .find(|a| a.id == wanted)
            .or_else(|| {
                self.specialists.iter().find(|a| {
                    a.id.eq_ignore_ascii_case(wanted) || a.name.eq_ignore_ascii_case(wanted)
                })
            })
            .copied()
    }

    /// Execute one step and return its final record. Never fails: every
    /// error ends up in the returned step and the run trace.
    pub async fn execute_step(&self, plan_step: &PlanStep, ctx: &AccumulatedContext) -> Step {
        let mut step = self
            .recorder
            .step(&plan_step.step_id)
            .unwrap_or_else(|| Step::from_plan(plan_step));
        step.started_at = Some(Utc::now());

        let Some(agent) = self.find_agent(&plan_step.agent_id) else {
            let available: Vec<&str> = self.specialists.iter().map(|a| a.id.as_str()).collect();
            let error = StepError::AgentNotFound {
                requested: plan_step.agent_id.clone(),
                available: available.join(", "),
            };
            return self.fail(step, &plan_step.agent_name, None, error, 0);
        };

        let input = resolve_input(plan_step, ctx);
        step.agent_id = agent.id.clone();
        step.agent_name = agent.name.clone();
        step.status = StepStatus::Running;
        step.input = Some(input.clone());
        self.recorder.update_step(&step);

        let avatar = agent.avatar.as_deref();
        let entry = |level: LogLevel, phase: LogPhase, message: String| {
            RunLog::new(&agent.name, level, phase, message)
                .for_step(&plan_step.step_id)
                .with_avatar(avatar)
        };

        tracing::info!(step_id = %plan_step.step_id, agent = %agent.id, "delegating step");
        self.recorder.log(entry(
            LogLevel::Info,
            LogPhase::Delegation,
            format!("Delegating to {}: {}", agent.name, plan_step.description),
        ));
        self.recorder.log(
            entry(LogLevel::Debug, LogPhase::Input, "Resolved input".to_string())
                .with_artifact(Artifact::json("Input", &input)),
        );
        for problem in input_problems(agent, &input) {
            self.recorder.log(entry(LogLevel::Warn, LogPhase::Input, problem));
        }
        self.recorder.log(entry(
            LogLevel::Info,
            LogPhase::Process,
            format!("{} is working", agent.name),
        ));

        let started = Instant::now();
        let invoker = self.invoker;
        let input_ref = &input;
        let max_attempts = self.max_attempts;
        let outcome = with_retry(
            max_attempts,
            self.retry_delay,
            |_attempt| async move {
                with_timeout(
                    async {
                        invoker
                            .invoke(agent, input_ref)
                            .await
                            .into_result()
                            .map_err(StepError::Invocation)
                    },
                    self.step_timeout,
                )
                .await
            },
            |attempt, error: &StepError, delay| {
                self.recorder.log(entry(
                    LogLevel::Warn,
                    LogPhase::Process,
                    format!(
                        "Attempt {}/{} failed: {}. Retrying in {}ms",
                        attempt,
                        max_attempts,
                        error,
                        delay.as_millis()
                    ),
                ));
            },
        )
        .await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let output = result.output.unwrap_or_default();
                step.status = StepStatus::Completed;
                step.completed_at = Some(Utc::now());
                step.duration_ms = Some(elapsed);
                step.tokens_used = result.tokens_used;
                step.cost = result.cost;
                step.error = None;
                step.output = Some(output.clone());
                self.recorder.update_step(&step);
                self.recorder
                    .add_usage(result.tokens_used.unwrap_or(0), result.cost);

                tracing::info!(step_id = %step.id, agent = %agent.id, duration_ms = elapsed, "step completed");
                let artifact = match output.get("image_url").and_then(|v| v.as_str()) {
                    Some(url) => Artifact::image(&format!("{} output", agent.name), url),
                    None => Artifact::json(&format!("{} output", agent.name), &output),
                };
                self.recorder.log(
                    entry(
                        LogLevel::Success,
                        LogPhase::Output,
                        format!("{} completed in {}ms", agent.name, elapsed),
                    )
                    .with_artifact(artifact),
                );
                step
            }
            Err(error) => self.fail(step, &agent.name, avatar, error, elapsed),
        }
    }

    fn fail(
        &self,
        mut step: Step,
        agent_name: &str,
        avatar: Option<&str>,
        error: StepError,
        elapsed_ms: u64,
    ) -> Step {
        step.status = StepStatus::Failed;
        step.completed_at = Some(Utc::now());
        step.duration_ms = Some(elapsed_ms);
        step.error = Some(error.to_string());
        self.recorder.update_step(&step);

        tracing::error!(step_id = %step.id, error = %error, "step failed");
        let message = if error.is_retryable() {
            format!("{} failed after {} attempt(s): {}", agent_name, self.max_attempts, error)
        } else {
            format!("{} failed: {}", agent_name, error)
        };
        self.recorder.log(
            RunLog::new(agent_name, LogLevel::Error, LogPhase::Process, message)
                .for_step(&step.id)
                .with_avatar(avatar),
        );
        step
    }
}

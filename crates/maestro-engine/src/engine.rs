// ABOUTME: Engine is the entry point that executes one orchestration run end to end.
// ABOUTME: It resolves the orchestrator, builds the plan, schedules the steps, and consolidates the result.

use std::sync::Arc;

use chrono::Utc;

use maestro_agent::{CompletionClient, KnowledgeBase, SpecialistInvoker};
use maestro_core::{
    Agent, Artifact, LogLevel, LogPhase, PlanStrategy, Run, RunLog, RunPatch, RunStatus, Step,
};

use crate::config::EngineConfig;
use crate::consolidator::Consolidator;
use crate::error::EngineError;
use crate::planner::PlanBuilder;
use crate::recorder::{RunObserver, RunRecorder};
use crate::resolver::AccumulatedContext;
use crate::scheduler::Scheduler;

/// Executes runs against a completion client.
///
/// Runs are independent: an engine holds no per-run state, so one engine can
/// drive any number of runs concurrently.
#[derive(Clone)]
pub struct Engine {
    client: Arc<dyn CompletionClient>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(client: Arc<dyn CompletionClient>, config: EngineConfig) -> Self {
        Self {
            client,
            knowledge: None,
            config,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `run` to a terminal status.
    ///
    /// Step-level problems are recorded in the run. Only fatal problems (no
    /// such orchestrator, no specialists, an unusable plan) are returned as
    /// errors; the caller is expected to mark the run failed, as
    /// [`Engine::run_to_completion`] does.
    pub async fn execute_run(
        &self,
        run: &mut Run,
        agents: &[Agent],
        observer: &dyn RunObserver,
    ) -> Result<(), EngineError> {
        let run_id = run.id.clone();
        let goal = run.goal.clone();
        let context = run.context.clone();
        let orchestrator_id = run.orchestrator_id.clone();
        let recorder = RunRecorder::new(run, observer);

        tracing::info!(run_id = %run_id, orchestrator = %orchestrator_id, "run started");
        let result = self
            .drive(&recorder, agents, &orchestrator_id, &goal, context.as_ref())
            .await;

        if let Err(error) = &result {
            tracing::error!(run_id = %run_id, error = %error, "run aborted");
            recorder.note(
                "System",
                LogLevel::Error,
                LogPhase::Planning,
                format!("Run aborted: {}", error),
            );
        }
        result
    }

    /// Execute `run`, marking it failed if a fatal error escapes.
    pub async fn run_to_completion(
        &self,
        mut run: Run,
        agents: &[Agent],
        observer: &dyn RunObserver,
    ) -> Run {
        if let Err(error) = self.execute_run(&mut run, agents, observer).await {
            run.mark_failed(&error.to_string());
            observer.on_run_update(&RunPatch {
                status: Some(run.status),
                final_output: run.final_output.clone(),
                completed_at: run.completed_at,
                ..RunPatch::default()
            });
        }
        run
    }

    async fn drive(
        &self,
        recorder: &RunRecorder<'_>,
        agents: &[Agent],
        orchestrator_id: &str,
        goal: &str,
        context: Option<&maestro_core::Payload>,
    ) -> Result<(), EngineError> {
        let orchestrator = agents
            .iter()
            .find(|a| a.id == orchestrator_id)
            .ok_or_else(|| EngineError::OrchestratorNotFound(orchestrator_id.to_string()))?;
        if !orchestrator.is_orchestrator() {
            return Err(EngineError::NotAnOrchestrator(orchestrator.id.clone()));
        }
        let settings = orchestrator.orchestration();
        let orch_name = orchestrator.name.as_str();
        let orch_log = |level: LogLevel, phase: LogPhase, message: String| {
            RunLog::new(orch_name, level, phase, message)
                .with_avatar(orchestrator.avatar.as_deref())
        };

        recorder.patch(RunPatch {
            orchestrator_name: Some(orchestrator.name.clone()),
            status: Some(RunStatus::Running),
            started_at: Some(Utc::now()),
            ..RunPatch::default()
        });

        let specialists = available_specialists(orchestrator, agents, recorder);
        if specialists.is_empty() {
            return Err(EngineError::NoSpecialists(orchestrator.id.clone()));
        }

        recorder.log(orch_log(
            LogLevel::Info,
            LogPhase::Planning,
            format!(
                "Planning \"{}\" across {} specialist(s) ({:?} mode)",
                goal,
                specialists.len(),
                settings.execution_mode
            ),
        ));

        let planned = PlanBuilder::new(self.client.clone())
            .build(orchestrator, &specialists, goal, context)
            .await?;
        for warning in &planned.warnings {
            recorder.log(orch_log(LogLevel::Warn, LogPhase::Planning, warning.clone()));
        }
        if let Some(usage) = &planned.usage {
            recorder.add_usage(usage.total_tokens, usage.cost);
        }
        let plan = planned.plan;

        recorder.log(
            orch_log(
                LogLevel::Success,
                LogPhase::Planning,
                format!(
                    "Plan ready: {} step(s), {} strategy. {}",
                    plan.steps.len(),
                    plan.strategy.label(),
                    plan.reasoning
                )
                .trim_end()
                .to_string(),
            )
            .with_artifact(Artifact::json("Execution plan", &plan)),
        );
        recorder.patch(RunPatch {
            plan: Some(plan.clone()),
            ..RunPatch::default()
        });
        for plan_step in &plan.steps {
            recorder.update_step(&Step::from_plan(plan_step));
        }

        let invoker = match &self.knowledge {
            Some(knowledge) => {
                SpecialistInvoker::new(self.client.clone()).with_knowledge(knowledge.clone())
            }
            None => SpecialistInvoker::new(self.client.clone()),
        };
        let max_attempts = settings.retry_budget.unwrap_or(self.config.max_retries);
        let scheduler = Scheduler::new(&invoker, recorder, &specialists)
            .retries(max_attempts, self.config.retry_delay)
            .step_timeout(self.config.step_timeout);

        let mut ctx = AccumulatedContext::new(goal, context);
        let parallel = self.config.enable_parallel && plan.strategy != PlanStrategy::Sequential;
        if parallel {
            scheduler.run_parallel(&plan, &mut ctx).await;
        } else {
            scheduler.run_sequential(&plan, &mut ctx).await;
        }

        let completed = ctx.completed().len();
        recorder.log(orch_log(
            LogLevel::Info,
            LogPhase::Evaluation,
            format!(
                "Consolidating {} of {} step(s) ({:?})",
                completed,
                plan.steps.len(),
                settings.consolidation
            ),
        ));

        let consolidation = Consolidator::new(self.client.clone())
            .consolidate(goal, ctx.completed(), settings.consolidation, orchestrator)
            .await;
        if let Some(reason) = &consolidation.fallback_reason {
            recorder.log(orch_log(
                LogLevel::Warn,
                LogPhase::Evaluation,
                format!("Summarization failed ({}); concatenated results instead", reason),
            ));
        }
        if let Some(usage) = &consolidation.usage {
            recorder.add_usage(usage.total_tokens, usage.cost);
        }

        let status = if completed == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let (level, message) = match status {
            RunStatus::Failed => (LogLevel::Error, "Run failed: no step completed".to_string()),
            _ => (
                LogLevel::Success,
                format!("Run completed with {} of {} step(s)", completed, plan.steps.len()),
            ),
        };
        recorder.log(
            orch_log(level, LogPhase::Evaluation, message)
                .with_artifact(Artifact::markdown("Final output", &consolidation.output)),
        );
        recorder.finish(status, consolidation.output);

        let (tokens, cost) = recorder.with_run(|r| (r.total_tokens, r.total_cost));
        tracing::info!(
            orchestrator = %orchestrator.id,
            ?status,
            completed,
            steps = plan.steps.len(),
            tokens,
            cost,
            "run finished"
        );
        Ok(())
    }
}

/// The orchestrator's allowed specialists that exist, in allowed order.
/// Unknown or non-specialist ids are reported and left out.
fn available_specialists<'a>(
    orchestrator: &Agent,
    agents: &'a [Agent],
    recorder: &RunRecorder<'_>,
) -> Vec<&'a Agent> {
    let mut found: Vec<&'a Agent> = Vec::new();
    for allowed in &orchestrator.allowed_agents {
        let candidate = agents
            .iter()
            .find(|a| &a.id == allowed)
            .or_else(|| agents.iter().find(|a| a.id.eq_ignore_ascii_case(allowed)));
        match candidate {
            Some(agent) if !agent.is_orchestrator() => {
                if !found.iter().any(|f| f.id == agent.id) {
                    found.push(agent);
                }
            }
            Some(agent) => recorder.note(
                &orchestrator.name,
                LogLevel::Warn,
                LogPhase::Planning,
                format!("Ignoring {}: orchestrators cannot be delegated to", agent.id),
            ),
            None => recorder.note(
                &orchestrator.name,
                LogLevel::Warn,
                LogPhase::Planning,
                format!("Ignoring unknown allowed agent {}", allowed),
            ),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_agent::testing::ScriptedClient;
    use maestro_core::{ExecutionMode, OrchestrationConfig, StepStatus};
    use std::time::Duration;

    use crate::recorder::NoopObserver;

    fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .max_retries(1)
            .retry_delay(Duration::from_millis(1))
            .step_timeout(Duration::from_secs(5))
    }

    fn team(mode: ExecutionMode) -> Vec<Agent> {
        let mut orch = Agent::orchestrator("lead", "Lead", "gpt-4o", &["a", "b", "ghost"]);
        orch.orchestration = Some(OrchestrationConfig {
            execution_mode: mode,
            consolidation: maestro_core::ConsolidationStrategy::Concatenate,
            ..OrchestrationConfig::default()
        });
        vec![
            orch,
            Agent::specialist("a", "A", "gpt-4o"),
            Agent::specialist("b", "B", "gpt-4o"),
        ]
    }

    #[tokio::test]
    async fn missing_orchestrator_is_fatal() {
        let engine = Engine::new(Arc::new(ScriptedClient::new()), fast_config());
        let mut run = Run::new("nobody", "goal");

        let result = engine
            .execute_run(&mut run, &team(ExecutionMode::Sequential), &NoopObserver)
            .await;

        assert!(matches!(result, Err(EngineError::OrchestratorNotFound(_))));
        assert_eq!(run.logs.last().unwrap().level, LogLevel::Error);
    }

    #[tokio::test]
    async fn specialist_as_orchestrator_is_rejected() {
        let engine = Engine::new(Arc::new(ScriptedClient::new()), fast_config());
        let run = Run::new("a", "goal");

        let run = engine
            .run_to_completion(run, &team(ExecutionMode::Sequential), &NoopObserver)
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.final_output.unwrap().contains("not an orchestrator"));
    }

    #[tokio::test]
    async fn orchestrator_without_specialists_is_fatal() {
        let engine = Engine::new(Arc::new(ScriptedClient::new()), fast_config());
        let agents = vec![Agent::orchestrator("lead", "Lead", "gpt-4o", &["ghost"])];
        let mut run = Run::new("lead", "goal");

        let result = engine.execute_run(&mut run, &agents, &NoopObserver).await;

        assert!(matches!(result, Err(EngineError::NoSpecialists(_))));
    }

    #[tokio::test]
    async fn sequential_run_completes_and_records_everything() {
        let client = Arc::new(ScriptedClient::new());
        let engine = Engine::new(client.clone(), fast_config());
        let mut run = Run::new("lead", "goal");

        engine
            .execute_run(&mut run, &team(ExecutionMode::Sequential), &NoopObserver)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.orchestrator_name, "Lead");
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(run.plan.is_some());
        assert!(run.final_output.unwrap().contains("## A"));
        assert_eq!(run.total_tokens, 2 * ScriptedClient::TOKENS_PER_CALL);
        assert!(run.started_at.is_some() && run.completed_at.is_some());
        assert!(
            run.logs
                .iter()
                .any(|l| l.level == LogLevel::Warn && l.message.contains("ghost"))
        );
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn zero_completions_fail_the_run_without_error() {
        let client = Arc::new(ScriptedClient::new().always_fail("down"));
        let engine = Engine::new(client, fast_config());
        let mut run = Run::new("lead", "goal");

        engine
            .execute_run(&mut run, &team(ExecutionMode::Parallel), &NoopObserver)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.final_output.as_deref(), Some(crate::NO_RESULTS));
    }

    #[tokio::test]
    async fn retry_budget_overrides_engine_retries() {
        let client = Arc::new(ScriptedClient::new().always_fail("down"));
        let engine = Engine::new(client.clone(), fast_config().max_retries(5));
        let mut agents = team(ExecutionMode::Sequential);
        agents[0].allowed_agents = vec!["a".to_string()];
        if let Some(settings) = agents[0].orchestration.as_mut() {
            settings.retry_budget = Some(2);
        }
        let mut run = Run::new("lead", "goal");

        engine.execute_run(&mut run, &agents, &NoopObserver).await.unwrap();

        assert_eq!(client.call_count(), 2);
    }
}

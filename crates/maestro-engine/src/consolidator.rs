// ABOUTME: Consolidator merges completed step outputs into the run's final answer.
// ABOUTME: Supports concatenate, summarize (one LLM call, falls back to concatenate), and best_of_n.

use std::sync::Arc;

use serde_json::Value;

use maestro_agent::{ChatMessage, ChatRequest, CompletionClient, CompletionError, Usage};
use maestro_core::{Agent, ConsolidationStrategy, Step, StepStatus};

/// Final output when no step completed.
pub const NO_RESULTS: &str = "No results";

const SUMMARIZE_TEMPERATURE: f32 = 0.3;

/// Outcome of consolidation.
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    pub output: String,
    pub usage: Option<Usage>,
    /// Set when summarization failed and concatenation was used instead.
    pub fallback_reason: Option<String>,
}

impl Consolidation {
    fn plain(output: String) -> Self {
        Self {
            output,
            usage: None,
            fallback_reason: None,
        }
    }
}

fn completed(steps: &[Step]) -> Vec<&Step> {
    steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .collect()
}

fn render_output(step: &Step) -> String {
    let value = Value::Object(step.output.clone().unwrap_or_default());
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn render_sections(steps: &[&Step]) -> String {
    steps
        .iter()
        .map(|s| format!("## {}\n{}", s.agent_name, render_output(s)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct Consolidator {
    client: Arc<dyn CompletionClient>,
}

impl Consolidator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Each completed step under its agent name as a heading, in step order.
    pub fn concatenate(steps: &[Step]) -> String {
        let done = completed(steps);
        if done.is_empty() {
            return NO_RESULTS.to_string();
        }
        render_sections(&done)
    }

    /// The last completed step's output.
    pub fn best_of_n(steps: &[Step]) -> String {
        completed(steps)
            .last()
            .map(|s| render_output(s))
            .unwrap_or_else(|| NO_RESULTS.to_string())
    }

    /// Merge every completed output into one answer with a single model call.
    pub async fn summarize(
        &self,
        goal: &str,
        steps: &[Step],
        orchestrator: &Agent,
    ) -> Result<(String, Usage), CompletionError> {
        let done = completed(steps);
        if done.is_empty() {
            return Ok((NO_RESULTS.to_string(), Usage::default()));
        }

        let system = format!(
            "You are {}, an orchestrator. Merge the specialist results below into one coherent \
             answer to the goal. Resolve overlaps and contradictions and do not mention the \
             specialists themselves.",
            orchestrator.name
        );
        let user = format!(
            "Goal: {}\n\nSpecialist results:\n\n{}",
            goal,
            render_sections(&done)
        );
        let request = ChatRequest::new(
            &orchestrator.model,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .temperature(SUMMARIZE_TEMPERATURE)
        .max_tokens(orchestrator.effective_max_tokens());

        let response = self.client.chat(&request).await?;
        Ok((response.content().trim().to_string(), response.usage))
    }

    pub async fn consolidate(
        &self,
        goal: &str,
        steps: &[Step],
        strategy: ConsolidationStrategy,
        orchestrator: &Agent,
    ) -> Consolidation {
        match strategy {
            ConsolidationStrategy::Concatenate => Consolidation::plain(Self::concatenate(steps)),
            ConsolidationStrategy::BestOfN => Consolidation::plain(Self::best_of_n(steps)),
            ConsolidationStrategy::Summarize => {
                match self.summarize(goal, steps, orchestrator).await {
                    Ok((output, usage)) => Consolidation {
                        output,
                        usage: Some(usage),
                        fallback_reason: None,
                    },
                    Err(e) => {
                        tracing::warn!(orchestrator = %orchestrator.id, error = %e, "summarize failed, concatenating instead");
                        Consolidation {
                            output: Self::concatenate(steps),
                            usage: None,
                            fallback_reason: Some(e.to_string()),
                        }
                    }
                }
            }
        }
    }
}

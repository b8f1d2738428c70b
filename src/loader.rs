// ABOUTME: Loads agent definitions, knowledge entries, and run context from YAML or JSON files.
// ABOUTME: Also validates agent sets (duplicate ids, unknown allowed agents, empty orchestrators).

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use maestro_agent::KnowledgeEntry;
use maestro_core::{Agent, Payload};

/// A file holding either a bare list or `{<key>: [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListFile<T> {
    Bare(Vec<T>),
    Agents { agents: Vec<T> },
    Entries { entries: Vec<T> },
}

impl<T> ListFile<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListFile::Bare(items) => items,
            ListFile::Agents { agents } => agents,
            ListFile::Entries { entries } => entries,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn parse_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if is_json(path) {
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("invalid YAML in {}", path.display()))
    }
}

pub fn load_agents(path: &Path) -> anyhow::Result<Vec<Agent>> {
    let agents = parse_file::<ListFile<Agent>>(path)?.into_vec();
    if agents.is_empty() {
        bail!("{} defines no agents", path.display());
    }
    Ok(agents)
}

pub fn load_knowledge(path: &Path) -> anyhow::Result<Vec<KnowledgeEntry>> {
    Ok(parse_file::<ListFile<KnowledgeEntry>>(path)?.into_vec())
}

/// The run context must be a JSON (or YAML) object.
pub fn load_context(path: &Path) -> anyhow::Result<Payload> {
    match parse_file::<serde_json::Value>(path)? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!(
            "context in {} must be an object, found {}",
            path.display(),
            kind_of(&other)
        ),
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Problems that would make a run fail or behave unexpectedly.
pub fn validate_agents(agents: &[Agent]) -> Vec<String> {
    let mut problems = Vec::new();

    let mut seen = HashSet::new();
    for agent in agents {
        if !seen.insert(agent.id.as_str()) {
            problems.push(format!("duplicate agent id: {}", agent.id));
        }
    }

    for orchestrator in agents.iter().filter(|a| a.is_orchestrator()) {
        let mut usable = 0;
        for allowed in &orchestrator.allowed_agents {
            match agents.iter().find(|a| a.id.eq_ignore_ascii_case(allowed)) {
                Some(agent) if agent.is_orchestrator() => problems.push(format!(
                    "{}: allowed agent {} is an orchestrator",
                    orchestrator.id, agent.id
                )),
                Some(_) => usable += 1,
                None => problems.push(format!(
                    "{}: unknown allowed agent {}",
                    orchestrator.id, allowed
                )),
            }
        }
        if usable == 0 {
            problems.push(format!("{}: no specialists to delegate to", orchestrator.id));
        }
    }
    problems
}

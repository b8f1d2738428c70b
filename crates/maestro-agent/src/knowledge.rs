// ABOUTME: Knowledge retrieval seam used for retrieval-augmented specialist prompts.
// ABOUTME: Defines the KnowledgeBase trait and an in-memory implementation with term search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Agent or knowledge-base scope; `None` means visible to every agent.
    #[serde(default, rename = "agentId")]
    pub scope: Option<String>,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Entries scoped to the given agent (or knowledge-base reference).
    async fn knowledge_for_agent(&self, scope: &str) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;

    /// Entries relevant to `query`, optionally restricted to a scope plus global entries.
    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;
}

/// A fixed set of entries held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl InMemoryKnowledgeBase {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    fn score(entry: &KnowledgeEntry, terms: &[String]) -> usize {
        let haystack = format!(
            "{} {} {}",
            entry.title,
            entry.content,
            entry.tags.join(" ")
        )
        .to_lowercase();
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn knowledge_for_agent(
        &self,
        scope: &str,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.scope.as_deref() == Some(scope))
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        // Short words carry no signal.
        let terms: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(String::from)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &KnowledgeEntry)> = self
            .entries
            .iter()
            .filter(|e| match (scope, e.scope.as_deref()) {
                (_, None) => true,
                (Some(wanted), Some(own)) => wanted == own,
                (None, Some(_)) => true,
            })
            .map(|e| (Self::score(e, &terms), e))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().map(|(_, e)| e.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, title: &str, content: &str, scope: Option<&str>) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: vec![],
            scope: scope.map(String::from),
        }
    }

    fn kb() -> InMemoryKnowledgeBase {
        InMemoryKnowledgeBase::new(vec![
            entry("k1", "Brand voice", "Friendly and concise tone", Some("writer")),
            entry("k2", "Pricing", "Plans start at ten dollars", None),
            entry("k3", "Legal tone", "Formal tone for contracts", Some("lawyer")),
        ])
    }

    #[tokio::test]
    async fn knowledge_for_agent_filters_by_scope() {
        let entries = kb().knowledge_for_agent("writer").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "k1");
    }

    #[tokio::test]
    async fn search_ranks_and_respects_scope() {
        let results = kb().search("pricing plans, tone?", Some("writer")).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["k2", "k1"]);
        assert!(!ids.contains(&"k3"));
    }

    #[tokio::test]
    async fn search_with_only_short_words_is_empty() {
        assert!(kb().search("a an to", None).await.unwrap().is_empty());
    }
}

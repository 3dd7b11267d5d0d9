//! World-knowledge search collaborator.
//!
//! Character sessions expose a `search_world_knowledge` tool; the queries
//! are answered by an external retrieval system. [`NoKnowledge`] answers
//! every query with nothing, which sessions surface to the model as a
//! plain-text "no relevant information" notice.

use async_trait::async_trait;

/// Errors raised by the knowledge collaborator.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// The retrieval backend was unreachable.
    #[error("knowledge search error: {0}")]
    Backend(String),
}

/// The world-knowledge retrieval seam.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Run a batch of queries and return matching knowledge snippets.
    async fn search(&self, queries: &[String]) -> Result<Vec<String>, KnowledgeError>;
}

/// A knowledge source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeSource for NoKnowledge {
    async fn search(&self, _queries: &[String]) -> Result<Vec<String>, KnowledgeError> {
        Ok(Vec::new())
    }
}

/// A fixed-answer knowledge source for tests.
#[derive(Debug, Clone, Default)]
pub struct FixedKnowledge {
    snippets: Vec<String>,
}

impl FixedKnowledge {
    /// Create a source that answers every query batch with `snippets`.
    pub fn new<I, S>(snippets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            snippets: snippets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl KnowledgeSource for FixedKnowledge {
    async fn search(&self, _queries: &[String]) -> Result<Vec<String>, KnowledgeError> {
        Ok(self.snippets.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_knowledge_returns_empty() {
        let results = NoKnowledge
            .search(&[String::from("the old mill")])
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn fixed_knowledge_returns_snippets() {
        let source = FixedKnowledge::new(["The mill burned down in the spring flood year."]);
        let results = source.search(&[String::from("mill")]).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}

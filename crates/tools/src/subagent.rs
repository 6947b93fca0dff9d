//! Sub-agent resolution — documents marked as agents exposed as callable
//! tools.
//!
//! A step may reference sibling documents by path (relative to the calling
//! document, at the same revision). Each referenced document must exist and
//! be an agent; anything else is a client-facing configuration error, never
//! retried. Independent lookups run concurrently and are joined before the
//! step proceeds.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepchain_core::error::{ChainError, ErrorCode};
use stepchain_core::provider::ToolDefinition;
use thiserror::Error;
use tracing::debug;

/// A document store lookup failure.
#[derive(Debug, Clone, Error)]
#[error("document store error: {0}")]
pub struct StoreError(pub String);

/// What kind of document a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Prompt,
    Agent,
}

/// A sibling document fetched from the workspace at a fixed revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDocument {
    /// Workspace path of the document
    pub path: String,

    /// The document's kind
    pub document_type: DocumentType,

    /// Description surfaced to the model
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the parameters the agent accepts
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// External collaborator: fetches sibling documents at the same revision as
/// the calling document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by workspace path; `Ok(None)` when absent.
    async fn get_document(&self, path: &str) -> Result<Option<AgentDocument>, StoreError>;
}

/// Resolve a document reference relative to the calling document's path.
///
/// `agents/helper` next to `prompts/main` resolves to `prompts/agents/helper`;
/// a leading `/` is absolute; `..` walks up.
pub fn resolve_path(calling_document: &str, reference: &str) -> String {
    if let Some(absolute) = reference.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = calling_document.split('/').collect();
    segments.pop(); // drop the document name itself

    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Turn an agent document into a tool definition. The tool name is the raw
/// reference as the template wrote it, so the model calls it by the name it
/// was declared under.
fn to_definition(reference: &str, doc: &AgentDocument) -> ToolDefinition {
    ToolDefinition {
        name: reference.to_string(),
        description: if doc.description.is_empty() {
            format!("Run the {} agent", doc.path)
        } else {
            doc.description.clone()
        },
        parameters: doc.parameters.clone().unwrap_or_else(|| {
            serde_json::json!({ "type": "object", "properties": {} })
        }),
    }
}

/// Resolve a list of sub-agent references into tool definitions.
///
/// All lookups run concurrently. The first failure wins: a missing path or a
/// non-agent document aborts the whole resolution with a
/// `DocumentConfigError`.
pub async fn resolve_subagent_tools(
    store: &Arc<dyn DocumentStore>,
    calling_document: &str,
    references: &[String],
) -> Result<Vec<ToolDefinition>, ChainError> {
    let lookups = references.iter().map(|reference| {
        let store = Arc::clone(store);
        let path = resolve_path(calling_document, reference);
        let reference = reference.clone();
        async move {
            let doc = store.get_document(&path).await.map_err(|e| {
                ChainError::new(
                    ErrorCode::DocumentConfigError,
                    format!("failed to fetch sub-agent '{reference}': {e}"),
                )
            })?;

            let doc = doc.ok_or_else(|| {
                ChainError::new(
                    ErrorCode::DocumentConfigError,
                    format!("sub-agent '{reference}' not found at '{path}'"),
                )
            })?;

            if doc.document_type != DocumentType::Agent {
                return Err(ChainError::new(
                    ErrorCode::DocumentConfigError,
                    format!("document '{path}' is not an agent"),
                ));
            }

            debug!(reference = %reference, path = %path, "resolved sub-agent tool");
            Ok(to_definition(&reference, &doc))
        }
    });

    join_all(lookups).await.into_iter().collect()
}

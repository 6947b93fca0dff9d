//! Tool resolution and execution strategies for StepChain.
//!
//! Tools arrive from five places — client declarations, platform built-ins,
//! sub-agent documents, remote integrations, provider-native tools — and the
//! [`ToolResolver`] merges them into one named map, binding each entry to an
//! execution strategy decided by the run's environment. A tool without an
//! executor is the signal that makes the step driver pause the chain.

pub mod builtins;
pub mod exchange;
pub mod resolver;
pub mod subagent;

pub use builtins::{AGENT_RETURN_TOOL, agent_return_definition};
pub use exchange::{TOOL_RESULT_TIMEOUT, ToolExchange};
pub use resolver::{
    ExecutionStrategy, ResolvedTool, ToolEnvironment, ToolHandler, ToolResolver, ToolSources,
    mock_result, partition_declarations,
};
pub use subagent::{AgentDocument, DocumentStore, DocumentType, StoreError, resolve_subagent_tools};

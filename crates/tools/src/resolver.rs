//! Tool resolution — merges tool declarations from five sources into one
//! named map and binds each entry to an execution strategy.
//!
//! Merge precedence, later overrides earlier on name collision:
//! client-declared, platform built-ins, sub-agents. Remote integrations and
//! provider-native tools are additive only: they never displace the first
//! three.
//!
//! The execution strategy is decided by the run's environment, not by the
//! tool itself: an interactive run parks on the result exchange, an offline
//! evaluation mocks every call, and a background run either uses a
//! registered handler or leaves the tool unbound, which tells the driver to
//! pause the chain instead of answering inline.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use stepchain_core::config::{ToolDeclarations, ToolSpec};
use stepchain_core::provider::ToolDefinition;
use stepchain_core::tool::{ToolCall, ToolResult};
use tracing::debug;

use crate::exchange::ToolExchange;

/// Which kind of run is asking for tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEnvironment {
    /// Human-facing run: results are delivered externally via the exchange.
    Interactive,
    /// Offline evaluation: every call is answered with a synthetic mock.
    Evaluation,
    /// Production/background run: only registered handlers execute inline.
    Background,
}

/// A synchronous tool handler registered for background runs.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the call; an `Err` is reported to the model as tool output.
    async fn handle(&self, call: &ToolCall) -> Result<serde_json::Value, String>;
}

/// How a resolved tool gets executed.
#[derive(Clone)]
pub enum ExecutionStrategy {
    /// Park on the exchange until an external actor delivers the result.
    AwaitDelivery(ToolExchange),
    /// Synthesize a mock result immediately.
    Mock,
    /// Run the registered handler inline.
    Handler(Arc<dyn ToolHandler>),
    /// Executed by the provider itself; never resolved locally.
    ProviderExecuted,
    /// No executor — the driver must pause the chain.
    Unbound,
}

impl ExecutionStrategy {
    /// Whether a call to this tool forces the chain to pause.
    pub fn is_unbound(&self) -> bool {
        matches!(self, ExecutionStrategy::Unbound)
    }
}

/// One merged entry: the definition sent to the provider plus how to run it.
#[derive(Clone)]
pub struct ResolvedTool {
    pub definition: ToolDefinition,
    pub strategy: ExecutionStrategy,
}

/// Tool definitions grouped by origin, in precedence order.
#[derive(Clone, Default)]
pub struct ToolSources {
    /// Declared inline by the client/template
    pub client: Vec<ToolDefinition>,
    /// Platform built-ins (agent return tool and friends)
    pub platform: Vec<ToolDefinition>,
    /// Sibling documents marked as agents, resolved by path
    pub subagents: Vec<ToolDefinition>,
    /// Remote integration tools; additive only
    pub integrations: Vec<ToolDefinition>,
    /// Provider-native tools (web search etc.); additive only
    pub provider_native: Vec<ToolDefinition>,
}

/// Split a config's tool declarations into inline definitions, plain client
/// references, sub-agent references, and integration references.
///
/// In the list form, a name containing `/` is a sub-agent path and a name
/// containing `:` is an integration id; everything else refers to a
/// client-declared tool supplied out of band, returned so the caller can
/// check it against the client catalog.
pub fn partition_declarations(
    declarations: &ToolDeclarations,
) -> (Vec<ToolDefinition>, Vec<String>, Vec<String>, Vec<String>) {
    match declarations {
        ToolDeclarations::Inline(map) => {
            let defs = map
                .iter()
                .map(|(name, spec)| to_definition(name, spec))
                .collect();
            (defs, Vec::new(), Vec::new(), Vec::new())
        }
        ToolDeclarations::Names(names) => {
            let mut client_refs = Vec::new();
            let mut subagents = Vec::new();
            let mut integrations = Vec::new();
            for name in names {
                if name.contains('/') {
                    subagents.push(name.clone());
                } else if name.contains(':') {
                    integrations.push(name.clone());
                } else {
                    client_refs.push(name.clone());
                }
            }
            (Vec::new(), client_refs, subagents, integrations)
        }
    }
}

fn to_definition(name: &str, spec: &ToolSpec) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: spec.description.clone(),
        parameters: spec.parameters.clone(),
    }
}

/// Synthesize the mock result used by evaluation runs.
pub fn mock_result(call: &ToolCall) -> ToolResult {
    ToolResult::ok(
        call.id.clone(),
        serde_json::json!({
            "mocked": true,
            "tool_name": call.name,
            "arguments": call.arguments,
        }),
    )
}

/// Binds merged tool definitions to execution strategies for one run.
pub struct ToolResolver {
    environment: ToolEnvironment,
    exchange: ToolExchange,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolResolver {
    pub fn new(environment: ToolEnvironment) -> Self {
        Self {
            environment,
            exchange: ToolExchange::new(),
            handlers: HashMap::new(),
        }
    }

    /// Use a specific exchange (shared with the delivery side).
    pub fn with_exchange(mut self, exchange: ToolExchange) -> Self {
        self.exchange = exchange;
        self
    }

    /// Register a background handler for a tool name.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// The exchange external actors deliver results through.
    pub fn exchange(&self) -> &ToolExchange {
        &self.exchange
    }

    /// Merge all sources into one named map with strategies bound.
    pub fn resolve(&self, sources: &ToolSources) -> BTreeMap<String, ResolvedTool> {
        let mut merged: BTreeMap<String, ResolvedTool> = BTreeMap::new();

        // Overriding sources, in precedence order.
        for definition in sources
            .client
            .iter()
            .chain(sources.platform.iter())
            .chain(sources.subagents.iter())
        {
            merged.insert(
                definition.name.clone(),
                ResolvedTool {
                    definition: definition.clone(),
                    strategy: self.strategy_for(&definition.name),
                },
            );
        }

        // Additive sources: never displace an existing entry.
        for definition in sources.integrations.iter() {
            merged.entry(definition.name.clone()).or_insert_with(|| ResolvedTool {
                definition: definition.clone(),
                strategy: self.strategy_for(&definition.name),
            });
        }
        for definition in sources.provider_native.iter() {
            merged.entry(definition.name.clone()).or_insert_with(|| ResolvedTool {
                definition: definition.clone(),
                strategy: ExecutionStrategy::ProviderExecuted,
            });
        }

        debug!(count = merged.len(), "resolved tool map");
        merged
    }

    /// The strategy this run's environment assigns to a tool name. Also used
    /// for calls to names the model invented that no source declared.
    pub fn strategy_for(&self, name: &str) -> ExecutionStrategy {
        match self.environment {
            ToolEnvironment::Interactive => {
                ExecutionStrategy::AwaitDelivery(self.exchange.clone())
            }
            ToolEnvironment::Evaluation => ExecutionStrategy::Mock,
            ToolEnvironment::Background => match self.handlers.get(name) {
                Some(handler) => ExecutionStrategy::Handler(Arc::clone(handler)),
                None => ExecutionStrategy::Unbound,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    #[test]
    fn platform_overrides_client_on_collision() {
        let resolver = ToolResolver::new(ToolEnvironment::Interactive);
        let sources = ToolSources {
            client: vec![def("search", "client search")],
            platform: vec![def("search", "platform search")],
            ..Default::default()
        };

        let merged = resolver.resolve(&sources);
        assert_eq!(merged["search"].definition.description, "platform search");
    }

    #[test]
    fn subagent_overrides_platform_on_collision() {
        let resolver = ToolResolver::new(ToolEnvironment::Interactive);
        let sources = ToolSources {
            platform: vec![def("helper", "platform helper")],
            subagents: vec![def("helper", "agent helper")],
            ..Default::default()
        };

        let merged = resolver.resolve(&sources);
        assert_eq!(merged["helper"].definition.description, "agent helper");
    }

    #[test]
    fn additive_sources_never_override() {
        let resolver = ToolResolver::new(ToolEnvironment::Interactive);
        let sources = ToolSources {
            client: vec![def("search", "client search")],
            integrations: vec![def("search", "integration search")],
            provider_native: vec![def("search", "native search"), def("web_search", "native")],
            ..Default::default()
        };

        let merged = resolver.resolve(&sources);
        assert_eq!(merged["search"].definition.description, "client search");
        assert_eq!(merged["web_search"].definition.description, "native");
        assert!(matches!(
            merged["web_search"].strategy,
            ExecutionStrategy::ProviderExecuted
        ));
    }

    #[test]
    fn interactive_tools_await_delivery() {
        let resolver = ToolResolver::new(ToolEnvironment::Interactive);
        let merged = resolver.resolve(&ToolSources {
            client: vec![def("search", "")],
            ..Default::default()
        });
        assert!(matches!(
            merged["search"].strategy,
            ExecutionStrategy::AwaitDelivery(_)
        ));
    }

    #[test]
    fn evaluation_tools_mock() {
        let resolver = ToolResolver::new(ToolEnvironment::Evaluation);
        let merged = resolver.resolve(&ToolSources {
            client: vec![def("search", "")],
            ..Default::default()
        });
        assert!(matches!(merged["search"].strategy, ExecutionStrategy::Mock));
    }

    #[test]
    fn background_without_handler_is_unbound() {
        let resolver = ToolResolver::new(ToolEnvironment::Background);
        let merged = resolver.resolve(&ToolSources {
            client: vec![def("get_weather", "")],
            ..Default::default()
        });
        assert!(merged["get_weather"].strategy.is_unbound());
    }

    #[test]
    fn background_with_handler_executes_inline() {
        struct Echo;
        #[async_trait]
        impl ToolHandler for Echo {
            async fn handle(&self, call: &ToolCall) -> Result<serde_json::Value, String> {
                Ok(call.arguments.clone())
            }
        }

        let mut resolver = ToolResolver::new(ToolEnvironment::Background);
        resolver.register_handler("echo", Arc::new(Echo));
        let merged = resolver.resolve(&ToolSources {
            client: vec![def("echo", "")],
            ..Default::default()
        });
        assert!(matches!(
            merged["echo"].strategy,
            ExecutionStrategy::Handler(_)
        ));
    }

    #[test]
    fn partition_splits_list_declarations() {
        let decls = ToolDeclarations::Names(vec![
            "get_weather".into(),
            "agents/researcher".into(),
            "slack:post_message".into(),
        ]);
        let (inline, client_refs, subagents, integrations) = partition_declarations(&decls);
        assert!(inline.is_empty());
        assert_eq!(client_refs, vec!["get_weather".to_string()]);
        assert_eq!(subagents, vec!["agents/researcher".to_string()]);
        assert_eq!(integrations, vec!["slack:post_message".to_string()]);
    }

    #[test]
    fn partition_keeps_inline_definitions() {
        let decls = ToolDeclarations::Inline(HashMap::from([(
            "get_weather".to_string(),
            ToolSpec {
                description: "weather lookup".into(),
                parameters: serde_json::json!({ "type": "object" }),
            },
        )]));
        let (inline, client_refs, subagents, integrations) = partition_declarations(&decls);
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].name, "get_weather");
        assert!(client_refs.is_empty() && subagents.is_empty() && integrations.is_empty());
    }

    #[test]
    fn mock_result_shape() {
        let result = mock_result(&ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: serde_json::json!({"city": "NYC"}),
        });
        let payload = result.result.unwrap();
        assert_eq!(payload["mocked"], true);
        assert_eq!(payload["tool_name"], "get_weather");
    }
}

//! Step and chain configuration.
//!
//! A [`ChainConfig`] is attached to a compiled prompt as a whole and may be
//! overridden per step. The engine validates it before every provider call;
//! nothing here talks to a provider directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default step ceiling when the config does not set one.
pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Absolute step ceiling, regardless of configuration.
pub const ABSOLUTE_MAX_STEPS: u32 = 150;

/// Declared tool specification: description plus a JSON Schema for the
/// parameters. The resolver turns these into provider-facing definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's parameters
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Tool declarations as they appear in a config.
///
/// Older templates declare tools as a name → definition map; newer ones use
/// a list of names (client references, sub-agent paths, integration ids).
/// Both shapes are accepted and normalized by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDeclarations {
    /// Legacy shape: inline definitions keyed by tool name.
    Inline(HashMap<String, ToolSpec>),
    /// Current shape: a list of tool identifiers resolved elsewhere.
    Names(Vec<String>),
}

impl Default for ToolDeclarations {
    fn default() -> Self {
        ToolDeclarations::Names(Vec::new())
    }
}

impl ToolDeclarations {
    /// Whether no tools are declared at all.
    pub fn is_empty(&self) -> bool {
        match self {
            ToolDeclarations::Inline(map) => map.is_empty(),
            ToolDeclarations::Names(names) => names.is_empty(),
        }
    }
}

/// How the model's final output should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Free-form text.
    Text,
    /// A JSON object conforming to the configured schema.
    Object,
}

/// Configuration for a chain or a single step.
///
/// Per-step configs merge over the chain-level base config: any field the
/// step sets wins, anything it leaves unset falls through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Provider name, resolved against the caller-supplied provider map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature; absent or 0 means the call is treated as deterministic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Per-run step cap, clamped to [`ABSOLUTE_MAX_STEPS`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    /// Declared tools (legacy map or name list)
    #[serde(default, skip_serializing_if = "ToolDeclarations::is_empty")]
    pub tools: ToolDeclarations,

    /// JSON Schema for structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,

    /// Response format hint ("text" or "json"); unknown values are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,

    /// Whether this step runs as an autonomous agent
    #[serde(default)]
    pub agent: bool,
}

impl ChainConfig {
    /// Merge a per-step override over this base config.
    pub fn merged_with(&self, step: &ChainConfig) -> ChainConfig {
        ChainConfig {
            provider: step.provider.clone().or_else(|| self.provider.clone()),
            model: step.model.clone().or_else(|| self.model.clone()),
            temperature: step.temperature.or(self.temperature),
            max_steps: step.max_steps.or(self.max_steps),
            tools: if step.tools.is_empty() {
                self.tools.clone()
            } else {
                step.tools.clone()
            },
            schema: step.schema.clone().or_else(|| self.schema.clone()),
            response_format: step
                .response_format
                .clone()
                .or_else(|| self.response_format.clone()),
            agent: step.agent || self.agent,
        }
    }

    /// The effective step ceiling: configured value bounded by the absolute
    /// maximum, defaulting to [`DEFAULT_MAX_STEPS`].
    pub fn effective_max_steps(&self) -> u32 {
        self.max_steps
            .unwrap_or(DEFAULT_MAX_STEPS)
            .min(ABSOLUTE_MAX_STEPS)
    }

    /// Whether calls with this config are deterministic enough to memoize.
    pub fn is_deterministic(&self) -> bool {
        match self.temperature {
            None => true,
            Some(t) => t == 0.0,
        }
    }
}

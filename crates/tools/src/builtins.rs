//! Platform built-in tool definitions.

use stepchain_core::provider::ToolDefinition;

/// The tool an autonomous agent calls to end its workflow. A call to this
/// tool is the chain-completion signal in agent mode.
pub const AGENT_RETURN_TOOL: &str = "agent_return";

/// Definition of the agent return tool.
pub fn agent_return_definition() -> ToolDefinition {
    ToolDefinition {
        name: AGENT_RETURN_TOOL.into(),
        description: "Finish the autonomous workflow and return the final result to the caller."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "result": {
                    "description": "The final result of the workflow"
                }
            },
            "required": ["result"]
        }),
    }
}

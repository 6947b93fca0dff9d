//! Step validation.
//!
//! Takes a raw chain step and turns it into a [`ValidatedStep`] the driver
//! can hand to the provider gateway: required fields checked, credentials
//! resolved from the caller-supplied provider map, provider-specific message
//! corrections applied, output type computed. Everything here runs before
//! any provider call; a failure is fatal for the run.

use stepchain_core::chain::StepOutput;
use stepchain_core::config::{ChainConfig, OutputType};
use stepchain_core::error::{ChainError, ErrorCode};
use stepchain_core::message::{Conversation, Message, MessageToolCall, Role};
use stepchain_core::provider::{ProviderHandle, ProviderMap};
use stepchain_tools::AGENT_RETURN_TOOL;
use tracing::debug;

/// Synthetic tool-call id used by the agent framing pair.
const AGENT_FRAMING_CALL_ID: &str = "agent_workflow_start";

/// One validated unit of work. Created fresh each iteration, never mutated
/// after validation, consumed once by the provider call.
pub struct ValidatedStep {
    /// The resolved gateway handle
    pub handle: ProviderHandle,

    /// The conversation as the provider should see it (provider rule
    /// corrections and agent framing applied)
    pub conversation: Conversation,

    /// The merged step config
    pub config: ChainConfig,

    /// Whether the template reported completion at this step
    pub chain_completed: bool,

    /// How the final output should be interpreted
    pub output_type: OutputType,

    /// The output schema, when one is configured
    pub output_schema: Option<serde_json::Value>,
}

// The gateway handle is a trait object, so Debug is written by hand.
impl std::fmt::Debug for ValidatedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedStep")
            .field("provider", &self.handle.gateway.name())
            .field("messages", &self.conversation.len())
            .field("config", &self.config)
            .field("chain_completed", &self.chain_completed)
            .field("output_type", &self.output_type)
            .finish_non_exhaustive()
    }
}

/// Validate a chain step against the provider map.
pub fn validate_step(step: StepOutput, providers: &ProviderMap) -> Result<ValidatedStep, ChainError> {
    let config = step.config;

    let provider_name = config.provider.as_deref().ok_or_else(|| {
        ChainError::new(
            ErrorCode::DocumentConfigError,
            "step config is missing a provider",
        )
    })?;

    if config.model.is_none() {
        return Err(ChainError::new(
            ErrorCode::DocumentConfigError,
            "step config is missing a model",
        ));
    }

    if let Some(t) = config.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(ChainError::new(
            ErrorCode::AiProviderConfigError,
            format!("temperature {t} is outside the supported range [0, 2]"),
        ));
    }

    let handle = providers.get(provider_name).cloned().ok_or_else(|| {
        ChainError::new(
            ErrorCode::MissingProvider,
            format!("provider '{provider_name}' is not configured"),
        )
    })?;

    let output_type = compute_output_type(&config)?;
    let output_schema = config.schema.clone();

    let mut conversation = step.conversation;
    apply_provider_rules(provider_name, &mut conversation);
    if config.agent {
        apply_agent_framing(&mut conversation);
    }

    debug!(
        provider = provider_name,
        model = config.model.as_deref().unwrap_or(""),
        messages = conversation.len(),
        "validated step"
    );

    Ok(ValidatedStep {
        handle,
        conversation,
        config,
        chain_completed: step.completed,
        output_type,
        output_schema,
    })
}

/// Compute the output type from the response format and schema.
fn compute_output_type(config: &ChainConfig) -> Result<OutputType, ChainError> {
    match config.response_format.as_deref() {
        None => Ok(if config.schema.is_some() {
            OutputType::Object
        } else {
            OutputType::Text
        }),
        Some("text") => Ok(OutputType::Text),
        Some("json") | Some("json_object") => Ok(OutputType::Object),
        Some(other) => Err(ChainError::new(
            ErrorCode::UnsupportedProviderResponseType,
            format!("unsupported response format '{other}'"),
        )),
    }
}

/// Provider-specific message-shape corrections.
///
/// Google rejects conversations without a user message, so one is appended
/// when the template produced none.
fn apply_provider_rules(provider: &str, conversation: &mut Conversation) {
    if provider == "google" && !conversation.has_role(Role::User) {
        conversation.push(Message::user("Continue."));
    }
}

/// Inject the synthetic tool-call/tool-result pair that frames an autonomous
/// workflow. Applied to the provider-facing conversation only, never to the
/// chain transcript, so a resumed run re-applies it identically.
fn apply_agent_framing(conversation: &mut Conversation) {
    let already_framed = conversation
        .messages
        .iter()
        .any(|m| m.tool_call_id.as_deref() == Some(AGENT_FRAMING_CALL_ID));
    if already_framed {
        return;
    }

    conversation.push(Message::assistant_with_tools(
        "",
        vec![MessageToolCall {
            id: AGENT_FRAMING_CALL_ID.into(),
            name: "start_autonomous_workflow".into(),
            arguments: serde_json::json!({}),
        }],
    ));
    conversation.push(Message::tool_result(
        AGENT_FRAMING_CALL_ID,
        format!(
            "Autonomous workflow started. Work towards the goal and call \
             {AGENT_RETURN_TOOL} with the final result when you are done."
        ),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use stepchain_core::provider::{
        GatewayCall, GatewayRequest, ProviderFailure, ProviderGateway,
    };

    struct NoopGateway;

    #[async_trait]
    impl ProviderGateway for NoopGateway {
        fn name(&self) -> &str {
            "noop"
        }
        async fn call(&self, _request: GatewayRequest) -> Result<GatewayCall, ProviderFailure> {
            Err(ProviderFailure::Network("noop".into()))
        }
    }

    fn providers() -> ProviderMap {
        let mut map = ProviderMap::new();
        map.insert("openai", Arc::new(NoopGateway));
        map.insert("google", Arc::new(NoopGateway));
        map
    }

    fn step(config: ChainConfig) -> StepOutput {
        StepOutput {
            completed: false,
            conversation: Conversation::from_messages(vec![Message::user("hi")]),
            config,
        }
    }

    fn base_config() -> ChainConfig {
        ChainConfig {
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_provider_field_is_config_error() {
        let err = validate_step(
            step(ChainConfig {
                model: Some("gpt-4o".into()),
                ..Default::default()
            }),
            &providers(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::DocumentConfigError);
    }

    #[test]
    fn unknown_provider_is_missing_provider() {
        let err = validate_step(
            step(ChainConfig {
                provider: Some("nonexistent".into()),
                model: Some("m".into()),
                ..Default::default()
            }),
            &providers(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingProvider);
    }

    #[test]
    fn debug_output_names_the_provider() {
        let validated = validate_step(step(base_config()), &providers()).unwrap();
        let rendered = format!("{validated:?}");
        assert!(rendered.contains("ValidatedStep"));
        assert!(rendered.contains("noop"));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let err = validate_step(
            step(ChainConfig {
                temperature: Some(3.5),
                ..base_config()
            }),
            &providers(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::AiProviderConfigError);
    }

    #[test]
    fn output_type_follows_schema_and_format() {
        let validated = validate_step(step(base_config()), &providers()).unwrap();
        assert_eq!(validated.output_type, OutputType::Text);

        let validated = validate_step(
            step(ChainConfig {
                schema: Some(serde_json::json!({"type": "object"})),
                ..base_config()
            }),
            &providers(),
        )
        .unwrap();
        assert_eq!(validated.output_type, OutputType::Object);

        let err = validate_step(
            step(ChainConfig {
                response_format: Some("xml".into()),
                ..base_config()
            }),
            &providers(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedProviderResponseType);
    }

    #[test]
    fn google_gets_a_user_message_when_missing() {
        let out = StepOutput {
            completed: false,
            conversation: Conversation::from_messages(vec![Message::system("rules only")]),
            config: ChainConfig {
                provider: Some("google".into()),
                model: Some("gemini".into()),
                ..Default::default()
            },
        };
        let validated = validate_step(out, &providers()).unwrap();
        assert!(validated.conversation.has_role(Role::User));

        // A conversation that already has one is left alone.
        let out = StepOutput {
            completed: false,
            conversation: Conversation::from_messages(vec![Message::user("hi")]),
            config: ChainConfig {
                provider: Some("google".into()),
                model: Some("gemini".into()),
                ..Default::default()
            },
        };
        let validated = validate_step(out, &providers()).unwrap();
        assert_eq!(validated.conversation.len(), 1);
    }

    #[test]
    fn agent_framing_injected_once() {
        let validated = validate_step(
            step(ChainConfig {
                agent: true,
                ..base_config()
            }),
            &providers(),
        )
        .unwrap();

        // user + synthetic assistant call + synthetic result
        assert_eq!(validated.conversation.len(), 3);
        let framing = &validated.conversation.messages[1];
        assert_eq!(framing.tool_calls[0].name, "start_autonomous_workflow");

        // Re-validating the framed conversation does not duplicate the pair.
        let out = StepOutput {
            completed: false,
            conversation: validated.conversation.clone(),
            config: ChainConfig {
                agent: true,
                ..base_config()
            },
        };
        let revalidated = validate_step(out, &providers()).unwrap();
        assert_eq!(revalidated.conversation.len(), 3);
    }
}

//! The chain cursor — a serializable, step-at-a-time view of a compiled
//! prompt template.
//!
//! The template compiler itself is an external collaborator: it hands us a
//! [`CompiledPrompt`] (ordered step blueprints plus a base config) and the
//! chain advances through it one step per provider round-trip. The cursor is
//! fully serializable so a paused run can be reconstructed in a different
//! process hours later.

use serde::{Deserialize, Serialize};

use crate::config::ChainConfig;
use crate::error::{ChainError, ErrorCode};
use crate::message::{Conversation, Message};

/// One step of a compiled prompt: the messages the template contributes at
/// this point plus any per-step config overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepBlueprint {
    /// Messages the template adds before this step's provider call
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Per-step config overrides, merged over the chain base config
    #[serde(default)]
    pub config: ChainConfig,
}

/// The output of the external template compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPrompt {
    /// Ordered step blueprints
    pub steps: Vec<StepBlueprint>,

    /// Chain-level base config
    #[serde(default)]
    pub config: ChainConfig,
}

/// The result of advancing the chain by one step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Whether the template has no further steps after this one
    pub completed: bool,

    /// The full conversation to send to the provider for this step
    pub conversation: Conversation,

    /// The merged config for this step
    pub config: ChainConfig,
}

/// A stateful cursor over a compiled prompt.
///
/// `step()` consumes feedback messages from the previous provider round
/// (assistant reply, tool results), appends the next blueprint's messages,
/// and reports whether the template is exhausted. The transcript accumulates
/// every message ever produced, which is what makes pause/resume possible:
/// a deserialized chain continues with an identical message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    steps: Vec<StepBlueprint>,
    config: ChainConfig,
    cursor: usize,
    transcript: Vec<Message>,
}

impl Chain {
    /// Build a chain from a compiled prompt.
    ///
    /// A prompt with zero steps is a compile error: there is nothing to run.
    pub fn new(prompt: CompiledPrompt) -> Result<Self, ChainError> {
        if prompt.steps.is_empty() {
            return Err(ChainError::new(
                ErrorCode::ChainCompileError,
                "compiled prompt has no steps",
            ));
        }
        Ok(Self {
            steps: prompt.steps,
            config: prompt.config,
            cursor: 0,
            transcript: Vec::new(),
        })
    }

    /// Advance one step.
    ///
    /// Feedback messages (the previous assistant reply and any tool results)
    /// are appended to the transcript first, then the next blueprint's
    /// messages. The first call passes no feedback.
    pub fn step(&mut self, feedback: &[Message]) -> Result<StepOutput, ChainError> {
        if self.cursor >= self.steps.len() {
            return Err(ChainError::new(
                ErrorCode::ChainCompileError,
                "chain already completed, no further steps",
            ));
        }

        self.transcript.extend_from_slice(feedback);

        let blueprint = &self.steps[self.cursor];
        self.transcript.extend_from_slice(&blueprint.messages);
        let config = self.config.merged_with(&blueprint.config);

        self.cursor += 1;
        Ok(StepOutput {
            completed: self.cursor >= self.steps.len(),
            conversation: Conversation::from_messages(self.transcript.clone()),
            config,
        })
    }

    /// Append feedback without advancing the cursor and return the current
    /// conversation.
    ///
    /// Used by agent mode: once the blueprints are exhausted the autonomous
    /// loop keeps extending the transcript until the model calls its return
    /// tool, so completion is signalled by the model rather than the cursor.
    pub fn continue_with(&mut self, feedback: &[Message]) -> Conversation {
        self.transcript.extend_from_slice(feedback);
        Conversation::from_messages(self.transcript.clone())
    }

    /// The merged config of the most recently consumed step.
    ///
    /// Agent-mode runs keep looping after the last blueprint under the final
    /// step's config; a restored cursor must report the same config a live
    /// one would, so this derives it from the blueprints rather than caching
    /// it alongside the transcript.
    pub fn last_step_config(&self) -> ChainConfig {
        match self.cursor.checked_sub(1).and_then(|i| self.steps.get(i)) {
            Some(blueprint) => self.config.merged_with(&blueprint.config),
            None => self.config.clone(),
        }
    }

    /// Whether every blueprint has been consumed.
    pub fn completed(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Number of messages currently in the transcript.
    ///
    /// Used by resume to prime the seen-message cursor so events only report
    /// messages the caller has not observed yet.
    pub fn message_count(&self) -> usize {
        self.transcript.len()
    }

    /// Serialize the cursor for the pause cache.
    pub fn serialize(&self) -> Result<Vec<u8>, ChainError> {
        serde_json::to_vec(self).map_err(|e| {
            ChainError::new(
                ErrorCode::ChainCompileError,
                format!("failed to serialize chain: {e}"),
            )
        })
    }

    /// Restore a cursor serialized by [`Chain::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ChainError> {
        serde_json::from_slice(bytes).map_err(|e| {
            ChainError::new(
                ErrorCode::ChainCompileError,
                format!("failed to deserialize chain: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_prompt() -> CompiledPrompt {
        CompiledPrompt {
            steps: vec![
                StepBlueprint {
                    messages: vec![Message::system("be brief"), Message::user("hi")],
                    config: ChainConfig::default(),
                },
                StepBlueprint {
                    messages: vec![Message::user("and now in French")],
                    config: ChainConfig::default(),
                },
            ],
            config: ChainConfig {
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn empty_prompt_is_a_compile_error() {
        let err = Chain::new(CompiledPrompt {
            steps: vec![],
            config: ChainConfig::default(),
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainCompileError);
    }

    #[test]
    fn step_appends_feedback_then_blueprint() {
        let mut chain = Chain::new(two_step_prompt()).unwrap();

        let first = chain.step(&[]).unwrap();
        assert!(!first.completed);
        assert_eq!(first.conversation.len(), 2);

        let reply = Message::assistant("hello");
        let second = chain.step(std::slice::from_ref(&reply)).unwrap();
        assert!(second.completed);
        // system, user, assistant, user
        assert_eq!(second.conversation.len(), 4);
        assert_eq!(second.conversation.messages[2], reply);
    }

    #[test]
    fn stepping_past_the_end_fails() {
        let mut chain = Chain::new(two_step_prompt()).unwrap();
        chain.step(&[]).unwrap();
        chain.step(&[]).unwrap();
        assert!(chain.completed());
        assert!(chain.step(&[]).is_err());
    }

    #[test]
    fn serialization_preserves_cursor_and_transcript() {
        let mut chain = Chain::new(two_step_prompt()).unwrap();
        chain.step(&[]).unwrap();

        let bytes = chain.serialize().unwrap();
        let mut restored = Chain::deserialize(&bytes).unwrap();
        assert_eq!(restored.message_count(), chain.message_count());

        // Both cursors should produce the same next conversation.
        let reply = Message::assistant("hello");
        let a = chain.step(std::slice::from_ref(&reply)).unwrap();
        let b = restored.step(std::slice::from_ref(&reply)).unwrap();
        assert_eq!(a.conversation, b.conversation);
        assert_eq!(a.completed, b.completed);
    }

    #[test]
    fn last_step_config_merges_the_consumed_blueprint() {
        let mut prompt = two_step_prompt();
        prompt.steps[1].config.temperature = Some(0.9);
        let mut chain = Chain::new(prompt).unwrap();

        assert_eq!(chain.last_step_config().temperature, None);
        chain.step(&[]).unwrap();
        chain.step(&[]).unwrap();
        let config = chain.last_step_config();
        assert_eq!(config.provider.as_deref(), Some("openai"));
        assert_eq!(config.temperature, Some(0.9));
    }

    #[test]
    fn deserialize_rejects_garbage() {
        let err = Chain::deserialize(b"not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainCompileError);
    }
}

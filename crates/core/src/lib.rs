//! Core domain types and traits for StepChain.
//!
//! StepChain runs a compiled prompt template as a multi-step conversation
//! against an LLM provider, pausing when a tool call needs external
//! resolution and resuming later from a cached cursor. This crate holds the
//! value objects and contracts everything else is built on:
//!
//! - [`message`] — messages, roles, conversations
//! - [`chain`] — the serializable template cursor
//! - [`config`] — chain/step configuration and its merge rules
//! - [`provider`] — the opaque provider-gateway contract
//! - [`tool`] — tool calls and results
//! - [`cache`] — the get/set/delete cache-store contract
//! - [`error`] — the tagged error taxonomy with stable codes
//! - [`sink`] — the external run-error store contract

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod sink;
pub mod tool;

pub use cache::{CacheStore, CacheStoreError};
pub use chain::{Chain, CompiledPrompt, StepBlueprint, StepOutput};
pub use config::{
    ABSOLUTE_MAX_STEPS, ChainConfig, DEFAULT_MAX_STEPS, OutputType, ToolDeclarations, ToolSpec,
};
pub use error::{ChainError, ErrorCode, Result};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{
    FinishReason, GatewayCall, GatewayRequest, ProviderDelta, ProviderFailure, ProviderGateway,
    ProviderHandle, ProviderMap, ProviderReply, ToolDefinition, Usage,
};
pub use sink::{RunErrorRecord, RunErrorSink, SinkError};
pub use tool::{ToolCall, ToolResult};

//! The run-error sink — an external store for terminal run errors.
//!
//! Persistence is a side effect layered on top of the engine: a sink failure
//! is logged and swallowed, it never blocks event delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorCode;

/// A persisted run error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunErrorRecord {
    /// The run this error belongs to
    pub run_id: Uuid,

    /// What kind of runnable failed (e.g. "document_run", "evaluation_run")
    pub errorable_type: String,

    /// The stable error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Optional structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A sink write failure. Logged and swallowed by the engine.
#[derive(Debug, Clone, Error)]
#[error("run error sink failure: {0}")]
pub struct SinkError(pub String);

/// The external run-error store.
#[async_trait]
pub trait RunErrorSink: Send + Sync {
    /// Persist one run error.
    async fn create(&self, record: RunErrorRecord) -> Result<(), SinkError>;
}

//! Crate-wide error taxonomy.
//!
//! The Orchestrator is the only component allowed to turn one of these into
//! an HTTP status code; every other component either recovers via a
//! documented fallback or bubbles the typed error up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed payload / unreadable multipart. Surfaces as 400.
    #[error("input error: {0}")]
    Input(String),

    /// NEW-path store write exhausted retries. Surfaces as 5xx so the
    /// gateway redelivers (the Dedup Gate will suppress double work).
    #[error("store write failed: {0}")]
    StoreFatal(#[from] crate::store::StoreError),

    /// Unreachable in normal flow; returned as 500 only to force redelivery.
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm call timed out")]
    Timeout,
    #[error("llm endpoint returned status {0}")]
    Http(u16),
    #[error("llm response failed schema validation: {0}")]
    SchemaMismatch(String),
    #[error("llm transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail send timed out")]
    Timeout,
    #[error("mail endpoint returned status {0}")]
    Http(u16),
    #[error("mail transport error: {0}")]
    Transport(String),
}

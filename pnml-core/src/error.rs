//! Error types for the parser, registry, and firing engine.

use thiserror::Error;

/// Malformed workflow text. Carries a message and, where known, the
/// 0-based line at which the failure was detected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub line: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

/// A callable registered for an inscription failed while executing, or the
/// inscription's code raised in a way the engine could not recover from.
///
/// A *missing* callable is not represented by this type — per spec §4.3/§7,
/// a guard with no resolved callable is treated as passing, and an
/// expression with no resolved callable leaves the transition to fire
/// structurally. This variant only covers a callable that resolved and then
/// failed during invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("inscription '{inscription_id}' on transition '{transition_id}' failed: {message}")]
pub struct InscriptionError {
    pub transition_id: String,
    pub inscription_id: String,
    pub message: String,
}

/// A malformed request at the protocol-shim boundary (C6). Never fatal to
/// the engine; the shim reports it to the caller and continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("protocol error: {0}")]
pub struct ShimProtocolError(pub String);

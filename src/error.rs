//! Error taxonomy for the sync layer.
//!
//! Query failures stick to their cache entry and fan out to every
//! subscriber, so both error types are `Clone` and carry owned messages.

use thiserror::Error;

/// Failure of a query fetch or a registry-level lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query `{name}` is not registered")]
    Unknown { name: String },
    #[error("query fetch failed: {message}")]
    Fetch { message: String },
    #[error("query arguments rejected: {message}")]
    Arguments { message: String },
}

impl QueryError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::Unknown { name: name.into() }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    pub fn arguments(message: impl Into<String>) -> Self {
        Self::Arguments {
            message: message.into(),
        }
    }
}

/// Failure of an action invocation, surfaced only through its submission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action `{name}` is not registered")]
    Unknown { name: String },
    #[error("action mutation failed: {message}")]
    Mutation { message: String },
    #[error("action input rejected: {message}")]
    Input { message: String },
    #[error("action executor was dropped before `{op}` could run")]
    ExecutorGone { op: &'static str },
}

impl ActionError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::Unknown { name: name.into() }
    }

    pub fn mutation(message: impl Into<String>) -> Self {
        Self::Mutation {
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }
}

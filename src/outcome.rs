//! Settled query outcomes.
//!
//! A fetch settles in exactly one of three ways: data, failure, or a
//! redirect. Redirects are a control outcome, not an error; call sites
//! match on all three variants instead of unwinding.

use std::sync::Arc;

use serde_json::Value;

use crate::error::QueryError;

/// Cached payloads are shared, not copied, between the registry and its
/// subscribers.
pub type Payload = Arc<Value>;

/// Navigation target raised instead of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// What a fetcher hands back to the registry.
#[derive(Debug, Clone)]
pub enum FetchReply {
    Data(Value),
    Redirect(Redirect),
}

/// Settled state of a cache entry, fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Ready(Payload),
    Failed(QueryError),
    Redirect(Redirect),
}

impl QueryOutcome {
    pub(crate) fn from_fetch(result: Result<FetchReply, QueryError>) -> Self {
        match result {
            Ok(FetchReply::Data(value)) => Self::Ready(Arc::new(value)),
            Ok(FetchReply::Redirect(redirect)) => Self::Redirect(redirect),
            Err(err) => Self::Failed(err),
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Ready(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn redirect(&self) -> Option<&Redirect> {
        match self {
            Self::Redirect(redirect) => Some(redirect),
            _ => None,
        }
    }
}

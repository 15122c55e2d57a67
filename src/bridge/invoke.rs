use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, trace};

use super::binding::Binding;

/// Payload posted by generated stubs.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    pub scope: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

impl InvokeRequest {
    pub fn parse(payload: &str) -> Result<Self, DecodeFailure> {
        serde_json::from_str(payload).map_err(DecodeFailure::Malformed)
    }
}

/// Why a binding declined an invoke.
///
/// Never reported to script: a declined invoke falls through to the next handler in the
/// chain or is dropped.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("malformed invoke payload: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("scope {0:?} does not match")]
    ScopeMismatch(String),
    #[error("no method named {0:?}")]
    UnknownMethod(String),
    #[error("method {method} takes {expected} params, got {actual}")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("missing param {index}")]
    MissingParam { index: usize },
    #[error("param {index} has the wrong shape: {source}")]
    Param {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("bound value is absent")]
    Absent,
}

/// Try to handle `payload` with `binding`. Returns whether the method was called.
pub fn handle_invoke(binding: &Binding, payload: &str) -> bool {
    match try_invoke(binding, payload) {
        Ok(()) => true,
        Err(DecodeFailure::ScopeMismatch(scope)) => {
            trace!(target = "bridge", binding = binding.name(), %scope, "invoke for another scope");
            false
        }
        Err(err) => {
            debug!(target = "bridge", binding = binding.name(), error = %err, "invoke declined");
            false
        }
    }
}

fn try_invoke(binding: &Binding, payload: &str) -> Result<(), DecodeFailure> {
    let request = InvokeRequest::parse(payload)?;
    if request.scope != binding.name() {
        return Err(DecodeFailure::ScopeMismatch(request.scope));
    }

    let method = binding
        .method(&request.method)
        .ok_or_else(|| DecodeFailure::UnknownMethod(request.method.clone()))?;

    if request.params.len() != method.arity() {
        return Err(DecodeFailure::Arity {
            method: request.method,
            expected: method.arity(),
            actual: request.params.len(),
        });
    }

    method.invoke(&request.params)?;
    trace!(target = "bridge", binding = binding.name(), method = %request.method, "invoked");
    Ok(())
}

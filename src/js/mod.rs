pub mod runtime;

use thiserror::Error;

pub use runtime::QuickJsEngine;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("failed to serialize bound state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("window has been terminated")]
    Terminated,
}

/// The browser engine as seen from the bridge: something that can evaluate script source.
///
/// Script-originated invokes travel the other way, through the
/// [`InvokeSink`](crate::window::InvokeSink) handed to the engine when its window is built.
pub trait ScriptEngine {
    fn evaluate(&self, script: &str) -> Result<(), EvalError>;
}

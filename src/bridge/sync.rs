use std::fmt;
use std::sync::Arc;

use tracing::error;

use super::binding::Binding;
use crate::dispatch::{DispatchError, DispatchHandle, DispatchToken};
use crate::js::{EvalError, ScriptEngine};
use crate::window::Window;

/// Script that stores the binding's current state in `name.data` and hands it to
/// `name.render` when script defined one.
pub fn sync_script(binding: &Binding, json_parse_threshold: usize) -> Result<String, EvalError> {
    let json = binding.state_json()?;
    let value = script_literal(&json, json_parse_threshold);
    Ok(format!(
        "{name}.data={value};if({name}.render){{{name}.render({value});}}",
        name = binding.name()
    ))
}

/// Turn serialized JSON into a script expression.
///
/// Objects and arrays above the threshold go through `JSON.parse('..')`. U+2028 and U+2029
/// are escaped in both forms since older script grammars treat them as line terminators.
fn script_literal(json: &str, json_parse_threshold: usize) -> String {
    let json = json.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029");
    let composite = json.starts_with('{') || json.starts_with('[');
    if !composite || json.len() <= json_parse_threshold {
        return json;
    }

    let mut literal = String::with_capacity(json.len() + 16);
    literal.push_str("JSON.parse('");
    for c in json.chars() {
        if c == '\\' || c == '\'' {
            literal.push('\\');
        }
        literal.push(c);
    }
    literal.push_str("')");
    literal
}

/// Pushes a binding's current state into the script environment.
///
/// Returned by [`Window::bind`]. Call it after mutating the bound object outside the invoke
/// path. Evaluation belongs to the UI thread: from other threads use [`SyncFn::schedule`].
#[derive(Clone)]
pub struct SyncFn {
    binding: Arc<Binding>,
    json_parse_threshold: usize,
}

impl SyncFn {
    pub(crate) fn new(binding: Arc<Binding>, json_parse_threshold: usize) -> Self {
        Self {
            binding,
            json_parse_threshold,
        }
    }

    pub fn binding_name(&self) -> &str {
        self.binding.name()
    }

    /// The sync script for the current state, without evaluating it.
    pub fn script(&self) -> Result<String, EvalError> {
        sync_script(&self.binding, self.json_parse_threshold)
    }

    /// Evaluate the sync script in `window`. UI thread only.
    pub fn sync<E: ScriptEngine + 'static>(&self, window: &Window<E>) -> Result<(), EvalError> {
        let script = self.script()?;
        window.evaluate(&script)
    }

    /// Run a sync on the UI thread of the window behind `handle`. Evaluation failures are
    /// logged there since nobody is left to receive them.
    pub fn schedule<E>(&self, handle: &DispatchHandle<E>) -> Result<DispatchToken, DispatchError>
    where
        E: ScriptEngine + 'static,
    {
        let sync = self.clone();
        handle.dispatch(move |window: &mut Window<E>| {
            if let Err(err) = sync.sync(window) {
                error!(
                    target = "bridge",
                    binding = sync.binding_name(),
                    error = %err,
                    "scheduled sync failed"
                );
            }
        })
    }
}

impl fmt::Debug for SyncFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFn")
            .field("binding", &self.binding.name())
            .field("json_parse_threshold", &self.json_parse_threshold)
            .finish_non_exhaustive()
    }
}

use anyhow::{anyhow, Context as _, Result};
use rquickjs::context::EvalOptions;
use rquickjs::{Context, Ctx, Error as JsError, FromJs, Function, Runtime, Value};
use tracing::{debug, error, info, warn};

use super::{EvalError, ScriptEngine};
use crate::config::BridgeConfig;
use crate::window::InvokeSink;

const BRIDGE_SCRIPT_NAME: &str = "switchyard-bridge.js";

/// Script engine backed by QuickJS.
///
/// Stands in for a window's browser engine: script runs in a full QuickJS context, stubs post
/// through the invoke channel installed at the configured path, and `console` output lands in
/// `tracing`.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    max_pending_jobs: usize,
}

impl QuickJsEngine {
    /// Create an engine whose invoke channel posts into `sink`.
    pub fn new(sink: InvokeSink, config: &BridgeConfig) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self {
            runtime,
            context,
            max_pending_jobs: config.max_pending_jobs,
        };
        engine
            .install_console()
            .context("failed to install console")?;
        engine
            .install_invoke_channel(sink, &config.invoke_channel)
            .with_context(|| format!("failed to install invoke channel {}", config.invoke_channel))?;
        Ok(engine)
    }

    /// Evaluate `source` and discard its completion value.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate `source` and convert its completion value into `V`.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> FromJs<'js>,
    {
        let script = tag_source(source, filename);
        let value = self.context.with(|ctx| {
            match ctx.eval_with_options::<V, _>(script, classic_script()) {
                Ok(value) => Ok(value),
                Err(JsError::Exception) => Err(anyhow!(describe_exception(&ctx))),
                Err(err) => Err(anyhow::Error::from(err)),
            }
        })?;

        // Render hooks may leave promise continuations behind.
        self.drain_jobs();
        Ok(value)
    }

    /// Run queued promise jobs, at most `max_pending_jobs` of them. Returns how many ran.
    fn drain_jobs(&self) -> usize {
        let mut ran = 0;
        while ran < self.max_pending_jobs && self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(err) => {
                    error!(target = "quickjs", error = ?err, "pending job threw");
                    break;
                }
            }
        }

        if ran == self.max_pending_jobs && self.runtime.is_job_pending() {
            warn!(target = "quickjs", limit = self.max_pending_jobs, "job limit reached");
        } else if ran > 0 {
            debug!(target = "quickjs", jobs = ran, "drained pending jobs");
        }
        ran
    }

    /// Run `f` inside the QuickJS context.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(f).map_err(anyhow::Error::from)
    }

    fn install_console(&self) -> Result<()> {
        self.with_context(|ctx| {
            let console_fn = Function::new(ctx.clone(), console_to_tracing)?
                .with_name("__switchyard_console")?;
            ctx.globals().set("__switchyard_console", console_fn)?;
            ctx.eval::<(), _>(CONSOLE_SHIM)
        })
    }

    fn install_invoke_channel(&self, sink: InvokeSink, channel: &str) -> Result<()> {
        // Dotted identifier path, checked when the config was validated.
        let shim = INVOKE_SHIM.replace("__CHANNEL__", &serde_json::to_string(channel)?);
        self.with_context(move |ctx| {
            let post = Function::new(ctx.clone(), move |payload: String| sink.post(payload))?
                .with_name("__switchyard_invoke")?;
            ctx.globals().set("__switchyard_invoke", post)?;
            ctx.eval::<(), _>(shim)
        })
    }
}

impl ScriptEngine for QuickJsEngine {
    fn evaluate(&self, script: &str) -> Result<(), EvalError> {
        self.eval(script, BRIDGE_SCRIPT_NAME)
            .map_err(|err| EvalError::Script(format!("{err:#}")))
    }
}

/// Page scripts run sloppy, so stubs can create their namespace by plain assignment.
fn classic_script() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.strict = false;
    options
}

fn tag_source(source: &str, filename: &str) -> String {
    let separator = if source.ends_with('\n') { "" } else { "\n" };
    format!("{source}{separator}//# sourceURL={filename}\n")
}

fn console_to_tracing(level: String, message: String) {
    match level.as_str() {
        "error" => error!(target = "quickjs", %message),
        "warn" => warn!(target = "quickjs", %message),
        "debug" => debug!(target = "quickjs", %message),
        _ => info!(target = "quickjs", %message),
    }
}

fn describe_exception(ctx: &Ctx<'_>) -> String {
    let thrown: Value = ctx.catch();
    let Some(object) = thrown.as_object() else {
        return match thrown.as_string().and_then(|s| s.to_string().ok()) {
            Some(text) => format!("uncaught {text}"),
            None => format!("uncaught {thrown:?}"),
        };
    };

    let message: String = object
        .get("message")
        .unwrap_or_else(|_| String::from("unknown error"));
    match object.get::<_, String>("stack") {
        Ok(stack) if !stack.is_empty() => format!("{message}\n{stack}"),
        _ => message,
    }
}

const INVOKE_SHIM: &str = r#"
(() => {
    const path = __CHANNEL__.split('.');
    if (path[0] === 'window' && typeof globalThis.window === 'undefined') {
        globalThis.window = globalThis;
    }

    let target = globalThis;
    for (const key of path.slice(0, -1)) {
        if (typeof target[key] !== 'object' || target[key] === null) {
            target[key] = {};
        }
        target = target[key];
    }

    const post = globalThis.__switchyard_invoke;
    target[path[path.length - 1]] = function invoke(payload) {
        post(String(payload));
    };
})();
"#;

const CONSOLE_SHIM: &str = r#"
(() => {
    const forward = globalThis.__switchyard_console;
    const format = (value) => {
        if (typeof value === 'string') return value;
        if (value instanceof Error) return value.stack || String(value);
        if (typeof value === 'object' && value !== null) {
            try {
                return JSON.stringify(value);
            } catch (_) {
                return Object.prototype.toString.call(value);
            }
        }
        return String(value);
    };
    const level = (name) => (...args) => {
        try {
            forward(name, args.map(format).join(' '));
        } catch (_) {}
    };

    globalThis.console = {
        log: level('info'),
        info: level('info'),
        debug: level('debug'),
        warn: level('warn'),
        error: level('error'),
    };
})();
"#;

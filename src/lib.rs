pub mod arena;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod js;
pub mod logging;
pub mod window;

pub use bridge::{BindError, Bindable, MethodTable, SyncFn};
pub use config::BridgeConfig;
pub use dispatch::{DispatchError, DispatchHandle, DispatchToken};
pub use js::{EvalError, QuickJsEngine, ScriptEngine};
pub use window::{InvokeSink, Window, WindowBuilder, WindowId};

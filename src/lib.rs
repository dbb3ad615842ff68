pub mod app;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod extractor;
pub mod host;
pub mod registry;
pub mod script;
pub mod time;
pub mod watch;

pub use app::{run, run_with_overrides, App};
pub use context::CompilationContext;
pub use error::{HostEntityError, ScriptError};
pub use host::{EcsHost, EntityHost};
pub use registry::{ScriptGroup, ScriptRegistry, SharedScript, TeardownPolicy};
pub use script::{DynamicScript, ScriptOptions, ScriptState};

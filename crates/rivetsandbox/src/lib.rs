//! Code execution sandbox backends
//!
//! Every backend implements [`rivetcore::CodeRunner`] and is injected into the
//! engine as a strategy, so an operator can swap or disable code execution
//! without touching any node configuration.
//!
//! - [`ScriptCodeRunner`]: embedded script interpreter; grants `fetch` and
//!   `rivet` only.
//! - [`HostCodeRunner`]: same interpreter with host access; also grants
//!   `require` and `process`.
//! - [`DisabledCodeRunner`]: refuses every call.

mod config;
mod disabled;
mod helpers;
mod host;
mod script;
mod script_runner;

pub use config::SandboxConfig;
pub use disabled::DisabledCodeRunner;
pub use host::HostCodeRunner;
pub use script_runner::ScriptCodeRunner;

use rivetcore::CodeRunner;
use std::sync::Arc;

/// Backend selector, as named in configuration and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    Script,
    Host,
    Disabled,
}

impl SandboxKind {
    pub fn build(self, config: SandboxConfig) -> Arc<dyn CodeRunner> {
        match self {
            SandboxKind::Script => Arc::new(ScriptCodeRunner::new(config)),
            SandboxKind::Host => Arc::new(HostCodeRunner::new(config)),
            SandboxKind::Disabled => Arc::new(DisabledCodeRunner),
        }
    }
}

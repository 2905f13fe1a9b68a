//! Contract between code-running nodes and the sandbox backend injected into the engine.

use crate::{SandboxError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Capabilities a snippet may be granted. Every flag defaults to denied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeRunnerOptions {
    /// Host module loading
    pub include_require: bool,
    /// Network fetch
    pub include_fetch: bool,
    /// The engine's helper API
    pub include_rivet: bool,
    /// Host process and environment access
    pub include_process: bool,
}

impl CodeRunnerOptions {
    pub fn none() -> Self {
        Self::default()
    }

    /// Granted capabilities, in a fixed order
    pub fn requested(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.include_require {
            caps.push(Capability::Require);
        }
        if self.include_fetch {
            caps.push(Capability::Fetch);
        }
        if self.include_rivet {
            caps.push(Capability::Rivet);
        }
        if self.include_process {
            caps.push(Capability::Process);
        }
        caps
    }

    /// Read the flags from a node configuration; absent or non-boolean means denied
    pub fn from_config(config: &HashMap<String, Value>) -> Self {
        let flag = |key: &str| config.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            include_require: flag("include_require"),
            include_fetch: flag("include_fetch"),
            include_rivet: flag("include_rivet"),
            include_process: flag("include_process"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Require,
    Fetch,
    Rivet,
    Process,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Require => "require",
            Capability::Fetch => "fetch",
            Capability::Rivet => "rivet",
            Capability::Process => "process",
        };
        f.write_str(name)
    }
}

/// Runs a user-authored snippet with exactly the granted capabilities.
///
/// Implementations must evaluate every call in a fresh context: nothing from a
/// previous or concurrent call may be visible to the snippet.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Backend name used in diagnostics
    fn name(&self) -> &str;

    async fn run_code(
        &self,
        code: &str,
        inputs: HashMap<String, Value>,
        options: CodeRunnerOptions,
    ) -> Result<HashMap<String, Value>, SandboxError>;
}

use crate::config::SandboxConfig;
use crate::script::{self, Grants};
use async_trait::async_trait;
use rivetcore::{Capability, CodeRunner, CodeRunnerOptions, SandboxError, Value};
use std::collections::HashMap;

/// Embedded interpreter with no host access.
///
/// `fetch` and the `rivet` helpers are bound when requested. `require` and
/// `process` cannot be provided and fail with
/// [`SandboxError::CapabilityUnavailable`] before any code runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptCodeRunner {
    config: SandboxConfig,
}

impl ScriptCodeRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CodeRunner for ScriptCodeRunner {
    fn name(&self) -> &str {
        "script"
    }

    async fn run_code(
        &self,
        code: &str,
        inputs: HashMap<String, Value>,
        options: CodeRunnerOptions,
    ) -> Result<HashMap<String, Value>, SandboxError> {
        if let Some(capability) = options
            .requested()
            .into_iter()
            .find(|c| matches!(c, Capability::Require | Capability::Process))
        {
            tracing::warn!("Script backend cannot grant {}", capability);
            return Err(SandboxError::CapabilityUnavailable {
                capability,
                backend: self.name().to_string(),
            });
        }

        let grants = Grants {
            fetch: options.include_fetch,
            rivet: options.include_rivet,
            ..Grants::default()
        };
        script::run_blocking(self.config.clone(), code.to_string(), inputs, grants).await
    }
}

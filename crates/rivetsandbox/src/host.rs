use crate::config::SandboxConfig;
use crate::script::{self, Grants};
use async_trait::async_trait;
use rivetcore::{Capability, CodeRunner, CodeRunnerOptions, SandboxError, Value};
use std::collections::HashMap;

/// Interpreter with host access, for trusted deployments.
///
/// `process` binds `env(name)` and `cwd()`. `require` enables `import` of
/// script modules under [`SandboxConfig::module_dir`]; without a module
/// directory it is unavailable.
#[derive(Debug, Clone, Default)]
pub struct HostCodeRunner {
    config: SandboxConfig,
}

impl HostCodeRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CodeRunner for HostCodeRunner {
    fn name(&self) -> &str {
        "host"
    }

    async fn run_code(
        &self,
        code: &str,
        inputs: HashMap<String, Value>,
        options: CodeRunnerOptions,
    ) -> Result<HashMap<String, Value>, SandboxError> {
        let modules = match (options.include_require, &self.config.module_dir) {
            (false, _) => None,
            (true, Some(dir)) => Some(dir.clone()),
            (true, None) => {
                return Err(SandboxError::CapabilityUnavailable {
                    capability: Capability::Require,
                    backend: self.name().to_string(),
                })
            }
        };

        let grants = Grants {
            fetch: options.include_fetch,
            rivet: options.include_rivet,
            process: options.include_process,
            modules,
        };
        script::run_blocking(self.config.clone(), code.to_string(), inputs, grants).await
    }
}

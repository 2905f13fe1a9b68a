use async_trait::async_trait;
use rivetcore::{CodeRunner, CodeRunnerOptions, SandboxError, Value};
use std::collections::HashMap;

/// Backend for deployments that forbid arbitrary code execution
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCodeRunner;

#[async_trait]
impl CodeRunner for DisabledCodeRunner {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn run_code(
        &self,
        _code: &str,
        _inputs: HashMap<String, Value>,
        _options: CodeRunnerOptions,
    ) -> Result<HashMap<String, Value>, SandboxError> {
        tracing::warn!("Refusing to run code: dynamic execution is disabled");
        Err(SandboxError::DynamicExecutionDisabled)
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resource limits applied to every snippet evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// Wall-clock limit per evaluation
    pub timeout_ms: u64,
    /// Root for `import` when the host runner grants `require`
    pub module_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            timeout_ms: 5_000,
            module_dir: None,
        }
    }
}

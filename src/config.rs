use serde::{Deserialize, Serialize};

/// Runtime capacities. Every fixed-size arena in the VM takes its bound from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Maximum number of value-stack slots.
    pub stack_capacity: usize,
    /// Maximum number of live heap objects.
    pub heap_capacity: usize,
    /// Pool length at which an allocation first triggers a collection.
    pub gc_threshold: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { stack_capacity: 2048, heap_capacity: 4096, gc_threshold: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerLimits {
    pub max_code_bytes: usize,
    pub max_constant_bytes: usize,
    /// Live compile-time variable records across all open scopes.
    pub max_variables: usize,
}

impl Default for CompilerLimits {
    fn default() -> Self {
        CompilerLimits { max_code_bytes: 64 * 1024, max_constant_bytes: 64 * 1024, max_variables: 1024 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub compiler: CompilerLimits,
    pub vm: VmConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &std::path::Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Config::from_json(&text)
    }
}

use crate::normalize::ResultKind;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::GatewayError;

/// Default configuration file path when no argument is given
pub const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

/// Static configuration for one backend process
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into, strip_option))]
pub struct BackendSpec {
    /// Logical backend name used by tool bindings
    pub name: String,
    pub command: String,
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    /// Environment applied on top of the inherited environment
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    /// Required backends abort gateway boot when they fail to start
    #[serde(default = "default_required")]
    #[builder(default = "true")]
    pub required: bool,
}

impl BackendSpec {
    pub fn builder() -> BackendSpecBuilder {
        BackendSpecBuilder::default()
    }
}

impl BackendSpecBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Lifecycle timeouts, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on spawn plus protocol handshake per backend
    #[serde(default = "default_startup_ms")]
    pub startup_ms: u64,

    /// Bound on one in-flight tool call
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,

    /// Wait after SIGTERM before escalating to SIGKILL
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_ms: default_startup_ms(),
            call_ms: default_call_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn startup(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.startup_ms)
    }

    pub fn call(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_ms)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.startup_ms == 0 {
            return Err(anyhow::anyhow!("startup_ms must be greater than zero"));
        }

        if self.call_ms == 0 {
            return Err(anyhow::anyhow!("call_ms must be greater than zero"));
        }

        if self.startup_ms > 300_000 {
            return Err(anyhow::anyhow!("startup_ms should not exceed 300 seconds"));
        }

        if self.call_ms > 600_000 {
            return Err(anyhow::anyhow!("call_ms should not exceed 600 seconds"));
        }

        Ok(())
    }
}

/// Identity the gateway advertises on its upstream channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(default = "default_gateway_name")]
    pub name: String,
    #[serde(default = "default_gateway_version")]
    pub version: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for GatewayInfo {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            version: default_gateway_version(),
            instructions: None,
        }
    }
}

/// One upstream-visible tool: either a backend binding or an alias
/// of another gateway tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    /// Statically expected result shape for normalization
    #[serde(default)]
    pub result: Option<ResultKind>,
    /// Argument defaults merged in when the caller omits a key
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ToolSpec {
    pub fn is_alias(&self) -> bool {
        self.alias.is_some()
    }
}

/// Whole-gateway configuration loaded from a TOML file
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewayInfo,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendSpec>,
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolSpec>,
}

impl GatewayConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self, GatewayError> {
        let config: GatewayConfig = toml::from_str(raw)
            .map_err(|e| GatewayError::config(format!("invalid TOML: {e}")))?;
        config
            .validate()
            .map_err(|e| GatewayError::config(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        self.timeouts.validate()?;

        if self.backends.is_empty() {
            return Err(anyhow::anyhow!("no backends configured"));
        }

        let mut backend_names = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(anyhow::anyhow!("backend with empty name"));
            }
            if backend.command.is_empty() {
                return Err(anyhow::anyhow!(
                    "backend '{}' has an empty command",
                    backend.name
                ));
            }
            if !backend_names.insert(backend.name.as_str()) {
                return Err(anyhow::anyhow!("duplicate backend name '{}'", backend.name));
            }
        }

        let mut tool_names = std::collections::HashSet::new();
        for tool in &self.tools {
            if tool.name.is_empty() {
                return Err(anyhow::anyhow!("tool with empty name"));
            }
            if !tool_names.insert(tool.name.as_str()) {
                return Err(anyhow::anyhow!("duplicate tool name '{}'", tool.name));
            }

            match (&tool.alias, &tool.backend) {
                (Some(alias), None) => {
                    if alias == &tool.name {
                        return Err(anyhow::anyhow!("tool '{}' aliases itself", tool.name));
                    }
                    if tool.tool.is_some() || tool.result.is_some() {
                        return Err(anyhow::anyhow!(
                            "alias tool '{}' must not carry a backend binding",
                            tool.name
                        ));
                    }
                }
                (None, Some(backend)) => {
                    if !backend_names.contains(backend.as_str()) {
                        return Err(anyhow::anyhow!(
                            "tool '{}' references unknown backend '{}'",
                            tool.name,
                            backend
                        ));
                    }
                    if tool.tool.is_none() {
                        return Err(anyhow::anyhow!(
                            "tool '{}' is missing the backend tool name",
                            tool.name
                        ));
                    }
                    if tool.result.is_none() {
                        return Err(anyhow::anyhow!(
                            "tool '{}' is missing the expected result kind",
                            tool.name
                        ));
                    }
                }
                (Some(_), Some(_)) => {
                    return Err(anyhow::anyhow!(
                        "tool '{}' declares both a backend binding and an alias",
                        tool.name
                    ));
                }
                (None, None) => {
                    return Err(anyhow::anyhow!(
                        "tool '{}' declares neither a backend binding nor an alias",
                        tool.name
                    ));
                }
            }
        }

        // Alias targets must exist; chain/cycle checks happen when the
        // binding table is compiled.
        for tool in &self.tools {
            if let Some(alias) = &tool.alias {
                if !tool_names.contains(alias.as_str()) {
                    return Err(anyhow::anyhow!(
                        "tool '{}' aliases unknown tool '{}'",
                        tool.name,
                        alias
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn backend(&self, name: &str) -> Option<&BackendSpec> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }
}

// Default value functions for serde
fn default_required() -> bool {
    true
}
fn default_startup_ms() -> u64 {
    10_000
}
fn default_call_ms() -> u64 {
    30_000
}
fn default_shutdown_grace_ms() -> u64 {
    2_000
}
fn default_gateway_name() -> String {
    "mcp-gateway".to_string()
}
fn default_gateway_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

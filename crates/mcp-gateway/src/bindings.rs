use mcp_gateway_core::{GatewayConfig, GatewayError, ResultKind};
use rmcp::model::JsonObject;
use tracing::debug;

/// Upper bound on alias chain length during resolution
pub const MAX_ALIAS_DEPTH: usize = 8;

/// One compiled upstream tool entry
#[derive(Debug, Clone)]
pub enum ToolBinding {
    Backend {
        backend: String,
        tool: String,
        result: ResultKind,
        defaults: JsonObject,
        description: Option<String>,
    },
    Alias {
        target: String,
        description: Option<String>,
    },
}

/// Call target after alias chains have been resolved
#[derive(Debug, Clone, Copy)]
pub struct ResolvedBinding<'a> {
    pub backend: &'a str,
    pub tool: &'a str,
    pub result: ResultKind,
    pub defaults: &'a JsonObject,
}

impl ResolvedBinding<'_> {
    /// Merge declared defaults into the caller's arguments. Defaults
    /// only fill absent keys; caller-supplied values always win.
    pub fn merge_defaults(&self, arguments: Option<JsonObject>) -> Option<JsonObject> {
        if self.defaults.is_empty() {
            return arguments;
        }
        let mut merged = arguments.unwrap_or_default();
        for (key, value) in self.defaults {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Some(merged)
    }
}

/// Read-only table of upstream-visible tools, compiled once at startup
/// from validated configuration. Entries keep their configuration order.
pub struct BindingTable {
    tools: Vec<(String, ToolBinding)>,
}

impl BindingTable {
    /// Compile the tool table and prove every name resolves to a backend
    /// binding within the depth limit, so alias cycles and dangling
    /// chains are boot failures rather than call-time surprises.
    pub fn compile(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut tools = Vec::with_capacity(config.tools.len());
        for spec in &config.tools {
            let binding = if let Some(target) = &spec.alias {
                ToolBinding::Alias {
                    target: target.clone(),
                    description: spec.description.clone(),
                }
            } else {
                match (&spec.backend, &spec.tool, spec.result) {
                    (Some(backend), Some(tool), Some(result)) => ToolBinding::Backend {
                        backend: backend.clone(),
                        tool: tool.clone(),
                        result,
                        defaults: spec.defaults.clone().into_iter().collect(),
                        description: spec.description.clone(),
                    },
                    _ => {
                        return Err(GatewayError::config(format!(
                            "tool '{}' has an incomplete backend binding",
                            spec.name
                        )));
                    }
                }
            };
            tools.push((spec.name.clone(), binding));
        }

        let table = Self { tools };
        for (name, _) in &table.tools {
            table.resolve(name)?;
        }
        debug!(tools = table.tools.len(), "Binding table compiled");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ToolBinding)> {
        self.tools
            .iter()
            .map(|(name, binding)| (name.as_str(), binding))
    }

    fn binding(&self, name: &str) -> Option<&ToolBinding> {
        self.tools
            .iter()
            .find(|(tool_name, _)| tool_name == name)
            .map(|(_, binding)| binding)
    }

    /// Resolve a gateway tool name to its backend binding, following
    /// alias chains with cycle detection and a depth bound.
    pub fn resolve(&self, name: &str) -> Result<ResolvedBinding<'_>, GatewayError> {
        let mut seen: Vec<&str> = Vec::new();
        let mut current = name;
        loop {
            if seen.len() > MAX_ALIAS_DEPTH {
                return Err(GatewayError::config(format!(
                    "alias chain starting at '{name}' exceeds depth {MAX_ALIAS_DEPTH}"
                )));
            }
            if seen.contains(&current) {
                return Err(GatewayError::config(format!(
                    "alias cycle detected: {} -> {current}",
                    seen.join(" -> ")
                )));
            }
            seen.push(current);

            match self.binding(current) {
                None => {
                    return Err(GatewayError::invocation(format!("unknown tool '{current}'")));
                }
                Some(ToolBinding::Alias { target, .. }) => current = target,
                Some(ToolBinding::Backend {
                    backend,
                    tool,
                    result,
                    defaults,
                    ..
                }) => {
                    return Ok(ResolvedBinding {
                        backend,
                        tool,
                        result: *result,
                        defaults,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_gateway_core::{BackendSpec, ToolSpec};
    use serde_json::json;

    fn tool(name: &str, backend: &str, backend_tool: &str, result: ResultKind) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: None,
            backend: Some(backend.to_string()),
            tool: Some(backend_tool.to_string()),
            result: Some(result),
            defaults: Default::default(),
            alias: None,
        }
    }

    fn alias(name: &str, target: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: None,
            backend: None,
            tool: None,
            result: None,
            defaults: Default::default(),
            alias: Some(target.to_string()),
        }
    }

    fn config(tools: Vec<ToolSpec>) -> GatewayConfig {
        GatewayConfig {
            backends: vec![
                BackendSpec::builder()
                    .name("sales")
                    .command("sales-server")
                    .build()
                    .unwrap(),
            ],
            tools,
            ..Default::default()
        }
    }

    #[test]
    fn test_direct_binding_resolves() {
        let table = BindingTable::compile(&config(vec![tool(
            "sales_total_last_month",
            "sales",
            "total_last_month",
            ResultKind::Number,
        )]))
        .unwrap();

        let resolved = table.resolve("sales_total_last_month").unwrap();
        assert_eq!(resolved.backend, "sales");
        assert_eq!(resolved.tool, "total_last_month");
        assert_eq!(resolved.result, ResultKind::Number);
    }

    #[test]
    fn test_alias_chain_resolves_to_target_binding() {
        let table = BindingTable::compile(&config(vec![
            tool("sales_by_day", "sales", "by_day", ResultKind::List),
            alias("sales_last_n_days", "sales_by_day"),
            alias("recent_sales", "sales_last_n_days"),
        ]))
        .unwrap();

        let direct = table.resolve("sales_by_day").unwrap();
        let hop_one = table.resolve("sales_last_n_days").unwrap();
        let hop_two = table.resolve("recent_sales").unwrap();
        assert_eq!(direct.tool, hop_one.tool);
        assert_eq!(direct.tool, hop_two.tool);
        assert_eq!(direct.backend, hop_two.backend);
    }

    #[test]
    fn test_alias_cycle_fails_compile() {
        let err = BindingTable::compile(&config(vec![
            alias("a", "b"),
            alias("b", "a"),
        ]))
        .unwrap_err();
        assert!(format!("{err}").contains("alias cycle detected"));
    }

    #[test]
    fn test_unknown_tool_is_caller_error() {
        let table = BindingTable::compile(&config(vec![tool(
            "t",
            "sales",
            "bt",
            ResultKind::Number,
        )]))
        .unwrap();
        let err = table.resolve("nope").unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_defaults_fill_absent_keys_only() {
        let mut spec = tool("sales_by_day", "sales", "by_day", ResultKind::List);
        spec.defaults.insert("n".to_string(), json!(30));
        let table = BindingTable::compile(&config(vec![spec])).unwrap();
        let resolved = table.resolve("sales_by_day").unwrap();

        // absent -> default applied
        let merged = resolved.merge_defaults(None).unwrap();
        assert_eq!(merged.get("n").unwrap(), &json!(30));

        // present -> caller wins, extra keys preserved
        let mut args = rmcp::model::JsonObject::new();
        args.insert("n".to_string(), json!(5));
        args.insert("verbose".to_string(), json!(true));
        let merged = resolved.merge_defaults(Some(args)).unwrap();
        assert_eq!(merged.get("n").unwrap(), &json!(5));
        assert_eq!(merged.get("verbose").unwrap(), &json!(true));
    }

    #[test]
    fn test_no_defaults_passes_arguments_through() {
        let table = BindingTable::compile(&config(vec![tool(
            "t",
            "sales",
            "bt",
            ResultKind::Number,
        )]))
        .unwrap();
        let resolved = table.resolve("t").unwrap();
        assert!(resolved.merge_defaults(None).is_none());
    }
}

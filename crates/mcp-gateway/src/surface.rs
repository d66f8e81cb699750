use crate::bindings::{BindingTable, ToolBinding};
use mcp_gateway_core::{BackendRegistry, GatewayError, GatewayInfo, NormalizedResult};
use rmcp::ErrorData as McpError;
use rmcp::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

/// MCP server surface exposed to the upstream client. Every tool call
/// is resolved through the binding table, forwarded to the owning
/// backend, and republished in normalized form.
pub struct GatewayService {
    registry: Arc<BackendRegistry>,
    bindings: BindingTable,
    info: GatewayInfo,
}

impl GatewayService {
    pub fn new(registry: Arc<BackendRegistry>, bindings: BindingTable, info: GatewayInfo) -> Self {
        Self {
            registry,
            bindings,
            info,
        }
    }

    /// Forward one upstream call through its resolved binding.
    ///
    /// Unknown names and alias problems are reported as invalid params.
    /// A backend that answered with its own error envelope is mirrored
    /// as an error result rather than a protocol failure, so the caller
    /// can distinguish "tool failed" from "gateway broke".
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let resolved = self
            .bindings
            .resolve(name)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        let arguments = resolved.merge_defaults(arguments);
        debug!(
            tool = %name,
            backend = %resolved.backend,
            backend_tool = %resolved.tool,
            "Dispatching tool call"
        );

        let backend = self
            .registry
            .get(resolved.backend)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        match backend.invoke(resolved.tool, arguments, resolved.result).await {
            Ok(result) => Ok(render_result(&result)),
            Err(GatewayError::Backend(message)) => {
                warn!(tool = %name, backend = %resolved.backend, error = %message, "Backend reported tool failure");
                Ok(CallToolResult::error(vec![Content::text(message)]))
            }
            Err(e) => {
                warn!(tool = %name, backend = %resolved.backend, error = %e, "Tool call failed");
                Err(McpError::internal_error(e.to_string(), None))
            }
        }
    }

    /// Upstream-visible tool list, aliases included. Alias entries
    /// advertise the schema of their resolved target.
    pub fn tool_catalog(&self) -> Result<Vec<Tool>, GatewayError> {
        let mut tools = Vec::with_capacity(self.bindings.len());
        for (name, binding) in self.bindings.entries() {
            let tool = match binding {
                ToolBinding::Backend {
                    backend,
                    tool,
                    defaults,
                    description,
                    ..
                } => Tool::new(
                    name.to_string(),
                    description
                        .clone()
                        .unwrap_or_else(|| format!("Invokes '{tool}' on backend '{backend}'")),
                    input_schema(defaults),
                ),
                ToolBinding::Alias {
                    target,
                    description,
                } => {
                    let resolved = self.bindings.resolve(name)?;
                    Tool::new(
                        name.to_string(),
                        description
                            .clone()
                            .unwrap_or_else(|| format!("Alias of '{target}'")),
                        input_schema(resolved.defaults),
                    )
                }
            };
            tools.push(tool);
        }
        Ok(tools)
    }
}

impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.info.name.clone(),
                version: self.info.version.clone(),
            },
            instructions: self.info.instructions.clone(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self
            .tool_catalog()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ListToolsResult {
            next_cursor: None,
            tools,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(&request.name, request.arguments).await
    }
}

fn render_result(result: &NormalizedResult) -> CallToolResult {
    let mut reply = CallToolResult::success(vec![Content::text(result.to_text())]);
    reply.structured_content = Some(result.to_structured_content());
    reply
}

fn input_schema(defaults: &JsonObject) -> Arc<JsonObject> {
    let mut properties = JsonObject::new();
    for (key, value) in defaults {
        properties.insert(
            key.clone(),
            json!({ "type": schema_type(value), "default": value }),
        );
    }
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("additionalProperties".to_string(), json!(true));
    Arc::new(schema)
}

fn schema_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        _ => "object",
    }
}

//! Small MCP backend used by the integration tests and the sample
//! configuration. Its tools cover the reply shapes the gateway has to
//! normalize: structured envelopes, bare text payloads, empty replies,
//! error envelopes, slow answers and a hard crash.

use rmcp::ErrorData as McpError;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct DemoBackend {
    orders: Arc<Mutex<HashMap<u32, JsonObject>>>,
    next_order: Arc<AtomicU32>,
}

impl DemoBackend {
    fn new() -> Self {
        Self {
            orders: Arc::new(Mutex::new(HashMap::new())),
            next_order: Arc::new(AtomicU32::new(1)),
        }
    }
}

impl ServerHandler for DemoBackend {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "demo-backend".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = vec![
            tool("total_last_month", "Total sales for last month"),
            tool("sales_by_day", "Daily sales rows, requires 'n'"),
            tool("create_order", "Create an order"),
            tool("order_status", "Look up an order by id"),
            tool("text_total", "Total as plain text, no structured content"),
            tool("text_status", "Status object as plain text"),
            tool("empty_reply", "Succeeds without any content"),
            tool("always_fail", "Always answers with an error envelope"),
            tool("slow", "Sleeps for 'ms' milliseconds before answering"),
            tool("crash", "Exits the process without replying"),
        ];
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
        let args = request.arguments.unwrap_or_default();
        match request.name.as_ref() {
            "total_last_month" => Ok(structured_reply(json!({ "result": 42250.75 }))),
            "sales_by_day" => {
                // No server side default here. The gateway is the one
                // expected to fill in 'n'.
                let Some(n) = args.get("n").and_then(Value::as_u64) else {
                    return Ok(CallToolResult::error(vec![Content::text(
                        "missing required argument 'n'",
                    )]));
                };
                let rows: Vec<Value> = (1..=n)
                    .map(|day| {
                        json!({
                            "date": format!("2026-07-{day:02}"),
                            "total": 250.0 * day as f64,
                        })
                    })
                    .collect();
                Ok(structured_reply(json!({ "result": rows })))
            }
            "create_order" => {
                let customer = args
                    .get("customer")
                    .and_then(Value::as_str)
                    .unwrap_or("anonymous")
                    .to_string();
                let amount = args.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
                let id = self.next_order.fetch_add(1, Ordering::SeqCst);
                let order = json!({
                    "id": id,
                    "customer": customer,
                    "amount": amount,
                    "status": "pending",
                });
                if let Value::Object(map) = &order {
                    self.orders.lock().await.insert(id, map.clone());
                }
                Ok(structured_reply(json!({ "result": order })))
            }
            "order_status" => {
                let id = args.get("id").and_then(Value::as_u64).unwrap_or(0) as u32;
                let found = self.orders.lock().await.get(&id).cloned();
                let status = match found {
                    Some(order) => Value::Object(order),
                    None => json!({ "id": id, "status": "unknown" }),
                };
                Ok(structured_reply(json!({ "result": status })))
            }
            "text_total" => Ok(CallToolResult::success(vec![Content::text("512.25")])),
            "text_status" => Ok(CallToolResult::success(vec![Content::text(
                r#"{"service":"demo","healthy":true}"#,
            )])),
            "empty_reply" => Ok(CallToolResult::success(vec![])),
            "always_fail" => Ok(CallToolResult::error(vec![Content::text(
                "synthetic failure",
            )])),
            "slow" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(1000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(structured_reply(json!({ "result": ms })))
            }
            "crash" => std::process::exit(3),
            other => Err(McpError::invalid_params(
                format!("unknown tool '{other}'"),
                None,
            )),
        }
    }
}

fn structured_reply(value: Value) -> CallToolResult {
    let mut reply = CallToolResult::success(vec![Content::text(value.to_string())]);
    reply.structured_content = Some(value);
    reply
}

fn tool(name: &'static str, description: &'static str) -> Tool {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("additionalProperties".to_string(), json!(true));
    Tool::new(name, description, Arc::new(schema))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let service = DemoBackend::new().serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;
    info!("Demo backend serving on stdio");

    service.waiting().await?;
    Ok(())
}

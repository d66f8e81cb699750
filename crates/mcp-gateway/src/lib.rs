mod bindings;
mod surface;

pub use bindings::{BindingTable, MAX_ALIAS_DEPTH, ResolvedBinding, ToolBinding};
pub use surface::GatewayService;

// Re-export core functionality
pub use mcp_gateway_core::*;

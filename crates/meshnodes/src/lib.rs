//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod time;
mod transform;

pub use debug::DebugNode;
pub use time::{DelayNode, TickerNode};
pub use transform::{JsonParseNode, JsonStringifyNode};

use meshcore::PluginInfo;
use meshruntime::NodeRegistry;
use std::sync::Arc;

/// Plugin name the standard library registers under
pub const PLUGIN_NAME: &str = "flowmesh-std";

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(TickerNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
}

/// A registry holding only the standard nodes
pub fn standard_registry() -> NodeRegistry {
    let plugin = PluginInfo::new(PLUGIN_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_description("Built-in flowmesh nodes");
    let mut registry = NodeRegistry::new(plugin);
    register_all(&mut registry);
    registry
}

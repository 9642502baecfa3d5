// crates/meshruntime/tests/registry_test.rs

use async_trait::async_trait;
use meshcore::{
    Node, NodeContext, NodeError, NodeMetadata, NodeOutput, PluginError, PluginInfo,
    PortDefinition,
};
use meshruntime::NodeRegistry;
use std::sync::Arc;

struct StaticNode {
    name: &'static str,
    metadata: NodeMetadata,
}

#[async_trait]
impl Node for StaticNode {
    fn node_type(&self) -> &str {
        self.name
    }

    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new())
    }
}

fn port(name: &str) -> PortDefinition {
    PortDefinition::new(name, "", "any")
}

fn node(name: &'static str, inputs: &[&str], outputs: &[&str], params: &[&str]) -> Arc<dyn Node> {
    Arc::new(StaticNode {
        name,
        metadata: NodeMetadata {
            description: String::new(),
            category: "test".to_string(),
            is_begin: false,
            inputs: inputs.iter().map(|n| port(n)).collect(),
            outputs: outputs.iter().map(|n| port(n)).collect(),
            params: params.iter().map(|n| port(n)).collect(),
        },
    })
}

#[test]
fn test_valid_plugin_passes() {
    let mut registry = NodeRegistry::new(PluginInfo::new("math").with_version("1.0.0"));
    registry.register(node("math.add", &["a", "b"], &["sum"], &[]));
    registry.register(node("math.scale", &["x"], &["y"], &["factor"]));

    assert!(registry.validate().is_ok());
    assert_eq!(registry.list_node_types(), vec!["math.add", "math.scale"]);
    assert!(registry.lookup("math.add").is_some());
    assert!(registry.lookup("math.sub").is_none());
}

#[test]
fn test_empty_plugin_name_rejected() {
    let mut registry = NodeRegistry::new(PluginInfo::new("  "));
    registry.register(node("a", &[], &["out"], &[]));

    assert!(matches!(
        registry.validate(),
        Err(PluginError::InvalidPlugin(_))
    ));
}

#[test]
fn test_plugin_without_nodes_rejected() {
    let registry = NodeRegistry::new(PluginInfo::new("empty"));
    assert!(matches!(
        registry.validate(),
        Err(PluginError::InvalidPlugin(_))
    ));
}

#[test]
fn test_input_and_param_names_must_not_collide() {
    let mut registry = NodeRegistry::new(PluginInfo::new("p"));
    registry.register(node("clash", &["rate"], &[], &["rate"]));

    match registry.validate() {
        Err(PluginError::InvalidNode { node, reason }) => {
            assert_eq!(node, "clash");
            assert!(reason.contains("rate"));
        }
        other => panic!("expected InvalidNode, got {:?}", other),
    }
}

#[test]
fn test_duplicate_output_rejected() {
    let mut registry = NodeRegistry::new(PluginInfo::new("p"));
    registry.register(node("twice", &[], &["out", "out"], &[]));

    assert!(matches!(
        registry.validate(),
        Err(PluginError::InvalidNode { .. })
    ));
}

#[test]
fn test_descriptor_lists_every_template() {
    let mut registry = NodeRegistry::new(PluginInfo::new("p").with_description("demo"));
    registry.register(node("b", &["in"], &[], &[]));
    registry.register(node("a", &[], &["out"], &["rate"]));

    let descriptor = registry.descriptor();
    assert_eq!(descriptor.plugin.name, "p");
    assert_eq!(descriptor.nodes.len(), 2);
    assert_eq!(descriptor.nodes[0].node_type, "a");
    assert_eq!(descriptor.node("a").unwrap().metadata.params[0].name, "rate");

    let json = serde_json::to_string(&descriptor).unwrap();
    let back: meshcore::PluginDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, descriptor);
}

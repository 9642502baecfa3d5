use meshcore::{Node, NodeDescriptor, NodeMetadata, PluginDescriptor, PluginError, PluginInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Catalog of node templates served by this process's plugin
pub struct NodeRegistry {
    plugin: PluginInfo,
    templates: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
    pub fn new(plugin: PluginInfo) -> Self {
        Self {
            plugin,
            templates: HashMap::new(),
        }
    }

    /// Register a node template
    pub fn register(&mut self, node: Arc<dyn Node>) {
        let node_type = node.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.templates.insert(node_type, node);
    }

    /// Look up a template by catalog name
    pub fn lookup(&self, node_type: &str) -> Option<Arc<dyn Node>> {
        self.templates.get(node_type).cloned()
    }

    pub fn plugin(&self) -> &PluginInfo {
        &self.plugin
    }

    /// Get all registered node types
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.templates.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.templates.get(node_type).map(|n| n.metadata())
    }

    /// Catalog summary sent to the leader during identity confirmation
    pub fn descriptor(&self) -> PluginDescriptor {
        let nodes = self
            .list_node_types()
            .into_iter()
            .filter_map(|node_type| {
                self.get_metadata(&node_type).map(|metadata| NodeDescriptor {
                    node_type,
                    metadata,
                })
            })
            .collect();

        PluginDescriptor {
            plugin: self.plugin.clone(),
            nodes,
        }
    }

    /// Check the plugin before it serves anything
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.plugin.name.trim().is_empty() {
            return Err(PluginError::InvalidPlugin(
                "plugin name cannot be empty".to_string(),
            ));
        }
        if self.templates.is_empty() {
            return Err(PluginError::InvalidPlugin(
                "plugin nodes cannot be empty".to_string(),
            ));
        }

        for (key, node) in &self.templates {
            if key.trim().is_empty() {
                return Err(PluginError::InvalidNode {
                    node: key.clone(),
                    reason: "node name cannot be empty".to_string(),
                });
            }
            validate_ports(key, &node.metadata())?;
        }

        Ok(())
    }
}

/// Inputs and parameters share one input map, so their names must be unique
/// together. Output names are checked on their own.
fn validate_ports(node: &str, metadata: &NodeMetadata) -> Result<(), PluginError> {
    let mut seen = HashSet::new();
    for port in metadata.inputs.iter().chain(&metadata.params) {
        if port.name.is_empty() {
            return Err(PluginError::InvalidNode {
                node: node.to_string(),
                reason: "port name cannot be empty".to_string(),
            });
        }
        if !seen.insert(port.name.as_str()) {
            return Err(PluginError::InvalidNode {
                node: node.to_string(),
                reason: format!("duplicate port '{}'", port.name),
            });
        }
    }

    let mut outputs = HashSet::new();
    for port in &metadata.outputs {
        if port.name.is_empty() || !outputs.insert(port.name.as_str()) {
            return Err(PluginError::InvalidNode {
                node: node.to_string(),
                reason: format!("invalid output port '{}'", port.name),
            });
        }
    }

    Ok(())
}

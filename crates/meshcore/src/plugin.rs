use crate::NodeMetadata;
use serde::{Deserialize, Serialize};

/// Identity of the plugin a process serves nodes from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// What a follower tells its leader about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub plugin: PluginInfo,
    pub nodes: Vec<NodeDescriptor>,
}

impl PluginDescriptor {
    pub fn node(&self, node_type: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.node_type == node_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_type: String,
    pub metadata: NodeMetadata,
}

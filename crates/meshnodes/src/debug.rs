use async_trait::async_trait;
use meshcore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput, PortDefinition};

/// Logs whatever arrives and reports it as a workflow result
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            is_begin: false,
            inputs: vec![PortDefinition::new("message", "Value to log", "any")],
            outputs: vec![],
            params: vec![],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx.require_input("message")?.clone();

        tracing::info!(
            workflow_id = ctx.workflow_id,
            node_id = ctx.node_id,
            epoch = ctx.epoch,
            "DEBUG: {}",
            message
        );
        ctx.events.data("message", message.clone());

        Ok(NodeOutput::new().with_result(message))
    }
}

use async_trait::async_trait;
use meshcore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput, PortDefinition, Value};

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            is_begin: false,
            inputs: vec![PortDefinition::new("json", "JSON text", "string")],
            outputs: vec![PortDefinition::new("parsed", "Parsed document", "json")],
            params: vec![],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input("json")?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.type_name().to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        ctx.outputs.send("parsed", Value::Json(parsed)).await?;
        Ok(NodeOutput::new())
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            is_begin: false,
            inputs: vec![PortDefinition::new("value", "Any value", "any")],
            outputs: vec![PortDefinition::new("json", "JSON text", "string")],
            params: vec![],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?;

        // Json values are emitted as the bare document, everything else in
        // its tagged form.
        let json_str = match value {
            Value::Json(doc) => serde_json::to_string(doc),
            other => serde_json::to_string(other),
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        ctx.outputs.send("json", json_str).await?;
        Ok(NodeOutput::new())
    }
}

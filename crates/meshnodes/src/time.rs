use async_trait::async_trait;
use meshcore::{Node, NodeContext, NodeError, NodeMetadata, NodeOutput, PortDefinition};
use tokio::time::{sleep, Duration};

/// Emits its epoch number on `tick` once per interval.
///
/// A begin node with no inputs, so it drives a graph on its own.
pub struct TickerNode;

#[async_trait]
impl Node for TickerNode {
    fn node_type(&self) -> &str {
        "time.ticker"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit a counter at a fixed interval".to_string(),
            category: "time".to_string(),
            is_begin: true,
            inputs: vec![],
            outputs: vec![PortDefinition::new("tick", "Epoch counter", "number")],
            params: vec![PortDefinition::new(
                "interval_ms",
                "Milliseconds between ticks",
                "number",
            )],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let interval = millis(&ctx, "interval_ms")?;

        pause(&ctx, interval).await?;
        ctx.outputs.send("tick", ctx.epoch).await?;

        Ok(NodeOutput::new())
    }
}

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            is_begin: false,
            inputs: vec![PortDefinition::new("value", "Value to pass on", "any")],
            outputs: vec![PortDefinition::new("value", "The same value, delayed", "any")],
            params: vec![PortDefinition::new(
                "delay_ms",
                "Milliseconds to hold each value",
                "number",
            )],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay = millis(&ctx, "delay_ms")?;
        let value = ctx.require_input("value")?.clone();

        ctx.events.info(format!("Delaying for {}ms", delay.as_millis()));
        pause(&ctx, delay).await?;

        ctx.outputs.send("value", value).await?;
        Ok(NodeOutput::new())
    }
}

fn millis(ctx: &NodeContext, name: &str) -> Result<Duration, NodeError> {
    let value = ctx.require_input(name)?;
    let ms = value.as_u64().ok_or_else(|| NodeError::InvalidInputType {
        field: name.to_string(),
        expected: "non-negative integer".to_string(),
        actual: value.type_name().to_string(),
    })?;
    Ok(Duration::from_millis(ms))
}

async fn pause(ctx: &NodeContext, duration: Duration) -> Result<(), NodeError> {
    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
    }
}

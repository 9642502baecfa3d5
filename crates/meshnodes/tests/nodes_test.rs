// crates/meshnodes/tests/nodes_test.rs

use meshcore::{EventBus, Node, NodeContext, NodeError, Outputs, PeerId, Value};
use meshnodes::{
    standard_registry, DebugNode, DelayNode, JsonParseNode, JsonStringifyNode, TickerNode,
};
use meshruntime::{Runtime, WorkflowSinks};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Context with the given inputs and one receiver per named output port
fn context(
    inputs: Vec<(&str, Value)>,
    outputs: &[&str],
) -> (NodeContext, HashMap<String, mpsc::Receiver<Value>>, CancellationToken) {
    let cancel = CancellationToken::new();
    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();
    for name in outputs {
        let (tx, rx) = mpsc::channel(1);
        senders.insert(name.to_string(), tx);
        receivers.insert(name.to_string(), rx);
    }

    let bus = EventBus::new(16);
    let ctx = NodeContext {
        workflow_id: 1,
        node_id: 1,
        epoch: 0,
        inputs: inputs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        outputs: Outputs::new(senders, cancel.clone()),
        events: bus.create_emitter(1, 1),
        cancellation: cancel.clone(),
    };
    (ctx, receivers, cancel)
}

#[test]
fn test_standard_registry_is_valid() {
    let registry = standard_registry();
    assert!(registry.validate().is_ok());
    assert_eq!(
        registry.list_node_types(),
        vec![
            "debug.log",
            "time.delay",
            "time.ticker",
            "transform.json_parse",
            "transform.json_stringify",
        ]
    );
    assert!(registry.get_metadata("time.ticker").unwrap().is_begin);
}

#[tokio::test]
async fn test_debug_reports_message_as_result() {
    let (ctx, _, _) = context(vec![("message", "hello".into())], &[]);
    let output = DebugNode.execute(ctx).await.unwrap();
    assert_eq!(output.result, Some(Value::from("hello")));
}

#[tokio::test]
async fn test_debug_requires_message() {
    let (ctx, _, _) = context(vec![], &[]);
    let err = DebugNode.execute(ctx).await.unwrap_err();
    assert_eq!(err, NodeError::MissingInput("message".to_string()));
}

#[tokio::test]
async fn test_json_parse_writes_document() {
    let (ctx, mut rx, _) = context(vec![("json", r#"{"a": 1}"#.into())], &["parsed"]);

    let output = JsonParseNode.execute(ctx).await.unwrap();
    assert!(output.result.is_none());

    let parsed = rx.get_mut("parsed").unwrap().recv().await.unwrap();
    assert_eq!(parsed, Value::Json(serde_json::json!({"a": 1})));
}

#[tokio::test]
async fn test_json_parse_rejects_non_string() {
    let (ctx, _, _) = context(vec![("json", Value::Number(3.0))], &["parsed"]);
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert_eq!(
        err,
        NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: "number".to_string(),
        }
    );
}

#[tokio::test]
async fn test_json_parse_reports_malformed_text() {
    let (ctx, _, _) = context(vec![("json", "{not json".into())], &["parsed"]);
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::ExecutionFailed(_)));
}

#[tokio::test]
async fn test_json_stringify_unwraps_documents() {
    let doc = Value::Json(serde_json::json!([1, 2]));
    let (ctx, mut rx, _) = context(vec![("value", doc)], &["json"]);

    JsonStringifyNode.execute(ctx).await.unwrap();
    let text = rx.get_mut("json").unwrap().recv().await.unwrap();
    assert_eq!(text, Value::from("[1,2]"));
}

#[tokio::test]
async fn test_delay_forwards_value() {
    let (ctx, mut rx, _) = context(
        vec![("value", "later".into()), ("delay_ms", Value::Number(10.0))],
        &["value"],
    );

    DelayNode.execute(ctx).await.unwrap();
    let value = rx.get_mut("value").unwrap().recv().await.unwrap();
    assert_eq!(value, Value::from("later"));
}

#[tokio::test]
async fn test_delay_rejects_negative_duration() {
    let (ctx, _, _) = context(
        vec![("value", Value::Null), ("delay_ms", Value::Number(-5.0))],
        &["value"],
    );
    let err = DelayNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { .. }));
}

#[tokio::test]
async fn test_delay_is_cancellable() {
    let (ctx, _, cancel) = context(
        vec![("value", Value::Null), ("delay_ms", Value::Number(60_000.0))],
        &["value"],
    );

    let task = tokio::spawn(async move { DelayNode.execute(ctx).await });
    cancel.cancel();

    let res = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(res.unwrap_err(), NodeError::Cancelled);
}

#[tokio::test]
async fn test_ticker_sends_epoch() {
    let (mut ctx, mut rx, _) = context(vec![("interval_ms", Value::Number(1.0))], &["tick"]);
    ctx.epoch = 4;

    TickerNode.execute(ctx).await.unwrap();
    let tick = rx.get_mut("tick").unwrap().recv().await.unwrap();
    assert_eq!(tick, Value::from(4u64));
}

#[tokio::test]
async fn test_ticker_drives_debug_through_runtime() {
    let runtime = Runtime::new(Arc::new(standard_registry()));
    let local = PeerId::random();

    runtime.init_workflow(1).await;
    runtime.create_node("time.ticker", 1, 1).await.unwrap();
    runtime.create_node("debug.log", 2, 1).await.unwrap();
    runtime
        .set_param(1, 1, "interval_ms", Value::Number(5.0))
        .await
        .unwrap();
    runtime
        .create_edge(1, local, 1, 1, "tick", 2, "message")
        .await
        .unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    for expected in 0u64..3 {
        let handoff = timeout(Duration::from_secs(2), rx.process.recv())
            .await
            .unwrap()
            .unwrap();
        let (envelope, receipt) = handoff.into_parts();
        runtime.deliver(envelope).await.unwrap();
        receipt.confirm();

        let result = timeout(Duration::from_secs(2), rx.results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Value::from(expected));
    }

    handle.cancel();
    timeout(Duration::from_secs(2), handle.wait()).await.unwrap();
}

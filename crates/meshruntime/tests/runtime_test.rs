// crates/meshruntime/tests/runtime_test.rs

use async_trait::async_trait;
use meshcore::{
    Node, NodeContext, NodeError, NodeMetadata, NodeOutput, PeerId, PluginInfo, PortDefinition,
    Value, WorkflowError,
};
use meshruntime::{NodeRegistry, Runtime, SinkReceivers, WorkflowSinks};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

type Action = Arc<
    dyn Fn(NodeContext) -> Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send>>
        + Send
        + Sync,
>;

/// Node template whose behavior is supplied by the test
struct TestNode {
    name: String,
    metadata: NodeMetadata,
    action: Action,
}

#[async_trait]
impl Node for TestNode {
    fn node_type(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.action)(ctx).await
    }
}

fn ports(names: &[&str]) -> Vec<PortDefinition> {
    names
        .iter()
        .map(|n| PortDefinition::new(*n, "", "any"))
        .collect()
}

fn test_node<F, Fut>(
    name: &str,
    is_begin: bool,
    inputs: &[&str],
    outputs: &[&str],
    params: &[&str],
    f: F,
) -> Arc<dyn Node>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
{
    Arc::new(TestNode {
        name: name.to_string(),
        metadata: NodeMetadata {
            description: format!("test node {}", name),
            category: "test".to_string(),
            is_begin,
            inputs: ports(inputs),
            outputs: ports(outputs),
            params: ports(params),
        },
        action: Arc::new(move |ctx| Box::pin(f(ctx))),
    })
}

fn runtime_with(nodes: Vec<Arc<dyn Node>>) -> Runtime {
    let mut registry = NodeRegistry::new(PluginInfo::new("test-plugin"));
    for node in nodes {
        registry.register(node);
    }
    Runtime::new(Arc::new(registry))
}

async fn next_result(rx: &mut SinkReceivers) -> Value {
    timeout(Duration::from_secs(2), rx.results.recv())
        .await
        .expect("timed out waiting for a result")
        .expect("result sink closed")
}

async fn assert_no_result(rx: &mut SinkReceivers) {
    let res = timeout(Duration::from_millis(150), rx.results.recv()).await;
    assert!(res.is_err(), "unexpected result: {:?}", res);
}

fn epoch_result() -> impl Fn(NodeContext) -> Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send>>
       + Send
       + Sync
       + 'static {
    |ctx: NodeContext| {
        Box::pin(async move { Ok(NodeOutput::new().with_result(ctx.epoch)) })
            as Pin<Box<dyn Future<Output = Result<NodeOutput, NodeError>> + Send>>
    }
}

#[tokio::test]
async fn test_begin_node_bootstraps_without_input() {
    let runtime = runtime_with(vec![test_node(
        "source",
        true,
        &[],
        &[],
        &[],
        epoch_result(),
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("source", 1, 1).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    assert_eq!(next_result(&mut rx).await, Value::from(0u64));
    assert_eq!(next_result(&mut rx).await, Value::from(1u64));

    handle.cancel();
}

#[tokio::test]
async fn test_begin_node_skips_inputs_only_in_first_epoch() {
    let runtime = runtime_with(vec![test_node(
        "gate",
        true,
        &["in"],
        &[],
        &[],
        |ctx: NodeContext| async move {
            let seen = ctx.inputs.get("in").cloned().unwrap_or(Value::Null);
            Ok(NodeOutput::new().with_result(Value::Array(vec![ctx.epoch.into(), seen])))
        },
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("gate", 7, 1).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    assert_eq!(
        next_result(&mut rx).await,
        Value::Array(vec![0u64.into(), Value::Null])
    );
    assert_no_result(&mut rx).await;

    runtime
        .deliver(meshcore::EdgeEnvelope {
            destination: PeerId::random(),
            workflow_id: 1,
            node_id: 7,
            port: "in".to_string(),
            value: "go".into(),
        })
        .await
        .unwrap();

    assert_eq!(
        next_result(&mut rx).await,
        Value::Array(vec![1u64.into(), "go".into()])
    );

    handle.cancel();
}

#[tokio::test]
async fn test_non_begin_node_waits_for_every_input() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let runtime = runtime_with(vec![test_node(
        "join",
        false,
        &["a", "b"],
        &[],
        &[],
        move |ctx: NodeContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = ctx.require_input("a")?.clone();
                let b = ctx.require_input("b")?.clone();
                Ok(NodeOutput::new().with_result(Value::Array(vec![a, b])))
            }
        },
    )]);

    runtime.init_workflow(3).await;
    runtime.create_node("join", 1, 3).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(3, sinks).await.unwrap();

    let envelope = |port: &str, value: &str| meshcore::EdgeEnvelope {
        destination: PeerId::random(),
        workflow_id: 3,
        node_id: 1,
        port: port.to_string(),
        value: value.into(),
    };

    runtime.deliver(envelope("a", "left")).await.unwrap();
    assert_no_result(&mut rx).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    runtime.deliver(envelope("b", "right")).await.unwrap();
    assert_eq!(
        next_result(&mut rx).await,
        Value::Array(vec!["left".into(), "right".into()])
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    handle.cancel();
}

#[tokio::test]
async fn test_edge_carries_value_from_producer_to_consumer() {
    let runtime = runtime_with(vec![
        test_node("a", true, &[], &["out"], &[], |ctx: NodeContext| async move {
            ctx.outputs.send("out", "x").await?;
            Ok(NodeOutput::new())
        }),
        test_node("b", false, &["in"], &[], &[], |ctx: NodeContext| async move {
            let value = ctx.require_input("in")?.clone();
            Ok(NodeOutput::new().with_result(value))
        }),
    ]);
    let local = PeerId::random();

    runtime.init_workflow(1).await;
    runtime.create_node("a", 1, 1).await.unwrap();
    runtime.create_node("b", 2, 1).await.unwrap();
    runtime
        .create_edge(10, local, 1, 1, "out", 2, "in")
        .await
        .unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    let handoff = timeout(Duration::from_secs(2), rx.process.recv())
        .await
        .expect("timed out waiting for edge output")
        .expect("process sink closed");
    let (envelope, receipt) = handoff.into_parts();

    assert_eq!(envelope.destination, local);
    assert_eq!(envelope.workflow_id, 1);
    assert_eq!(envelope.node_id, 2);
    assert_eq!(envelope.port, "in");
    assert_eq!(envelope.value, Value::from("x"));

    runtime.deliver(envelope).await.unwrap();
    receipt.confirm();
    assert_eq!(next_result(&mut rx).await, Value::from("x"));

    handle.cancel();
}

#[tokio::test]
async fn test_edge_waits_for_delivery_before_reading_next_value() {
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = produced.clone();
    let runtime = runtime_with(vec![test_node(
        "a",
        true,
        &[],
        &["out"],
        &[],
        move |ctx: NodeContext| {
            let counter = counter.clone();
            async move {
                ctx.outputs.send("out", ctx.epoch).await?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(NodeOutput::new())
            }
        },
    )]);
    let peer = PeerId::random();

    runtime.init_workflow(1).await;
    runtime.create_node("a", 1, 1).await.unwrap();
    runtime.create_edge(10, peer, 1, 1, "out", 2, "in").await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(1);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    let first = timeout(Duration::from_secs(2), rx.process.recv())
        .await
        .expect("timed out waiting for edge output")
        .expect("process sink closed");
    let (envelope, receipt) = first.into_parts();
    assert_eq!(envelope.value, Value::from(0u64));

    // Unconfirmed: the edge holds off, the producer parks on its port
    let held = timeout(Duration::from_millis(150), rx.process.recv()).await;
    assert!(held.is_err(), "edge ran ahead of its consumer: {:?}", held);
    assert!(produced.load(Ordering::SeqCst) <= 2);

    receipt.confirm();
    for epoch in 1..4u64 {
        let next = timeout(Duration::from_secs(2), rx.process.recv())
            .await
            .expect("timed out waiting for edge output")
            .expect("process sink closed");
        let (envelope, receipt) = next.into_parts();
        assert_eq!(envelope.value, Value::from(epoch));
        receipt.confirm();
    }

    handle.cancel();
}

#[tokio::test]
async fn test_param_is_seen_on_every_epoch() {
    let runtime = runtime_with(vec![test_node(
        "rated",
        false,
        &[],
        &[],
        &["rate"],
        |ctx: NodeContext| async move {
            let rate = ctx.require_input("rate")?.clone();
            Ok(NodeOutput::new().with_result(rate))
        },
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("rated", 5, 1).await.unwrap();
    runtime
        .set_param(1, 5, "rate", Value::from(10i64))
        .await
        .unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    for _ in 0..3 {
        assert_eq!(next_result(&mut rx).await, Value::from(10i64));
    }

    handle.cancel();
}

#[tokio::test]
async fn test_set_param_rejects_undeclared_port() {
    let runtime = runtime_with(vec![test_node(
        "rated",
        false,
        &[],
        &[],
        &["rate"],
        epoch_result(),
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("rated", 5, 1).await.unwrap();

    let err = runtime
        .set_param(1, 5, "speed", Value::from(1i64))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::PortNotFound {
            node: 5,
            port: "speed".to_string()
        }
    );
}

#[tokio::test]
async fn test_delete_node_with_edges_fails_until_edges_removed() {
    let runtime = runtime_with(vec![
        test_node("a", true, &[], &["out"], &[], epoch_result()),
        test_node("b", false, &["in"], &[], &[], epoch_result()),
    ]);
    let peer = PeerId::random();

    runtime.init_workflow(1).await;
    runtime.create_node("a", 1, 1).await.unwrap();
    runtime.create_node("b", 2, 1).await.unwrap();
    runtime.create_edge(3, peer, 1, 1, "out", 2, "in").await.unwrap();

    let err = runtime.delete_node(1, 1).await.unwrap_err();
    assert_eq!(err, WorkflowError::NodeHasEdges(1));
    assert_eq!(runtime.node_ids(1).await.unwrap(), vec![1, 2]);
    assert_eq!(runtime.edge_ids(1).await.unwrap(), vec![3]);
    assert_eq!(runtime.node_edges(1, 1).await.unwrap(), vec![3]);

    let removed = runtime.delete_edge(1, 3).await.unwrap();
    assert_eq!(removed.consumer().destination, peer);
    assert!(runtime.node_edges(1, 1).await.unwrap().is_empty());

    runtime.delete_node(1, 1).await.unwrap();
    assert_eq!(runtime.node_ids(1).await.unwrap(), vec![2]);
    assert!(runtime.edge_ids(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_edge_with_unknown_port_leaves_graph_unchanged() {
    let runtime = runtime_with(vec![test_node(
        "a",
        true,
        &[],
        &["out"],
        &[],
        epoch_result(),
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("a", 1, 1).await.unwrap();

    let err = runtime
        .create_edge(1, PeerId::random(), 1, 1, "missing", 2, "in")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::PortNotFound {
            node: 1,
            port: "missing".to_string()
        }
    );
    assert!(runtime.edge_ids(1).await.unwrap().is_empty());
    assert!(runtime.node_edges(1, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_errors() {
    let runtime = runtime_with(vec![test_node(
        "a",
        true,
        &[],
        &["out"],
        &[],
        epoch_result(),
    )]);

    assert_eq!(
        runtime.create_node("a", 1, 9).await.unwrap_err(),
        WorkflowError::NotFound(9)
    );

    runtime.init_workflow(9).await;
    assert_eq!(
        runtime.create_node("nope", 1, 9).await.unwrap_err(),
        WorkflowError::UnknownNodeType("nope".to_string())
    );
    assert_eq!(
        runtime.delete_node(9, 4).await.unwrap_err(),
        WorkflowError::NodeNotFound { workflow: 9, node: 4 }
    );
    assert_eq!(
        runtime.delete_edge(9, 4).await.unwrap_err(),
        WorkflowError::EdgeNotFound { workflow: 9, edge: 4 }
    );
    assert_eq!(
        runtime
            .create_edge(1, PeerId::random(), 9, 4, "out", 2, "in")
            .await
            .unwrap_err(),
        WorkflowError::NodeNotFound { workflow: 9, node: 4 }
    );

    let (sinks, _rx) = WorkflowSinks::channel(1);
    assert!(matches!(
        runtime.run_workflow(42, sinks).await,
        Err(WorkflowError::NotFound(42))
    ));
    assert_eq!(
        runtime.stop_workflow(42).await.unwrap_err(),
        WorkflowError::NotFound(42)
    );
}

#[tokio::test]
async fn test_cancel_terminates_every_task() {
    let runtime = runtime_with(vec![
        test_node("a", true, &[], &["out"], &["rate"], |ctx: NodeContext| async move {
            ctx.outputs.send("out", ctx.epoch).await?;
            Ok(NodeOutput::new())
        }),
        test_node("b", false, &["in"], &[], &["rate"], epoch_result()),
    ]);
    let peer = PeerId::random();

    runtime.init_workflow(1).await;
    runtime.create_node("a", 1, 1).await.unwrap();
    runtime.create_node("b", 2, 1).await.unwrap();
    runtime.set_param(1, 1, "rate", Value::from(1i64)).await.unwrap();
    runtime.set_param(1, 2, "rate", Value::from(2i64)).await.unwrap();
    runtime.create_edge(1, peer, 1, 1, "out", 2, "in").await.unwrap();

    // Nobody drains the process sink, so the edge listener ends up blocked
    // on it and node "a" blocked on its output port.
    let (sinks, mut rx) = WorkflowSinks::channel(1);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.active_tasks() >= 5);

    handle.cancel();
    timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("tasks did not terminate after cancellation");
    assert_eq!(handle.active_tasks(), 0);

    // With every task gone all sink senders are dropped
    while rx.process.recv().await.is_some() {}
}

#[tokio::test]
async fn test_action_failure_does_not_stop_the_loop() {
    let runtime = runtime_with(vec![test_node(
        "flaky",
        true,
        &[],
        &[],
        &[],
        |ctx: NodeContext| async move {
            if ctx.epoch == 0 {
                Err(NodeError::ExecutionFailed("first epoch fails".to_string()))
            } else {
                Ok(NodeOutput::new().with_result(ctx.epoch))
            }
        },
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("flaky", 1, 1).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(4);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    let failure = timeout(Duration::from_secs(2), rx.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.workflow_id, 1);
    assert_eq!(failure.node_id, 1);
    assert_eq!(failure.epoch, 0);
    assert_eq!(
        failure.error,
        NodeError::ExecutionFailed("first epoch fails".to_string())
    );

    assert_eq!(next_result(&mut rx).await, Value::from(1u64));

    handle.cancel();
}

#[tokio::test]
async fn test_run_twice_and_restart_after_stop() {
    let runtime = runtime_with(vec![test_node(
        "source",
        true,
        &[],
        &[],
        &[],
        epoch_result(),
    )]);

    runtime.init_workflow(1).await;
    runtime.create_node("source", 1, 1).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(1);
    let first = runtime.run_workflow(1, sinks.clone()).await.unwrap();
    assert!(runtime.is_running(1).await);
    assert!(matches!(
        runtime.run_workflow(1, sinks).await,
        Err(WorkflowError::AlreadyRunning(1))
    ));

    runtime.stop_workflow(1).await.unwrap();
    assert!(first.is_cancelled());
    assert!(!runtime.is_running(1).await);
    timeout(Duration::from_secs(2), first.wait()).await.unwrap();
    while rx.results.try_recv().is_ok() {}

    let (sinks, mut rx) = WorkflowSinks::channel(1);
    let second = runtime.run_workflow(1, sinks).await.unwrap();
    assert!(!second.is_cancelled());
    assert_eq!(next_result(&mut rx).await, Value::from(0u64));

    runtime.delete_workflow(1).await.unwrap();
    assert!(second.is_cancelled());
    assert!(!runtime.has_workflow(1).await);
}

#[tokio::test]
async fn test_init_workflow_replaces_existing_graph() {
    let runtime = runtime_with(vec![
        test_node("source", true, &[], &["out"], &[], epoch_result()),
        test_node("sink", false, &["in"], &[], &[], epoch_result()),
    ]);

    let peer = PeerId::random();

    assert!(runtime.init_workflow(1).await.is_empty());
    runtime.create_node("source", 1, 1).await.unwrap();
    runtime.create_node("sink", 2, 1).await.unwrap();
    runtime.create_edge(7, peer, 1, 1, "out", 2, "in").await.unwrap();

    let replaced = runtime.init_workflow(1).await;
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced[0].id(), 7);
    assert_eq!(replaced[0].consumer().destination, peer);

    assert!(runtime.node_ids(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleting_a_node_stops_only_that_node() {
    let runtime = runtime_with(vec![
        test_node("left", true, &[], &[], &[], |_ctx: NodeContext| async move {
            Ok(NodeOutput::new().with_result("left"))
        }),
        test_node("right", true, &[], &[], &[], |_ctx: NodeContext| async move {
            Ok(NodeOutput::new().with_result("right"))
        }),
    ]);

    runtime.init_workflow(1).await;
    runtime.create_node("left", 1, 1).await.unwrap();
    runtime.create_node("right", 2, 1).await.unwrap();

    let (sinks, mut rx) = WorkflowSinks::channel(1);
    let handle = runtime.run_workflow(1, sinks).await.unwrap();

    runtime.delete_node(1, 1).await.unwrap();
    assert!(!handle.is_cancelled());

    // Drain anything "left" produced before it was stopped
    tokio::time::sleep(Duration::from_millis(50)).await;
    while rx.results.try_recv().is_ok() {}

    for _ in 0..5 {
        assert_eq!(next_result(&mut rx).await, Value::from("right"));
    }

    handle.cancel();
}

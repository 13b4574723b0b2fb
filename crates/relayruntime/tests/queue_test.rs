mod common;

use common::*;
use relaycore::{ExecutionStatus, Node, WorkflowGraph};
use relayruntime::{JobQueue, RuntimeConfig, TriggerInput};

fn single_counter() -> WorkflowGraph {
    WorkflowGraph::from_parts(vec![Node::new("A", COUNTING, "Count")], vec![])
}

#[tokio::test]
async fn queued_jobs_all_run() {
    let config = RuntimeConfig {
        max_concurrent_runs: 2,
        queue_capacity: 4,
        ..RuntimeConfig::default()
    };
    let harness = Harness::with_config(config).with_graph(single_counter()).await;
    let queue = JobQueue::start(harness.runtime.clone());

    let mut ids = Vec::new();
    for i in 0..6 {
        let trigger = TriggerInput::new(WORKFLOW, USER).with_request_id(format!("req-{}", i));
        ids.push(queue.enqueue(trigger).await.unwrap().id());
    }
    queue.shutdown().await;

    assert_eq!(harness.invocations(), 6);
    for id in ids {
        let execution = harness.runtime.get(id).await.unwrap().unwrap();
        assert_eq!(execution.status(), ExecutionStatus::Success);
    }
    assert_eq!(harness.executions.find_by_workflow(WORKFLOW).await.len(), 6);
}

#[tokio::test]
async fn redelivered_jobs_are_dropped() {
    let harness = Harness::new().with_graph(single_counter()).await;
    let queue = JobQueue::start(harness.runtime.clone());

    let execution = queue.enqueue(TriggerInput::new(WORKFLOW, USER)).await.unwrap();
    queue.deliver(execution.id()).await.unwrap();
    queue.deliver(execution.id()).await.unwrap();
    queue.shutdown().await;

    assert_eq!(harness.invocations(), 1);
    let stored = harness.runtime.get(execution.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Success);
}

#[tokio::test]
async fn cancelled_before_delivery_never_runs() {
    let harness = Harness::new().with_graph(single_counter()).await;
    let execution = harness
        .runtime
        .submit(TriggerInput::new(WORKFLOW, USER))
        .await
        .unwrap();
    harness.runtime.cancel(execution.id()).await.unwrap();

    let queue = JobQueue::start(harness.runtime.clone());
    queue.deliver(execution.id()).await.unwrap();
    queue.shutdown().await;

    assert_eq!(harness.invocations(), 0);
    let stored = harness.runtime.get(execution.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Cancelled);
}

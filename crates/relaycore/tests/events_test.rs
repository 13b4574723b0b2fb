use relaycore::{
    EventBus, EventEmitter, ExecutionEvent, ExecutionStatus, NodeEvent, NodeType,
    WorkflowDefinition,
};
use serde_json::json;

#[tokio::test]
async fn emitter_events_reach_subscribers() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let execution_id = uuid::Uuid::new_v4();
    let emitter = bus.create_emitter(execution_id, "fetch".to_string());

    emitter.info("GET https://example.com");
    emitter.warn("slow response");
    emitter.progress(50.0, Some("halfway".to_string()));

    let mut received = Vec::new();
    for _ in 0..3 {
        match events.recv().await.unwrap() {
            ExecutionEvent::NodeEvent {
                execution_id: id,
                node_id,
                event,
                ..
            } => {
                assert_eq!(id, execution_id);
                assert_eq!(node_id, "fetch");
                received.push(event);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert!(matches!(&received[0], NodeEvent::Info { message } if message == "GET https://example.com"));
    assert!(matches!(&received[1], NodeEvent::Warning { .. }));
    assert!(matches!(&received[2], NodeEvent::Progress { percent, .. } if *percent == 50.0));
}

#[tokio::test]
async fn emitting_without_subscribers_is_fine() {
    let bus = EventBus::default();
    bus.emit(ExecutionEvent::ExecutionFinished {
        execution_id: uuid::Uuid::new_v4(),
        status: ExecutionStatus::Success,
        duration_ms: 3,
        error: None,
        timestamp: chrono::Utc::now(),
    });

    EventEmitter::detached(uuid::Uuid::new_v4(), "n1").info("nobody listens");
}

#[test]
fn events_serialize_with_type_tag() {
    let event = ExecutionEvent::ExecutionFinished {
        execution_id: uuid::Uuid::nil(),
        status: ExecutionStatus::Failed,
        duration_ms: 12,
        error: Some("timeout".to_string()),
        timestamp: chrono::Utc::now(),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "ExecutionFinished");
    assert_eq!(value["status"], "FAILED");
}

#[test]
fn workflow_definition_from_json() {
    let raw = json!({
        "id": "wf-1",
        "name": "Fetch and shape",
        "nodes": [
            {"id": "a", "type": "INITIAL", "name": "Start", "position": {"x": 0.0, "y": 0.0}},
            {"id": "b", "type": "HTTP_REQUEST", "name": "Fetch", "data": {"url": "http://localhost"}}
        ],
        "edges": [
            {"source": "a", "target": "b"}
        ]
    });

    let workflow: WorkflowDefinition = serde_json::from_value(raw).unwrap();

    assert_eq!(workflow.id, "wf-1");
    assert_eq!(workflow.graph.nodes().len(), 2);
    assert_eq!(workflow.graph.nodes()[1].node_type.as_str(), NodeType::HTTP_REQUEST);
    assert_eq!(workflow.graph.edges()[0].source_handle, "main");
    assert!(workflow.graph.validate(&relaycore::BuiltinCatalog).is_ok());
}

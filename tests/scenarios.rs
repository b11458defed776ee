// Cross-module scenarios for the workflow engine / judgment core. Each
// module already unit-tests its own contract in isolation; these exercise
// the assembled `WorkflowEngine` end to end the way a deployed workflow
// actually would, wiring `ToolHub`, `JudgmentEngine`, and
// `RuleDeploymentHub` together behind one DSL.

use std::sync::Arc;
use std::time::Duration;

use workcell_core::engine::{
    CheckpointStore, EngineDeps, InMemoryCheckpointStore, MockCodeRunner, NoopCompensator, WorkflowEngine, WorkflowRegistry,
};
use workcell_core::events::{EventBus, InMemoryEventLog, NoopPubSub};
use workcell_core::judgment::{JudgmentEngine, MockLlmJudge};
use workcell_core::learning::PromptStore;
use workcell_core::models::{
    Checkpoint, ConfidenceVector, Decision, InstanceState, JudgmentMethod, LlmCallMetadata, Node, NodeId, NodeType,
    PromptTemplate, PromptTemplateId, Rule, RuleCondition, RulesetId, TraceId, WorkflowDsl,
};
use workcell_core::rules::RuleDeploymentHub;
use workcell_core::tools::provider::MockToolProvider;
use workcell_core::tools::{synthesize_data_source_tools, ToolHub};

fn node(id: &str, node_type: NodeType, config: serde_json::Value, next: Vec<&str>) -> Node {
    Node {
        id: NodeId::from(id),
        node_type,
        config,
        next: next.into_iter().map(NodeId::from).collect(),
        retry_policy: None,
        compensable: false,
    }
}

async fn wait_until_terminal(checkpoints: &Arc<dyn CheckpointStore>, instance_id: uuid::Uuid) -> Checkpoint {
    for _ in 0..400 {
        if let Some(cp) = checkpoints.latest(instance_id).await.unwrap() {
            if cp.state.is_terminal() {
                return cp;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("instance {instance_id} never reached a terminal state");
}

async fn wait_until_state(checkpoints: &Arc<dyn CheckpointStore>, instance_id: uuid::Uuid, state: InstanceState) -> bool {
    for _ in 0..400 {
        if let Some(cp) = checkpoints.latest(instance_id).await.unwrap() {
            if cp.state == state {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// S1 — Temperature rule escalate, driven through the full engine: a DATA
/// node reads the sensor reading, JUDGMENT escalates the low-confidence
/// rule verdict to the LLM, and ACTION fires the notification with the
/// judgment's own result carried in its payload.
#[tokio::test]
async fn s1_temperature_escalate_through_the_assembled_engine() {
    let tool_hub = Arc::new(ToolHub::new());
    let mes = Arc::new(MockToolProvider::new(vec![]));
    mes.set_response("read_sensor", Ok(serde_json::json!({"line": "A", "temperature": 81})))
        .await;
    let mes_spec = synthesize_data_source_tools("mes://line-a", vec![]);
    let mes_provider = tool_hub.register_provider_with_client(mes_spec, mes);

    let notifier = Arc::new(MockToolProvider::new(vec![]));
    notifier.set_response("notify", Ok(serde_json::json!({"delivered": true}))).await;
    let notifier_spec = synthesize_data_source_tools("notifier://ops", vec![]);
    let notifier_provider = tool_hub.register_provider_with_client(notifier_spec, notifier);

    let rule_deployment = Arc::new(RuleDeploymentHub::default());
    let ruleset_id = RulesetId::from("line-a-temp");
    let rule = Rule {
        id: "r-temp".into(),
        description: "temperature rule".into(),
        condition: RuleCondition::FieldGreaterThan { field: "temperature".into(), threshold: 75.0 },
        decision: Decision::Warning,
        confidence: 0.6,
    };
    let source = serde_json::to_string(&vec![rule]).unwrap();
    let v = rule_deployment.create_version(ruleset_id.clone(), source, "init".into()).unwrap();
    rule_deployment.publish(&ruleset_id, v, None).unwrap();

    let llm = Arc::new(MockLlmJudge::new());
    llm.push_response(
        "line-a-temp-prompt",
        Ok(workcell_core::judgment::llm::LlmOutcome {
            vector: ConfidenceVector::new(0.0, 0.1, 0.9),
            metadata: LlmCallMetadata {
                model: Some("mock-llm".into()),
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                cost_usd: Some(0.0),
                latency_ms: Some(1),
            },
        }),
    )
    .await;
    let judgment_engine = Arc::new(JudgmentEngine::new(rule_deployment.clone(), llm));

    let prompt_store = Arc::new(PromptStore::new());
    prompt_store
        .register(PromptTemplate {
            id: PromptTemplateId::from("line-a-temp-prompt"),
            version: 3,
            system_prompt: "classify line anomalies".into(),
            exemplars: vec![],
        })
        .unwrap();

    let deps = Arc::new(EngineDeps {
        tool_hub: tool_hub.clone(),
        judgment_engine,
        rule_deployment,
        prompt_store,
        code_runner: Arc::new(MockCodeRunner::new()),
        compensator: Arc::new(NoopCompensator),
    });

    let registry = Arc::new(WorkflowRegistry::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let events = Arc::new(EventBus::new(Arc::new(InMemoryEventLog::new()), Arc::new(NoopPubSub)));
    let engine = Arc::new(WorkflowEngine::new(registry.clone(), checkpoints.clone(), events, deps));

    let dsl = WorkflowDsl {
        name: "temp-escalation".into(),
        version: 1,
        trigger: None,
        deadline_ms: None,
        nodes: vec![
            node(
                "read",
                NodeType::Data,
                serde_json::json!({"connector": mes_provider.as_str(), "tool_name": "read_sensor", "query": {}}),
                vec!["judge"],
            ),
            node(
                "judge",
                NodeType::Judgment,
                serde_json::json!({
                    "ruleset_id": "line-a-temp",
                    "prompt_template_id": "line-a-temp-prompt",
                    "policy": "escalate",
                    "input": "$.nodes.read.result",
                    "ttl_seconds": 300,
                }),
                vec!["notify"],
            ),
            node(
                "notify",
                NodeType::Action,
                serde_json::json!({
                    "provider_id": notifier_provider.as_str(),
                    "tool_name": "notify",
                    "parameters": {"execution": "$.nodes.judge.result"},
                }),
                vec![],
            ),
        ],
    };
    let workflow = registry.create("tenant-a", "Temp Escalation", dsl).unwrap();

    let instance_id = engine
        .start(&workflow.id, serde_json::json!({}), TraceId::from("trace-s1"))
        .await
        .unwrap();
    let checkpoint = wait_until_terminal(&checkpoints, instance_id).await;

    assert_eq!(checkpoint.state, InstanceState::Completed);
    let judgment_result = checkpoint.runtime_context.resolve("$.nodes.judge.result.result").unwrap();
    assert_eq!(judgment_result, serde_json::json!("critical"));
    let method = checkpoint.runtime_context.resolve("$.nodes.judge.result.method").unwrap();
    assert_eq!(method, serde_json::to_value(JudgmentMethod::Hybrid).unwrap());
    let delivered = checkpoint.runtime_context.resolve("$.nodes.notify.result.delivered").unwrap();
    assert_eq!(delivered, serde_json::json!(true));
}

/// S2 — Parallel with quorum(2-of-3) join: branches finish at 100ms, 200ms
/// and 900ms. The quorum-2 policy must admit the join as soon as the two
/// fastest branches land — around 200ms — and let the slow third branch get
/// aborted rather than holding the whole instance up for 900ms.
#[tokio::test]
async fn s2_parallel_quorum_join_admits_two_of_three() {
    let code_runner = Arc::new(MockCodeRunner::new());
    code_runner.set_response("branch_a", Ok(serde_json::json!("A"))).await;
    code_runner.set_delay("branch_a", Duration::from_millis(100)).await;
    code_runner.set_response("branch_b", Ok(serde_json::json!("B"))).await;
    code_runner.set_delay("branch_b", Duration::from_millis(200)).await;
    code_runner.set_response("branch_c", Ok(serde_json::json!("C"))).await;
    code_runner.set_delay("branch_c", Duration::from_millis(900)).await;

    let rule_deployment = Arc::new(RuleDeploymentHub::default());
    let deps = Arc::new(EngineDeps {
        tool_hub: Arc::new(ToolHub::new()),
        judgment_engine: Arc::new(JudgmentEngine::new(rule_deployment.clone(), Arc::new(MockLlmJudge::new()))),
        rule_deployment,
        prompt_store: Arc::new(PromptStore::new()),
        code_runner,
        compensator: Arc::new(NoopCompensator),
    });
    let registry = Arc::new(WorkflowRegistry::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let events = Arc::new(EventBus::new(Arc::new(InMemoryEventLog::new()), Arc::new(NoopPubSub)));
    let engine = Arc::new(WorkflowEngine::new(registry.clone(), checkpoints.clone(), events, deps));

    let dsl = WorkflowDsl {
        name: "quorum-join".into(),
        version: 1,
        trigger: None,
        deadline_ms: None,
        nodes: vec![
            node(
                "fanout",
                NodeType::Parallel,
                serde_json::json!({"branches": ["a", "b", "c"], "join": {"quorum": 2}}),
                vec!["downstream"],
            ),
            node("a", NodeType::Code, serde_json::json!({"body": "branch_a", "bindings": {}}), vec![]),
            node("b", NodeType::Code, serde_json::json!({"body": "branch_b", "bindings": {}}), vec![]),
            node("c", NodeType::Code, serde_json::json!({"body": "branch_c", "bindings": {}}), vec![]),
            node("downstream", NodeType::Code, serde_json::json!({"body": "branch_a", "bindings": {}}), vec![]),
        ],
    };
    let workflow = registry.create("tenant-a", "Quorum Join", dsl).unwrap();

    let start = std::time::Instant::now();
    let instance_id = engine.start(&workflow.id, serde_json::json!({}), TraceId::from("trace-s2")).await.unwrap();
    let checkpoint = wait_until_terminal(&checkpoints, instance_id).await;
    let elapsed = start.elapsed();

    assert_eq!(checkpoint.state, InstanceState::Completed);
    assert!(checkpoint.runtime_context.has_node_result(&NodeId::from("a")));
    assert!(checkpoint.runtime_context.has_node_result(&NodeId::from("b")));
    assert!(!checkpoint.runtime_context.has_node_result(&NodeId::from("c")));
    assert!(checkpoint.runtime_context.has_node_result(&NodeId::from("downstream")));
    assert!(
        elapsed < Duration::from_millis(700),
        "quorum(2) should admit once a (100ms) and b (200ms) land, well before c's 900ms: took {elapsed:?}"
    );
}

/// S6 — Cancellation arriving mid-PARALLEL: three branches are in flight,
/// each scripted to take 500ms. A cancel landing shortly after they start
/// must abandon all three promptly and settle the instance on CANCELLED,
/// not wait for any of them to finish.
#[tokio::test]
async fn s6_cancel_settles_a_parallel_instance_on_cancelled() {
    let code_runner = Arc::new(MockCodeRunner::new());
    for body in ["branch_a", "branch_b", "branch_c"] {
        code_runner.set_response(body, Ok(serde_json::json!("done"))).await;
        code_runner.set_delay(body, Duration::from_millis(500)).await;
    }
    let rule_deployment = Arc::new(RuleDeploymentHub::default());
    let deps = Arc::new(EngineDeps {
        tool_hub: Arc::new(ToolHub::new()),
        judgment_engine: Arc::new(JudgmentEngine::new(rule_deployment.clone(), Arc::new(MockLlmJudge::new()))),
        rule_deployment,
        prompt_store: Arc::new(PromptStore::new()),
        code_runner,
        compensator: Arc::new(NoopCompensator),
    });
    let registry = Arc::new(WorkflowRegistry::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let events = Arc::new(EventBus::new(Arc::new(InMemoryEventLog::new()), Arc::new(NoopPubSub)));
    let engine = Arc::new(WorkflowEngine::new(registry.clone(), checkpoints.clone(), events, deps));

    let dsl = WorkflowDsl {
        name: "cancel-mid-parallel".into(),
        version: 1,
        trigger: None,
        deadline_ms: None,
        nodes: vec![
            node("fanout", NodeType::Parallel, serde_json::json!({"branches": ["a", "b", "c"], "join": "all"}), vec![]),
            node("a", NodeType::Code, serde_json::json!({"body": "branch_a", "bindings": {}}), vec![]),
            node("b", NodeType::Code, serde_json::json!({"body": "branch_b", "bindings": {}}), vec![]),
            node("c", NodeType::Code, serde_json::json!({"body": "branch_c", "bindings": {}}), vec![]),
        ],
    };
    let workflow = registry.create("tenant-a", "Cancel Mid Parallel", dsl).unwrap();
    let instance_id = engine.start(&workflow.id, serde_json::json!({}), TraceId::from("trace-s6")).await.unwrap();

    assert!(wait_until_state(&checkpoints, instance_id, InstanceState::Running).await, "instance never reached RUNNING");
    // Give the three branches a moment to actually be in flight before cancelling.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = std::time::Instant::now();
    engine.cancel(instance_id).await.unwrap();
    let checkpoint = wait_until_terminal(&checkpoints, instance_id).await;
    let elapsed = start.elapsed();

    assert_eq!(checkpoint.state, InstanceState::Cancelled);
    assert!(
        elapsed < Duration::from_millis(400),
        "cancel mid-PARALLEL should abandon in-flight branches promptly, not wait out their 500ms: took {elapsed:?}"
    );
}

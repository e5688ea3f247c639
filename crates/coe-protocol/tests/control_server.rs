use async_trait::async_trait;
use coe_core::{Task, Verdict};
use coe_orchestrator::{AgentSet, MockAgent, Orchestrator};
use coe_protocol::{ControlServer, MethodHandler, MethodRegistry, RpcError};
use coe_stability::StabilityGate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Harness {
    server: ControlServer,
    orchestrator: Arc<Orchestrator>,
    input: mpsc::Sender<String>,
    output: mpsc::Receiver<String>,
}

impl Harness {
    fn new(mock: MockAgent) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(AgentSet::uniform(Arc::new(mock))));
        let registry = MethodRegistry::for_orchestrator(orchestrator.clone())
            .with_gate(StabilityGate::default());
        Self::with_registry(orchestrator, registry)
    }

    fn with_registry(orchestrator: Arc<Orchestrator>, registry: MethodRegistry) -> Self {
        let (input, in_rx) = mpsc::channel(16);
        let (out_tx, output) = mpsc::channel(16);
        let server = ControlServer::new(Arc::new(registry), in_rx, out_tx);
        Self {
            server,
            orchestrator,
            input,
            output,
        }
    }

    async fn send(&self, frame: impl Into<String>) {
        self.input.send(frame.into()).await.unwrap();
    }

    async fn recv_text(&mut self) -> String {
        timeout(Duration::from_secs(5), self.output.recv())
            .await
            .expect("response within 5s")
            .expect("output channel open")
    }

    async fn recv(&mut self) -> Value {
        serde_json::from_str(&self.recv_text().await).unwrap()
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send(request.to_string()).await;
        self.recv().await
    }

    async fn assert_silent(&mut self) {
        assert!(
            timeout(Duration::from_millis(100), self.output.recv())
                .await
                .is_err(),
            "unexpected response"
        );
    }
}

#[tokio::test]
async fn test_unknown_method_exact_response() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    h.send(r#"{"jsonrpc":"2.0","method":"unknownMethod","id":2}"#).await;
    assert_eq!(
        h.recv_text().await,
        r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found: unknownMethod"}}"#
    );
}

#[tokio::test]
async fn test_parse_error_has_null_id() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    h.send(r#"{"jsonrpc":"2.0","method":"#).await;
    let response = h.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["error"]["message"], "Parse error");
}

#[tokio::test]
async fn test_invalid_version() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    let response = h
        .call(json!({"jsonrpc": "1.0", "method": "getNextTask", "id": 9}))
        .await;
    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(response["error"]["message"], "Invalid JSON-RPC version");
}

#[tokio::test]
async fn test_request_without_id_is_answered_with_null_id() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    let response = h.call(json!({"jsonrpc": "2.0", "method": "getNextTask"})).await;
    assert_eq!(
        response,
        json!({"jsonrpc": "2.0", "id": null, "result": null})
    );
}

#[tokio::test]
async fn test_get_next_task_returns_task_then_null() {
    let mut h = Harness::new(MockAgent::new());
    h.orchestrator
        .enqueue(Task::new("T1", "Build login form").with_feature("F1"))
        .await;
    h.server.start();

    let first = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 1}))
        .await;
    assert_eq!(first["result"]["id"], "T1");
    assert_eq!(first["result"]["status"], "in-progress");

    let second = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 2}))
        .await;
    assert_eq!(second["result"], Value::Null);
}

#[tokio::test]
async fn test_call_coe_agent_validation() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    let no_args = h
        .call(json!({
            "jsonrpc": "2.0", "method": "callCOEAgent", "id": 1,
            "params": {"command": "plan"}
        }))
        .await;
    assert_eq!(no_args["error"]["code"], -32602);
    assert_eq!(no_args["error"]["message"], "Missing or invalid args object");

    let no_question = h
        .call(json!({
            "jsonrpc": "2.0", "method": "callCOEAgent", "id": 2,
            "params": {"command": "ask", "args": {}}
        }))
        .await;
    assert_eq!(no_question["error"]["code"], -32602);
    assert!(no_question["error"]["message"]
        .as_str()
        .unwrap()
        .contains("question"));

    let unknown = h
        .call(json!({
            "jsonrpc": "2.0", "method": "callCOEAgent", "id": 3,
            "params": {"command": "review", "args": {}}
        }))
        .await;
    assert_eq!(unknown["error"]["code"], -32602);
    let message = unknown["error"]["message"].as_str().unwrap();
    for command in ["plan", "verify", "ask"] {
        assert!(message.contains(command));
    }
}

#[tokio::test]
async fn test_verify_result_is_flattened() {
    let mut h = Harness::new(MockAgent::new().with_verdict(Verdict::pass("tests cover login")));
    h.server.start();

    let response = h
        .call(json!({
            "jsonrpc": "2.0", "method": "callCOEAgent", "id": "v1",
            "params": {"command": "verify", "args": {"task": "Login", "code": "fn login() {}"}}
        }))
        .await;
    assert_eq!(response["id"], "v1");
    assert_eq!(response["result"], "PASS - tests cover login");
}

#[tokio::test]
async fn test_agent_failure_is_internal_error() {
    let mut h = Harness::new(MockAgent::new().failing("rate limited"));
    h.server.start();

    let response = h
        .call(json!({
            "jsonrpc": "2.0", "method": "callCOEAgent", "id": 4,
            "params": {"command": "plan", "args": {"task": "Add logout"}}
        }))
        .await;
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(
        response["error"]["message"],
        "Internal error: Agent error: rate limited"
    );
}

#[tokio::test]
async fn test_queue_methods_round_trip() {
    let mut h = Harness::new(MockAgent::new());
    h.orchestrator.enqueue(Task::new("T1", "a")).await;
    h.orchestrator
        .enqueue(Task::new("T2", "b").with_dependencies(vec!["T1".to_string()]))
        .await;
    h.server.start();

    h.call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 1}))
        .await;
    let done = h
        .call(json!({
            "jsonrpc": "2.0", "method": "completeTask", "id": 2,
            "params": {"taskId": "T1"}
        }))
        .await;
    assert_eq!(done["result"], true);

    let next = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 3}))
        .await;
    assert_eq!(next["result"]["id"], "T2");

    let missing = h
        .call(json!({
            "jsonrpc": "2.0", "method": "requeueTask", "id": 4,
            "params": {"taskId": "T404"}
        }))
        .await;
    assert_eq!(missing["error"]["code"], -32602);
}

#[tokio::test]
async fn test_report_file_change_resets_matching_sessions() {
    let gate = StabilityGate::default();
    let orchestrator = Arc::new(Orchestrator::new(AgentSet::uniform(Arc::new(
        MockAgent::new(),
    ))));
    let registry = MethodRegistry::for_orchestrator(orchestrator.clone()).with_gate(gate.clone());
    let mut h = Harness::with_registry(orchestrator, registry);
    let _session = gate.open_session(vec!["src/auth.rs".to_string()]);
    h.server.start();

    let response = h
        .call(json!({
            "jsonrpc": "2.0", "method": "reportFileChange", "id": 1,
            "params": {"path": "/work/src/auth.rs"}
        }))
        .await;
    assert_eq!(response["result"], 1);
}

#[tokio::test]
async fn test_second_start_attaches_no_extra_listener() {
    let mut h = Harness::new(MockAgent::new());
    assert!(h.server.start());
    assert!(!h.server.start());

    h.send(r#"{"jsonrpc":"2.0","method":"unknownMethod","id":1}"#).await;
    h.recv().await;
    h.assert_silent().await;
}

#[tokio::test]
async fn test_stop_retains_input_for_restart() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();
    assert!(h.server.stop().await);

    h.send(r#"{"jsonrpc":"2.0","method":"getNextTask","id":7}"#).await;
    h.assert_silent().await;

    assert!(h.server.start());
    let response = h.recv().await;
    assert_eq!(response["id"], 7);
}

#[tokio::test]
async fn test_blank_frames_are_skipped() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    h.send("").await;
    h.send("   ").await;
    h.assert_silent().await;
}

struct SlowEcho;

#[async_trait]
impl MethodHandler for SlowEcho {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(params.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_frames_are_dispatched_concurrently() {
    let orchestrator = Arc::new(Orchestrator::new(AgentSet::uniform(Arc::new(
        MockAgent::new(),
    ))));
    let registry =
        MethodRegistry::for_orchestrator(orchestrator.clone()).with_method("slowEcho", Arc::new(SlowEcho));
    let mut h = Harness::with_registry(orchestrator, registry);
    h.server.start();

    h.send(r#"{"jsonrpc":"2.0","method":"slowEcho","params":"late","id":1}"#)
        .await;
    h.send(r#"{"jsonrpc":"2.0","method":"getNextTask","id":2}"#).await;

    assert_eq!(h.recv().await["id"], 2);
    let slow = h.recv().await;
    assert_eq!(slow["id"], 1);
    assert_eq!(slow["result"], "late");
}

#[tokio::test]
async fn test_join_drains_in_flight_requests() {
    let orchestrator = Arc::new(Orchestrator::new(AgentSet::uniform(Arc::new(
        MockAgent::new(),
    ))));
    let registry = MethodRegistry::new().with_method("slowEcho", Arc::new(SlowEcho));
    let h = Harness::with_registry(orchestrator, registry);
    let Harness {
        server,
        input,
        mut output,
        ..
    } = h;
    server.start();

    input
        .send(r#"{"jsonrpc":"2.0","method":"slowEcho","params":1,"id":1}"#.to_string())
        .await
        .unwrap();
    drop(input);

    timeout(Duration::from_secs(5), server.join())
        .await
        .expect("join after input closed");
    assert!(!server.is_running());

    let text = output.try_recv().expect("response written before join returned");
    let response: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(response["result"], 1);
}

struct Boom;

#[async_trait]
impl MethodHandler for Boom {
    async fn call(&self, _params: Option<Value>) -> Result<Value, RpcError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn test_panicking_handler_gets_internal_error() {
    let orchestrator = Arc::new(Orchestrator::new(AgentSet::uniform(Arc::new(
        MockAgent::new(),
    ))));
    let registry =
        MethodRegistry::for_orchestrator(orchestrator.clone()).with_method("boom", Arc::new(Boom));
    let mut h = Harness::with_registry(orchestrator, registry);
    h.server.start();

    let response = h.call(json!({"jsonrpc": "2.0", "method": "boom", "id": 1})).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["error"]["code"], -32603);

    // The listener survives and keeps answering
    let next = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 2}))
        .await;
    assert_eq!(next["result"], Value::Null);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_stability_is_reset_by_reported_changes() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    h.send(
        json!({
            "jsonrpc": "2.0", "method": "waitForStability", "id": 1,
            "params": {"files": ["src/auth.rs"], "delayMs": 2000, "maxWaitMs": 60000}
        })
        .to_string(),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let reset = h
        .call(json!({
            "jsonrpc": "2.0", "method": "reportFileChange", "id": 2,
            "params": {"path": "/work/src/auth.rs"}
        }))
        .await;
    assert_eq!(reset["result"], 1);

    let stable = h.recv().await;
    assert_eq!(stable["id"], 1);
    assert_eq!(stable["result"]["timedOut"], false);
    let elapsed = stable["result"]["elapsedMs"].as_u64().unwrap();
    assert!((2500..3500).contains(&elapsed), "{}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_stability_is_bounded_by_max_wait() {
    let mut h = Harness::new(MockAgent::new());
    h.server.start();

    let response = h
        .call(json!({
            "jsonrpc": "2.0", "method": "waitForStability", "id": 1,
            "params": {"files": ["src/auth.rs"], "delayMs": 3000, "maxWaitMs": 1000}
        }))
        .await;
    assert_eq!(response["result"]["timedOut"], true);
    let elapsed = response["result"]["elapsedMs"].as_u64().unwrap();
    assert!((1000..2000).contains(&elapsed), "{}", elapsed);
}

#[tokio::test]
async fn test_update_plan_requeues_finished_tasks() {
    let mut h = Harness::new(MockAgent::new());
    h.orchestrator
        .enqueue_all(vec![
            Task::new("T1", "Login form").with_feature("F1").with_team("web"),
            Task::new("T2", "Invoices").with_feature("F2"),
        ])
        .await;
    h.server.start();

    h.call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 1}))
        .await;
    h.call(json!({
        "jsonrpc": "2.0", "method": "completeTask", "id": 2,
        "params": {"taskId": "T1"}
    }))
    .await;

    let plan = |login: &str| {
        json!({
            "features": [{"id": "F1", "name": login}, {"id": "F2", "name": "Billing"}],
            "devStories": [{"id": "D1", "title": "Session API", "relatedBlockIds": ["F1"]}]
        })
    };
    let first = h
        .call(json!({
            "jsonrpc": "2.0", "method": "updatePlan", "id": 3,
            "params": {"plan": plan("Login")}
        }))
        .await;
    assert_eq!(first["result"]["requeued"], json!([]));

    let second = h
        .call(json!({
            "jsonrpc": "2.0", "method": "updatePlan", "id": 4,
            "params": {"plan": plan("Login with SSO")}
        }))
        .await;
    let result = &second["result"];
    assert_eq!(result["requeued"], json!(["T1"]));
    assert_eq!(result["staleClaims"], json!([]));
    assert_eq!(result["analysis"]["changes"][0]["elementId"], "F1");
    assert_eq!(result["analysis"]["summary"]["affectedTeams"], json!(["web"]));

    // T2 was never claimed, so it is still ahead of the requeued T1
    let next = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 5}))
        .await;
    assert_eq!(next["result"]["id"], "T2");
    let again = h
        .call(json!({"jsonrpc": "2.0", "method": "getNextTask", "id": 6}))
        .await;
    assert_eq!(again["result"]["id"], "T1");

    let invalid = h
        .call(json!({
            "jsonrpc": "2.0", "method": "updatePlan", "id": 7,
            "params": {}
        }))
        .await;
    assert_eq!(invalid["error"]["code"], -32602);
}

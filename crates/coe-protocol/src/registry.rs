//! Method registry

use async_trait::async_trait;
use coe_orchestrator::Orchestrator;
use coe_stability::StabilityGate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers::{
    CallCoeAgent, CompleteTask, GetNextTask, ReportFileChange, RequeueTask, UpdatePlan,
    WaitForStability,
};
use crate::jsonrpc::RpcError;

/// A callable JSON-RPC method
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Method name to handler table
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue and agent methods backed by `orchestrator`
    pub fn for_orchestrator(orchestrator: Arc<Orchestrator>) -> Self {
        Self::new()
            .with_method(
                GetNextTask::METHOD,
                Arc::new(GetNextTask::new(orchestrator.clone())),
            )
            .with_method(
                CallCoeAgent::METHOD,
                Arc::new(CallCoeAgent::new(orchestrator.clone())),
            )
            .with_method(
                RequeueTask::METHOD,
                Arc::new(RequeueTask::new(orchestrator.clone())),
            )
            .with_method(
                CompleteTask::METHOD,
                Arc::new(CompleteTask::new(orchestrator.clone())),
            )
            .with_method(UpdatePlan::METHOD, Arc::new(UpdatePlan::new(orchestrator)))
    }

    /// Add `reportFileChange` and `waitForStability` backed by `gate`
    pub fn with_gate(self, gate: StabilityGate) -> Self {
        self.with_method(
            ReportFileChange::METHOD,
            Arc::new(ReportFileChange::new(gate.clone())),
        )
        .with_method(WaitForStability::METHOD, Arc::new(WaitForStability::new(gate)))
    }

    pub fn with_method(mut self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.register(name, handler);
        self
    }

    /// Register or replace a method
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered method names, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

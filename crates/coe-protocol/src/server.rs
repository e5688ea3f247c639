//! Control Protocol Server
//!
//! Reads one JSON-RPC request per frame from an input channel and writes one
//! response per request to an output channel. Transport (stdio, sockets) is
//! the caller's concern.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::registry::MethodRegistry;

const PREVIEW_CHARS: usize = 100;

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Validate and execute a single frame
pub async fn dispatch(registry: &MethodRegistry, frame: &str) -> JsonRpcResponse {
    let value: Value = match serde_json::from_str(frame) {
        Ok(value) => value,
        Err(e) => return JsonRpcResponse::from_rpc_error(None, RpcError::Parse(e.to_string())),
    };

    let id = value.get("id").cloned();
    let request = match JsonRpcRequest::from_value(value) {
        Ok(request) => request,
        Err(e) => return JsonRpcResponse::from_rpc_error(id, e),
    };

    let JsonRpcRequest {
        method, params, id, ..
    } = request;
    let Some(handler) = registry.get(&method) else {
        return JsonRpcResponse::from_rpc_error(id, RpcError::MethodNotFound(method));
    };

    // Own task, so a panicking handler still yields a response
    match tokio::spawn(async move { handler.call(params).await }).await {
        Ok(Ok(result)) => JsonRpcResponse::success(id, result),
        Ok(Err(e)) => {
            debug!(method = %method, error = %e, "Method failed");
            JsonRpcResponse::from_rpc_error(id, e)
        }
        Err(e) => {
            let cause = if e.is_panic() { "panicked" } else { "was cancelled" };
            warn!(method = %method, "Method handler {}", cause);
            JsonRpcResponse::from_rpc_error(
                id,
                RpcError::Internal(format!("{} handler {}", method, cause)),
            )
        }
    }
}

enum Listener {
    /// Not listening; holds the input so a later start can re-attach
    Detached(mpsc::Receiver<String>),
    Attached {
        stop: oneshot::Sender<()>,
        task: JoinHandle<mpsc::Receiver<String>>,
    },
    /// Input is owned by an in-progress stop or join
    Busy,
}

/// JSON-RPC server over a pair of string channels
pub struct ControlServer {
    registry: Arc<MethodRegistry>,
    output: mpsc::Sender<String>,
    listener: Mutex<Listener>,
}

impl ControlServer {
    pub fn new(
        registry: Arc<MethodRegistry>,
        input: mpsc::Receiver<String>,
        output: mpsc::Sender<String>,
    ) -> Self {
        Self {
            registry,
            output,
            listener: Mutex::new(Listener::Detached(input)),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Attach the listener; returns false if one is already attached
    pub fn start(&self) -> bool {
        let mut listener = self.listener.lock();
        match std::mem::replace(&mut *listener, Listener::Busy) {
            Listener::Detached(input) => {
                let (stop, stop_rx) = oneshot::channel();
                let task = tokio::spawn(listen(
                    self.registry.clone(),
                    self.output.clone(),
                    input,
                    stop_rx,
                ));
                *listener = Listener::Attached { stop, task };
                info!("Control server started");
                true
            }
            other => {
                *listener = other;
                debug!("Control server already started");
                false
            }
        }
    }

    /// Detach the listener, keeping the input channel for a later start
    ///
    /// Requests already dispatched keep running and still write their
    /// responses.
    pub async fn stop(&self) -> bool {
        let (stop, task) = {
            let mut listener = self.listener.lock();
            match std::mem::replace(&mut *listener, Listener::Busy) {
                Listener::Attached { stop, task } => (stop, task),
                other => {
                    *listener = other;
                    return false;
                }
            }
        };

        let _ = stop.send(());
        self.reattach(task.await);
        info!("Control server stopped");
        true
    }

    /// Wait until the input channel closes and every in-flight request has
    /// been answered
    pub async fn join(&self) {
        let (stop, task) = {
            let mut listener = self.listener.lock();
            match std::mem::replace(&mut *listener, Listener::Busy) {
                Listener::Attached { stop, task } => (stop, task),
                other => {
                    *listener = other;
                    return;
                }
            }
        };

        let result = task.await;
        drop(stop);
        self.reattach(result);
    }

    pub fn is_running(&self) -> bool {
        matches!(
            &*self.listener.lock(),
            Listener::Attached { task, .. } if !task.is_finished()
        )
    }

    /// Dispatch a frame directly, bypassing the channels
    pub async fn handle(&self, frame: &str) -> JsonRpcResponse {
        dispatch(&self.registry, frame).await
    }

    fn reattach(&self, result: Result<mpsc::Receiver<String>, tokio::task::JoinError>) {
        match result {
            Ok(input) => *self.listener.lock() = Listener::Detached(input),
            Err(e) => warn!("Control server listener ended abnormally: {}", e),
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Listener::Attached { task, .. } = &*self.listener.lock() {
            task.abort();
        }
    }
}

async fn listen(
    registry: Arc<MethodRegistry>,
    output: mpsc::Sender<String>,
    mut input: mpsc::Receiver<String>,
    mut stop: oneshot::Receiver<()>,
) -> mpsc::Receiver<String> {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop => {
                in_flight.detach_all();
                return input;
            }
            // Reap finished requests ahead of new input
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            frame = input.recv() => {
                let Some(frame) = frame else {
                    debug!("Control input closed");
                    break;
                };
                if frame.trim().is_empty() {
                    continue;
                }
                debug!("<- {}", preview(&frame));

                let registry = registry.clone();
                let output = output.clone();
                in_flight.spawn(async move {
                    let response = dispatch(&registry, &frame).await;
                    match serde_json::to_string(&response) {
                        Ok(text) => {
                            debug!("-> {}", preview(&text));
                            if output.send(text).await.is_err() {
                                warn!("Control output closed, dropping response");
                            }
                        }
                        Err(e) => warn!("Failed to serialize response: {}", e),
                    }
                });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    input
}

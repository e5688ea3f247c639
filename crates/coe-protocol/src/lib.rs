//! COE control protocol
//!
//! JSON-RPC 2.0 over a pair of channels. Each input frame is one request;
//! each request gets exactly one response, written to the output channel as
//! soon as its handler finishes. Methods are [`MethodHandler`] trait objects
//! looked up by name in a [`MethodRegistry`].

pub mod handlers;
pub mod jsonrpc;
mod registry;
mod server;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ResponseOutcome, RpcError};
pub use registry::{MethodHandler, MethodRegistry};
pub use server::{dispatch, ControlServer};

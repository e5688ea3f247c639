//! # coe-core
//!
//! Core types for the COE coding-agent orchestrator.
//!
//! COE coordinates autonomous coding agents against a dependency-aware task
//! backlog. This crate holds what every other crate agrees on:
//!
//! - [`Task`] and [`TaskStatus`], the unit of work handed to agents
//! - [`Verdict`], the outcome of a verification agent run
//! - [`CoeError`] / [`Result`], the unified error type
//! - [`config::CoeConfig`], repository-level settings loaded from `.coe/config.toml`
//! - [`fail_open`], helpers for advisory steps that must never abort the caller

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::CoeConfig;
pub use error::{CoeError, Result};
pub use types::*;

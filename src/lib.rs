#![forbid(unsafe_code)]

//! `agent-relay`: a session broker in front of a command-line coding agent
//! and a pool of MCP tool providers.

pub mod agent;
pub mod config;
pub mod errors;
pub mod http;
pub mod process;
pub mod provider;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

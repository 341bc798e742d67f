//! Top-level module wiring for the lodestar crate.

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod knowledge;
pub mod mcp;
pub mod mission;
pub mod public_tools;
pub mod roles;
pub mod state;
pub mod summary;
pub mod tool_protocol;

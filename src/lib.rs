pub mod app;
pub mod broker;
pub mod consumer;
pub mod core;
pub mod handlers;
pub mod messages;

pub use crate::core::version::{build_time, git_hash, rpc_schema_version};

//! # quarry_tools
//!
//! The tool-server tier: JSON-RPC 2.0 surface, the middleware pipeline
//! every tool call traverses, and the dispatcher over retriever
//! capabilities.

pub mod dispatch;
pub mod middleware;
pub mod rpc;
pub mod server;
pub mod tools;

pub use server::{router, ToolServerState, ToolServices};

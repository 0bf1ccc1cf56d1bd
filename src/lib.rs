//! An MCP server exposing an observability platform as tools, and a ReAct
//! agent that drives those tools in-process.

pub mod agent;
pub mod chart;
pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod links;
pub mod mcp;
pub mod params;
pub mod prom;
pub mod promql;
pub mod session;

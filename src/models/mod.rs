// Data models for the MCP wire format and tool arguments

pub mod mcp;
pub mod tools;

// Transports that carry MCP messages to and from the server
//
// The HTTP transport lives in `routes`; this module holds the line-delimited
// stdio transport used by desktop MCP clients.

mod stdio;

pub use stdio::{run_stdio, serve_lines};

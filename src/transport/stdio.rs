// Newline-delimited JSON-RPC over stdin/stdout

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::models::mcp::{JsonRpcError, JsonRpcResponse};
use crate::server::McpServer;

/// Serve MCP on the process stdin/stdout until stdin closes
pub async fn run_stdio(server: McpServer) -> Result<()> {
    info!("MCP server listening on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_lines(&server, stdin, stdout).await?;
    info!("stdin closed, stdio transport stopped");
    Ok(())
}

/// Read one JSON-RPC message per line and write one response per line.
///
/// Blank lines are skipped and notifications produce no output. A line that is
/// not UTF-8 gets a parse error and the loop keeps reading.
pub async fn serve_lines<R, W>(server: &McpServer, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read from stdin")?;
        if read == 0 {
            break;
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match server.handle_message(line).await {
                    Some(response) => response,
                    None => continue,
                }
            }
            Err(e) => {
                warn!(error = %e, "Discarding non UTF-8 input line");
                JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e))
            }
        };

        let mut encoded =
            serde_json::to_vec(&response).context("Failed to serialize JSON-RPC response")?;
        encoded.push(b'\n');
        debug!(bytes = encoded.len(), "Writing response");

        writer
            .write_all(&encoded)
            .await
            .context("Failed to write to stdout")?;
        writer.flush().await.context("Failed to flush stdout")?;
    }

    Ok(())
}

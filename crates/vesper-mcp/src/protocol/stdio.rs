//! stdio transport
//!
//! Line-delimited JSON-RPC over stdin/stdout. Logging goes to stderr so
//! stdout stays clean for the protocol.

use std::io::{self, BufRead, BufReader, Write};

use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::VesperServer;

/// Minimal response used when even serialization fails, so clients never hang
const FALLBACK_RESPONSE: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// stdio transport for the tool server
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Serve requests until stdin closes
    pub async fn run(self, mut server: VesperServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    break;
                }
            };

            if line.is_empty() {
                continue;
            }

            debug!("Received: {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response)?;
            }
        }

        Ok(())
    }
}

fn write_response(
    stdout: &mut impl Write,
    response: &JsonRpcResponse,
) -> Result<(), io::Error> {
    match serde_json::to_string(response) {
        Ok(json) => {
            debug!("Sending: {} bytes", json.len());
            writeln!(stdout, "{}", json)?;
            stdout.flush()
        }
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            writeln!(stdout, "{}", FALLBACK_RESPONSE)?;
            stdout.flush()
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

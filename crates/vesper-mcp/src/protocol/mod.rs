//! JSON-RPC protocol layer
//!
//! Types and the stdio transport for the tool surface. The wire encoding is
//! JSON-RPC 2.0; the transport itself is line-delimited stdin/stdout.

pub mod stdio;
pub mod types;

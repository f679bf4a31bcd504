//! Vesper MCP Server - multi-tier memory for conversational agents
//!
//! Serves the memory-engine tool surface over JSON-RPC stdio:
//! - store_memory / store_decision / delete_memory
//! - retrieve_memory (smart-routed), list_recent, get_stats
//! - share_context, list_namespaces, namespace_stats
//! - load_skill, record_skill_outcome
//! - vesper_enable / vesper_disable / vesper_status
//!
//! The nightly consolidation scheduler runs as a background task; logging
//! goes to stderr because stdout carries the protocol.

mod engine;
mod protocol;
mod server;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use vesper_core::VesperConfig;

use crate::engine::Engine;
use crate::protocol::stdio::StdioTransport;
use crate::server::VesperServer;

/// Parse command-line arguments. Exits on `--help`/`--version`.
fn parse_args() -> VesperConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = VesperConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Vesper MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Multi-tier memory engine for conversational agents.");
                println!();
                println!("USAGE:");
                println!("    vesper-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Storage root (default ~/.vesper)");
                println!("    --schedule <HH:MM>      Consolidation time (default 03:00)");
                println!("    --fail-open             Allow requests when the limiter backing store is down");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG               Log level filter (e.g., debug, info, warn)");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("vesper-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                config.storage_root = Some(PathBuf::from(&args[i]));
            }
            "--schedule" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("error: --schedule requires HH:MM");
                    std::process::exit(1);
                };
                match value.split_once(':').and_then(|(h, m)| {
                    Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?))
                }) {
                    Some((hour, minute)) if hour < 24 && minute < 60 => {
                        config.schedule_hour = hour;
                        config.schedule_minute = minute;
                    }
                    _ => {
                        eprintln!("error: --schedule expects HH:MM (got '{value}')");
                        std::process::exit(1);
                    }
                }
            }
            "--fail-open" => {
                config.fail_closed = false;
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'vesper-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() {
    let config = parse_args();

    // Logging to stderr; stdout is the JSON-RPC channel
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Vesper MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let engine = match Engine::new(config) {
        Ok(engine) => {
            info!("Engine initialized");
            Arc::new(engine)
        }
        Err(e) => {
            error!("Failed to initialize engine: {}", e);
            std::process::exit(1);
        }
    };

    // Nightly consolidation; failures are reported and the schedule survives
    engine.scheduler.on_completion(Arc::new(|outcome| {
        match outcome {
            Ok(stats) => info!(
                memories_processed = stats.memories_processed,
                entities_extracted = stats.entities_extracted,
                conflicts_detected = stats.conflicts_detected,
                memories_pruned = stats.memories_pruned,
                duration_ms = stats.duration_ms,
                "Consolidation finished"
            ),
            Err(e) => warn!("Consolidation failed: {}", e),
        }
    }));
    if let Err(e) = Arc::clone(&engine.scheduler).start() {
        warn!("Scheduler failed to start: {}", e);
    }

    let server = VesperServer::new(Arc::clone(&engine));
    let transport = StdioTransport::new();

    info!(
        schedule = format!(
            "{:02}:{:02}",
            engine.config.schedule_hour, engine.config.schedule_minute
        ),
        "Serving on stdio"
    );

    if let Err(e) = transport.run(server).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    engine.scheduler.stop();
    info!("Vesper MCP Server shutting down");
}

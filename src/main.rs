//! postrpc — JSON-RPC over a handshake stream between two in-process peers.
//!
//! A "host" and a "frame" endpoint share one message hub. Each side wraps its
//! endpoint in a handshake stream and a multiplexer; the frame serves a demo
//! engine on the `rpc` substream and the host forwards every call it reads
//! from stdin over that substream, printing responses to stdout.
//!
//! Usage:
//!   postrpc                                   # Structural engine on the frame
//!   postrpc --legacy                          # Callback engine on the frame
//!   postrpc --log-traffic --verbose           # Log every handshake packet
//!   echo '{"jsonrpc":"2.0","id":1,"method":"ping"}' | postrpc

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use postrpc_engine::legacy::{BoxedLegacyMiddleware, SharedRequest, SharedResponse, ScaffoldEntry, id_remap, scaffold};
use postrpc_engine::{Flow, JsonRpcEngine, JsonRpcServer, LegacyEngine, Scaffold, from_fn, legacy_as_v2};
use postrpc_protocol::{Call, Fault, RpcError};
use postrpc_transport::{HandshakeStream, MessageHub, Multiplexer, StreamConfig, StreamMiddleware, serve_engine};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const RPC_SUBSTREAM: &str = "rpc";

#[derive(Parser, Debug)]
#[command(name = "postrpc", about = "JSON-RPC over a handshake-multiplexed message channel")]
struct Cli {
    /// Channel name; the two streams are `<channel>:host` and `<channel>:frame`
    #[arg(long, default_value = "postrpc")]
    channel: String,

    /// Origin of the host endpoint
    #[arg(long, default_value = "https://host.local")]
    host_origin: String,

    /// Origin of the frame endpoint
    #[arg(long, default_value = "https://frame.local")]
    frame_origin: String,

    /// Serve the frame with the callback-style engine
    #[arg(long)]
    legacy: bool,

    /// Log every handshake packet at debug level
    #[arg(long)]
    log_traffic: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));

    match &cli.log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        // stdout carries responses, so logs go to stderr.
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

// ── Frame-side engines ──────────────────────────────────────────────────

/// Sum an array of integers.
fn sum_params(req: SharedRequest, res: SharedResponse, flow: Flow) -> Result<(), Fault> {
    let params = req.lock().params.clone();
    let items = params
        .as_ref()
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::invalid_params("sum expects an array of integers"))?;

    let mut total: i64 = 0;
    for item in items {
        let n = item
            .as_i64()
            .ok_or_else(|| RpcError::invalid_params(format!("not an integer: {item}")))?;
        total = total
            .checked_add(n)
            .ok_or_else(|| RpcError::invalid_params("sum overflows"))?;
    }

    res.lock().result = Some(json!(total));
    flow.end();
    Ok(())
}

fn sum_engine() -> LegacyEngine {
    let engine = LegacyEngine::new();
    let sum: BoxedLegacyMiddleware = Arc::new(sum_params);
    engine.push(scaffold([("sum", ScaffoldEntry::Middleware(sum))]));
    engine
}

fn frame_engine() -> anyhow::Result<Arc<JsonRpcEngine>> {
    let engine = JsonRpcEngine::builder()
        .with(
            Scaffold::new()
                .with_result("ping", json!("pong"))
                .with_middleware(
                    "echo",
                    from_fn(|call: Arc<Call>, _context, _next| async move {
                        Ok(Some(call.params().cloned().unwrap_or(Value::Null)))
                    }),
                ),
        )
        .with(legacy_as_v2(&sum_engine()))
        .build()?;
    Ok(Arc::new(engine))
}

/// The same methods behind the callback engine, with the structural engine
/// embedded for everything the legacy stack does not answer itself.
fn legacy_frame_engine() -> anyhow::Result<LegacyEngine> {
    let engine = LegacyEngine::new();
    engine.push(id_remap());
    engine.push(scaffold([("ping", ScaffoldEntry::from(json!("pong")))]));
    engine.push_boxed(frame_engine()?.as_legacy_middleware());
    Ok(engine)
}

// ── Main ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let hub = MessageHub::new();
    let host_name = format!("{}:host", cli.channel);
    let frame_name = format!("{}:frame", cli.channel);

    let host_stream = HandshakeStream::connect(
        hub.endpoint(cli.host_origin.clone()),
        StreamConfig {
            log_traffic: cli.log_traffic,
            ..StreamConfig::new(host_name.clone(), frame_name.clone())
                .with_target_origin(cli.frame_origin.clone())
        },
    );
    let frame_stream = HandshakeStream::connect(
        hub.endpoint(cli.frame_origin.clone()),
        StreamConfig {
            log_traffic: cli.log_traffic,
            ..StreamConfig::new(frame_name, host_name).with_target_origin(cli.host_origin.clone())
        },
    );

    let host_mux = Multiplexer::new(host_stream);
    let frame_mux = Multiplexer::new(frame_stream);

    let frame_rpc = frame_mux.create_stream(RPC_SUBSTREAM)?;
    let serving = if cli.legacy {
        serve_engine(Arc::new(legacy_frame_engine()?), frame_rpc)
    } else {
        serve_engine(Arc::new(JsonRpcServer::new(frame_engine()?)), frame_rpc)
    };

    let (forward, mut notifications) = StreamMiddleware::new(host_mux.create_stream(RPC_SUBSTREAM)?);
    tokio::spawn(async move {
        while let Some(note) = notifications.recv().await {
            info!("Notification from frame: {}", note.method());
        }
    });

    let host = JsonRpcServer::new(Arc::new(JsonRpcEngine::builder().with(forward).build()?));

    host_mux
        .physical()
        .opened()
        .await
        .context("Handshake with the frame failed")?;
    info!(
        "Channel {} open ({} engine on the frame)",
        cli.channel,
        if cli.legacy { "callback" } else { "structural" }
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(response) = host.handle_text(&line).await {
                    stdout.write_all(format!("{response}\n").as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
        }
    }

    host.engine().destroy().await;
    host_mux.end();
    frame_mux.end();
    if let Err(e) = serving.await {
        warn!("Frame server task failed: {e}");
    }
    info!("Channel {} closed", cli.channel);
    Ok(())
}

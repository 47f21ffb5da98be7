//! hync server binary.
//!
//! Owns the WebSocket listener and drives one task per accepted connection.
//! Everything protocol-specific — sessions, shadows, the store, the
//! notification bus — lives in `hync-engine`; this binary only resolves
//! configuration, wires up tracing, and bridges a WebSocket connection's
//! bytes to a session's frame handler.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use hync_engine::{EngineConfig, EngineRuntime};

mod ws;

/// hync collaborative-note sync server.
#[derive(Parser, Debug)]
#[command(name = "hync-server")]
#[command(about = "Differential-synchronization server for the hync note protocol")]
struct Args {
	/// Address the WebSocket listener binds.
	#[arg(long, value_name = "ADDR")]
	listen_addr: Option<SocketAddr>,

	/// Origins accepted on the WebSocket upgrade handshake. May be given more
	/// than once; an empty list accepts any origin.
	#[arg(long = "allowed-origin", value_name = "ORIGIN")]
	allowed_origins: Vec<String>,

	/// Path to an optional TOML configuration file, layered between the
	/// built-in defaults and `HYNC_*` environment overrides.
	#[arg(long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging.
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(
			if args.verbose {
				tracing::Level::DEBUG.into()
			} else {
				tracing::Level::INFO.into()
			},
		))
		.init();

	let mut config = EngineConfig::default();
	if let Some(path) = &args.config {
		config = config
			.with_file_overrides(path)
			.map_err(|e| anyhow::anyhow!("loading config file {}: {e}", path.display()))?;
	}
	config = config.with_env_overrides();
	if let Some(addr) = args.listen_addr {
		config.listen_addr = addr;
	}
	if !args.allowed_origins.is_empty() {
		config.allowed_origins = args.allowed_origins;
	}

	info!(addr = %config.listen_addr, "starting hync-server");
	let runtime = EngineRuntime::new(config);
	ws::serve(runtime).await?;

	Ok(())
}

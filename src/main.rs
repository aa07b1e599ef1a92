//! dispatch-proxy
//!
//! Accepts HTTP connections and forwards each request to one of a pool of
//! backends, picked round-robin (or weighted / least-connections) from the
//! currently healthy set.
//!
//! ```text
//!     Client Request
//!     ───────────▶ net::listener ──▶ http::server ──▶ http::dispatcher
//!                                                          │
//!                                    load_balancer ◀───────┤ select (cursor, health)
//!                                                          │
//!     Client Response                                      ▼
//!     ◀─────────── streamed body ◀──────────────── http::forward ◀──▶ Backend
//!
//!     Cross-cutting: config (+ hot reload), health (passive/active),
//!     resilience (timeouts, retries), observability, admin API, lifecycle
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dispatch_proxy::lifecycle::{self, StartupOptions};

#[derive(Debug, Parser)]
#[command(name = "dispatch-proxy", version, about = "Round-robin reverse-proxy dispatcher")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend URL (scheme://host:port). Repeat to list several; replaces the file's list.
    #[arg(short, long = "backend")]
    backends: Vec<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = StartupOptions {
        config_path: cli.config.clone(),
        port: cli.port,
        backends: cli.backends,
    };

    let config = match lifecycle::prepare_config(&options).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dispatch-proxy: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!(
            "configuration OK: {} backend(s), listening on {}",
            config.backends.len(),
            config.listener.bind_address
        );
        return ExitCode::SUCCESS;
    }

    match lifecycle::run(config, options.config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("dispatch-proxy: {}", e);
            ExitCode::FAILURE
        }
    }
}

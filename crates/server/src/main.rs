// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `vibe80` CLI: start the coding-agent host.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use vibe80_server::{ServerConfig, ServerState};

#[derive(Parser)]
#[command(name = "vibe80", version, about = "Multi-tenant coding-agent host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Data directory for the database, JWT key, and logs.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Storage backend (overrides STORAGE_BACKEND): sqlite or memory.
    #[arg(long)]
    storage_backend: Option<String>,
    /// Seed the codex provider entry on the bootstrap workspace.
    #[arg(long)]
    codex: bool,
    /// Seed the claude provider entry on the bootstrap workspace.
    #[arg(long)]
    claude: bool,
    /// Do not print the local login URL on startup.
    #[arg(long)]
    no_open: bool,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> std::process::ExitCode {
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| dirs::data_local_dir().map(|d| d.join("vibe80")))
        .unwrap_or_else(|| PathBuf::from("./vibe80-data"));
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data dir {}: {e}", data_dir.display());
        return std::process::ExitCode::from(1);
    }

    // Console logging plus a non-blocking file log under the data dir.
    let file_appender = tracing_appender::rolling::never(&data_dir, "vibe80.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let mut config = ServerConfig::from_env(data_dir);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backend) = &args.storage_backend {
        config.storage_backend = backend.clone();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    match runtime.block_on(serve(config, args)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            eprintln!("fatal: {e}");
            std::process::ExitCode::from(1)
        }
    }
}

async fn serve(config: ServerConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let state = ServerState::init(config)?;

    bootstrap_mono(&state, &args).await;

    // Periodic sweep of expired handoff/mono tokens.
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            sweep_state.identity.sweep_expired();
        }
    });

    let router = vibe80_server::http::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "vibe80 listening");

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown_state.graceful_shutdown().await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

/// Mono-user bootstrap: remember the single workspace across restarts and
/// print a ready-to-use login URL carrying a fresh mono token.
async fn bootstrap_mono(state: &Arc<ServerState>, args: &RunArgs) {
    use vibe80_server::env::DeploymentMode;
    if state.config.deployment_mode != DeploymentMode::MonoUser {
        return;
    }

    let marker = state.config.data_dir.join("mono-workspace");
    let workspace_id = match std::fs::read_to_string(&marker) {
        Ok(raw) => vibe80_core::WorkspaceId::parse(raw.trim()).ok(),
        Err(_) => None,
    };
    let workspace_id = match workspace_id {
        Some(id) => Some(id),
        None => {
            let mut providers = vibe80_core::provider::ProviderMap::new();
            if args.codex {
                providers.insert(vibe80_core::ProviderKey::Codex, Default::default());
            }
            if args.claude {
                providers.insert(vibe80_core::ProviderKey::Claude, Default::default());
            }
            match state.workspaces.create_workspace(providers).await {
                Ok(created) => {
                    if let Err(e) = std::fs::write(&marker, created.workspace_id.as_str()) {
                        warn!(error = %e, "failed to persist mono workspace marker");
                    }
                    info!(
                        workspace_id = %created.workspace_id,
                        "mono workspace created; store this secret now: {}",
                        created.workspace_secret
                    );
                    Some(created.workspace_id)
                }
                Err(e) => {
                    warn!(error = %e, "mono workspace bootstrap failed (are the helpers installed?)");
                    None
                }
            }
        }
    };

    if let Some(workspace_id) = workspace_id {
        let token = state.identity.issue_mono(workspace_id, state.config.mono_token_ttl);
        if !args.no_open {
            info!(
                "local login: http://127.0.0.1:{}/?monoToken={}",
                state.config.port, token
            );
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}

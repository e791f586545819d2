//! burrow exit-node agent
//!
//! Connects to the managed control plane, applies its commands to the local
//! exit node and serves the internal API used by the exit node and the
//! reverse-proxy plugin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_agent::audit::AuditBatcher;
use burrow_agent::channel::{ChannelEvent, ChannelOptions, ControlChannelClient};
use burrow_agent::remote::{build_client, log_remote_failure, HybridClient, TokenManager};
use burrow_agent::server::{self, SessionVerifier, VerifierSettings};
use burrow_agent::state::AppState;
use burrow_agent::translator::{CommandTranslator, ExitNodeClient, ProxyConfigManager};
use burrow_core::config::{self, AgentConfig};
use burrow_core::time::current_time_secs;
use burrow_core::types::RemoteConfig;
use burrow_protocol::{message_types, PingPayload, RegisterPayload};

#[derive(Parser)]
#[command(name = "burrow-agent")]
#[command(about = "burrow agent - runs an exit node for a managed control plane")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Remote exit node id issued by the control plane
    #[arg(long, env = "BURROW_ID")]
    id: Option<String>,

    /// Remote exit node secret issued by the control plane
    #[arg(long, env = "BURROW_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Control plane endpoint
    /// Example: https://pangolin.example.com
    #[arg(long, env = "BURROW_ENDPOINT")]
    endpoint: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration before logging so its log level can apply
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let config_result = if config_path.exists() {
        Some(config::load_config::<AgentConfig>(&config_path))
    } else {
        None
    };

    let configured_level = config_result
        .as_ref()
        .and_then(|result| result.as_ref().ok())
        .map(|config| config.app.log_level.clone());
    let log_level = if args.foreground {
        "debug".to_string()
    } else {
        args.log_level
            .clone()
            .or(configured_level)
            .unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(log_level),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("burrow agent {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match config_result {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        }
        None => {
            tracing::info!("No config at {:?}, using defaults", config_path);
            AgentConfig::default()
        }
    };

    // Apply command-line overrides
    if let Some(id) = args.id {
        config.managed.id = Some(id);
    }
    if let Some(secret) = args.secret {
        config.managed.secret = Some(secret);
    }
    if let Some(endpoint) = args.endpoint {
        config.managed.endpoint = endpoint;
    }
    config.validate().context("Invalid configuration")?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Credentials for every control plane call
    let http = build_client(config.managed.request_timeout).context("Failed to create HTTP client")?;
    let tokens = Arc::new(TokenManager::new(http.clone(), &config.managed).context("Missing remote exit node credentials")?);
    let token_task = tokens.start(cancel.clone()).await;

    let hybrid = Arc::new(HybridClient::new(http, config.managed.base_url(), tokens.clone()));

    let remote_config = match hybrid.fetch_remote_config().await {
        Ok(remote_config) => remote_config,
        Err(e) => {
            log_remote_failure("Failed to fetch remote config, the server won't work right", &e);
            RemoteConfig::default()
        }
    };

    // Reverse proxy configuration
    let proxy_config = Arc::new(ProxyConfigManager::new(
        hybrid.clone(),
        config.traefik.dynamic_router_config_path.clone(),
    ));
    let monitor_task = proxy_config.spawn_monitor(config.traefik.monitor_interval, cancel.clone());

    let (audit, audit_task) = AuditBatcher::spawn(hybrid.clone(), hybrid.clone(), &config.audit);

    // Control channel
    let exit_node_http = build_client(config.gerbil.request_timeout).context("Failed to create exit node client")?;
    let exit_node = ExitNodeClient::new(exit_node_http, config.gerbil.reachable_at.clone());
    let translator = Arc::new(CommandTranslator::new(exit_node, proxy_config.clone()));

    let client = ControlChannelClient::new(
        config.managed.base_url(),
        ChannelOptions::from(&config.control_channel),
        tokens.clone(),
    );
    translator.register(&client);

    let register_payload = serde_json::to_value(RegisterPayload {
        remote_exit_node_version: env!("CARGO_PKG_VERSION").to_string(),
    })
    .context("Failed to encode registration")?;
    let register_task = tokio::spawn(register_on_connect(
        client.clone(),
        client.subscribe(),
        register_payload,
        cancel.clone(),
    ));

    client.connect().await.context("Failed to start control channel")?;

    let ping_handle = client.send_message_interval_with(
        message_types::PING,
        config.control_channel.heartbeat_interval,
        || {
            serde_json::to_value(PingPayload {
                timestamp: current_time_secs(),
            })
            .unwrap_or(Value::Null)
        },
    );

    // Internal API
    let settings = VerifierSettings {
        remote: remote_config,
        redirect_endpoint: config
            .managed
            .redirect_endpoint
            .clone()
            .unwrap_or_else(|| config.managed.base_url().to_string()),
        log_failed_attempts: config.app.log_failed_attempts,
    };
    let verifier = Arc::new(SessionVerifier::new(hybrid.clone(), audit.clone(), settings));
    let app = server::router(AppState::new(verifier, hybrid.clone()));

    let listen_address = config.listen_address();
    let listener = tokio::net::TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", listen_address))?;
    let server_task = tokio::spawn(server::serve(listener, app, cancel.clone()));

    cancel.cancelled().await;

    // Shutdown
    ping_handle.cancel().await;
    client.close().await;
    let _ = register_task.await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Internal server error: {}", e),
        Err(e) => tracing::warn!("Internal server task failed: {}", e),
    }

    let _ = monitor_task.await;
    let _ = token_task.await;

    audit.flush().await;
    drop(audit);
    audit_task.abort();

    tracing::info!("burrow agent stopped");
    Ok(())
}

/// Register with the control plane every time the channel comes up
async fn register_on_connect(
    client: ControlChannelClient,
    mut events: broadcast::Receiver<ChannelEvent>,
    payload: Value,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ChannelEvent::Connected) => {
                tracing::info!("Connected to control plane, registering");
                client.send_message(message_types::REGISTER, payload.clone()).await;
            }
            Ok(ChannelEvent::Disconnected) => {
                tracing::warn!("Disconnected from control plane, will reconnect");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Missed {} control channel events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

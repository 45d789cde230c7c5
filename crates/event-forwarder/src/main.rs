//! Forwarder binary entry point.
//!
//! Usage: event-forwarder [--listen <addr>] [--project <id>] [--json-logs]
//!
//! Everything not given on the command line comes from the environment
//! (see `ForwarderConfig::from_env`).

use anyhow::Context;
use clap::Parser;
use event_forwarder::{AppState, CredentialSource, ForwarderConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Relays storefront tracking events to the Retail ingestion API.
#[derive(Parser, Debug)]
#[command(name = "event-forwarder")]
#[command(about = "Validates, enriches and relays storefront tracking events")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "FORWARDER_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Retail project id.
    #[arg(long, env = "RETAIL_PROJECT_ID")]
    project: Option<String>,

    /// Retail catalog id.
    #[arg(long, env = "RETAIL_CATALOG_ID")]
    catalog: Option<String>,

    /// Header carrying the signed-in user id, set by the front proxy.
    #[arg(long, env = "FORWARDER_USER_ID_HEADER")]
    user_id_header: Option<String>,

    /// Number of trusted proxies that append to X-Forwarded-For.
    #[arg(long, env = "FORWARDER_TRUSTED_PROXY_HOPS")]
    trusted_proxy_hops: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines on stdout.
    #[arg(long, env = "FORWARDER_JSON_LOGS")]
    json_logs: bool,

    /// Also append JSON log lines to this file.
    #[arg(long, env = "FORWARDER_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Append JSON log lines to ~/.storefront/logs/event-forwarder.jsonl
    /// unless --log-file names another file.
    #[arg(long, env = "FORWARDER_FILE_LOGS")]
    file_logs: bool,
}

const SERVICE_NAME: &str = "event-forwarder";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_path = args.log_file.clone().or_else(|| {
        args.file_logs
            .then(|| observability::default_log_path(SERVICE_NAME))
            .flatten()
    });

    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: args.log_level.clone(),
        json: args.json_logs,
        log_path,
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    let mut config = ForwarderConfig::from_env()?;

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(project) = args.project {
        config.retail.project_id = project;
    }
    if let Some(catalog) = args.catalog {
        config.retail.catalog_id = catalog;
    }
    if args.user_id_header.is_some() {
        config.user_id_header = args.user_id_header;
    }
    if let Some(hops) = args.trusted_proxy_hops {
        config.trusted_proxy_hops = hops;
    }
    config.validate()?;

    let credential_source = match &config.credentials {
        CredentialSource::MetadataServer { .. } => "metadata-server",
        CredentialSource::Static { .. } => "static",
    };
    info!(
        listen = %config.listen_addr,
        write_url = %config.user_events_write_url(),
        billing_project = %config.retail.billing_project,
        credentials = credential_source,
        user_id_header = ?config.user_id_header,
        trusted_proxy_hops = config.trusted_proxy_hops,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config)?;
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, draining connections...");
    };

    if let Err(e) = event_forwarder::serve(listener, state, shutdown).await {
        error!(error = %e, "Forwarder exited with error");
        return Err(e.into());
    }

    info!("Forwarder stopped");
    Ok(())
}

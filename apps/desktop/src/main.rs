use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ChatBackend, CommandSurface, HttpBackend, InMemoryBackend, InstanceLock, ProfileStore,
    SurfaceConfig,
};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod bridge;
mod config;

use bridge::Bridge;

/// Line-oriented JSON host for the chat command surface. Requests are read
/// from stdin, replies and pushed events are written to stdout.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Settings file; missing files are ignored.
    #[arg(long, default_value = "desktop.toml")]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Use a private in-memory backend and do not persist the profile.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings(&args.config);
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }

    // Held for the life of the process.
    let mut _lock = None;
    let (backend, profiles): (Arc<dyn ChatBackend>, ProfileStore) = if args.offline {
        info!("running offline with an in-memory backend");
        (Arc::new(InMemoryBackend::new()), ProfileStore::ephemeral())
    } else {
        info!(server_url = %settings.server_url, data_dir = %settings.data_dir.display(), "starting desktop host");
        _lock = Some(InstanceLock::acquire(&settings.data_dir)?);
        let backend = HttpBackend::new(settings.server_url.clone(), settings.request_timeout)
            .context("invalid server url")?;
        (Arc::new(backend), ProfileStore::in_dir(&settings.data_dir))
    };

    let surface = CommandSurface::new(
        backend,
        profiles,
        SurfaceConfig {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: settings.request_timeout,
            ..SurfaceConfig::default()
        },
    )
    .await
    .context("failed to load local profile")?;

    if surface.have_account().await {
        match surface.verify_account().await {
            Ok(true) => info!("local account accepted by backend"),
            Ok(false) => warn!("local account is not recognised by the backend"),
            Err(error) => warn!(%error, "could not verify local account"),
        }
    }

    let (bridge, outgoing) = Bridge::new(Arc::new(surface), settings.debounce);
    bridge.start_events().await;
    bridge
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), outgoing)
        .await
}

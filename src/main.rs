use clap::Parser;
use mpv_presence::Config;
use mpv_presence::discord::DiscordIpcSink;
use mpv_presence::event::{self, Dispatcher};
use std::error::Error;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

fn init_logging(cfg: &Config) {
    let default_level = if cfg.debug_log { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut cfg = Config::parse();
    cfg.apply_env();
    init_logging(&cfg);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mpv-presence starting");

    let socket = cfg.socket_path();
    let (connection, mut events) = match mpv_presence::mpv::connect(&socket).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(socket = %socket.display(), error = %e, "could not connect to mpv");
            return Err(e.into());
        }
    };

    let injector = events.injector();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            injector.shutdown();
        }
    });

    let sink = DiscordIpcSink::new(Handle::current());
    let result = tokio::task::spawn_blocking(move || {
        let mut dispatcher = Dispatcher::new(Arc::new(connection), Box::new(sink), &cfg);
        event::listen(&mut events, &mut dispatcher)
    })
    .await?;

    // Print error if any, for better diagnostics
    if let Err(e) = result {
        tracing::error!(error = %e, "stopped");
        return Err(e.into());
    }
    tracing::info!("bye");
    Ok(())
}

use anyhow::Result;
use interviqd::config::load_config;
use interviqd::{CpalMicrophone, DaemonServer, HttpBackend, RodioPlayer, SessionRuntime};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("interviq daemon (interviqd) starting...");

    let config = load_config()?;
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let microphone = Arc::new(CpalMicrophone::new(&config.audio));
    let player = Arc::new(RodioPlayer::new());
    let io_timeout = config.timeouts.socket_operation();

    let (session, _task) = SessionRuntime::spawn(backend, microphone, player, config);

    let server = DaemonServer::new(shared::socket_path(), session.clone(), io_timeout);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            if let Err(e) = session.end().await {
                warn!("No interview to end on shutdown: {}", e);
            }
            session.shutdown().await?;
        }
    }

    Ok(())
}

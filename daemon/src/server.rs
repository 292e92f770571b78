use shared::ipc::{Command, Response};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::state::SessionHandle;

const MAX_COMMAND_LEN: usize = 1024;

pub struct DaemonServer {
    socket_path: PathBuf,
    session: SessionHandle,
    io_timeout: Duration,
}

impl DaemonServer {
    pub fn new(socket_path: PathBuf, session: SessionHandle, io_timeout: Duration) -> Self {
        Self {
            socket_path,
            session,
            io_timeout,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let socket_path = self.socket_path.clone();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        info!("Starting socket server at {}", socket_path.display());

        let listener = UnixListener::bind(&socket_path)?;
        debug!("Listener bound successfully");

        loop {
            debug!("Waiting for connection...");
            let session = self.session.clone();
            let io_timeout = self.io_timeout;
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(session, stream, io_timeout).await
                        {
                            error!("Error handling connection: {}", e);
                        } else {
                            debug!("Connection handled successfully");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        session: SessionHandle,
        mut stream: tokio::net::UnixStream,
        io_timeout: Duration,
    ) -> anyhow::Result<()> {
        let mut buffer = vec![0u8; MAX_COMMAND_LEN];
        let n = timeout(io_timeout, stream.read(&mut buffer))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out reading command"))??;

        if n == 0 {
            return Ok(());
        }

        buffer.truncate(n);

        let command: Command = serde_json::from_slice(&buffer)?;

        info!("Received command: {:?}", command);

        let response = execute(&session, command).await;

        let response_json = serde_json::to_vec(&response)?;
        stream.write_all(&response_json).await?;

        debug!("Sent response: {:?}", response);

        Ok(())
    }
}

/// Runs one control command against the session.
pub async fn execute(session: &SessionHandle, command: Command) -> Response {
    let result = match command {
        Command::Start(interview_id) => session.start(interview_id).await,
        Command::End => session.end().await,
        Command::Mute => session.set_muted(true).await,
        Command::Unmute => session.set_muted(false).await,
        Command::Retry => session.retry().await,
        Command::Status => {
            return match session.status().await {
                Ok(status) => Response::Status(status),
                Err(e) => Response::Error(e.to_string()),
            };
        }
    };

    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

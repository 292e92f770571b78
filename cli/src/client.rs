use shared::ipc::{Command, IpcError, Response};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout for socket operations (5 seconds)
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a daemon reply; the daemon closes the stream after writing.
const MAX_RESPONSE_LEN: u64 = 1024 * 1024;

pub struct DaemonClient {
    socket_path: PathBuf,
    response_timeout: Duration,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: shared::socket_path(),
            response_timeout: SOCKET_TIMEOUT,
        }
    }

    /// Waits up to `response_timeout` for the daemon's answer. Starting an
    /// interview talks to the backend before replying, so it needs longer.
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub async fn send_command(&self, cmd: Command) -> Result<Response, IpcError> {
        // Connect with timeout
        let mut stream = match timeout(SOCKET_TIMEOUT, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Connection timeout: failed to connect to daemon at {} within {:?}",
                    self.socket_path.display(),
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        };

        let command_json = serde_json::to_vec(&cmd)?;

        if timeout(SOCKET_TIMEOUT, stream.write_all(&command_json)).await.is_err() {
            warn!("Write timeout: failed to send command to daemon within {:?}", SOCKET_TIMEOUT);
            return Err(IpcError::Timeout);
        }

        let mut buffer = Vec::new();
        let mut reply = (&mut stream).take(MAX_RESPONSE_LEN);
        match timeout(self.response_timeout, reply.read_to_end(&mut buffer)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Read timeout: failed to receive response from daemon within {:?}",
                    self.response_timeout
                );
                return Err(IpcError::Timeout);
            }
        }

        let response: Response = serde_json::from_slice(&buffer)?;

        Ok(response)
    }
}

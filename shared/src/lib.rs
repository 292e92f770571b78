pub mod ipc;

pub use ipc::{format_elapsed, socket_path, Command, IpcError, Response, SessionStatus};

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod recorder;
pub mod server;
pub mod session;
pub mod state;
pub mod vad;

pub use audio::{CpalMicrophone, EncodedAudio, Microphone, PromptPlayer, RodioPlayer};
pub use backend::{HttpBackend, InterviewBackend};
pub use recorder::{RecordedAnswer, TurnRecorder};
pub use server::DaemonServer;
pub use session::{Effect, InterviewSession, SessionEvent, TurnState};
pub use state::{SessionHandle, SessionRuntime};
pub use vad::{EndOfTurn, SilenceDetector};

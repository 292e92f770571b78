pub mod machine;
pub mod opening;

pub use machine::{
    AiReply, Completion, Effect, FailedStage, InterviewSession, Opening, Prompt, SessionClock,
    SessionEvent, Speaker, Turn, TurnState, MAX_QUESTIONS,
};
pub use opening::{decode_prompt, load_opening};

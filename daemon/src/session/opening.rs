use tracing::{info, warn};

use super::{Opening, Prompt};
use crate::audio::{pcm_to_wav, PcmFormat};
use crate::backend::{AiUtterance, InterviewBackend};
use crate::error::SessionError;

/// Turns backend text and base64 PCM into a prompt. Undecodable audio is
/// dropped so the prompt is skipped rather than failing the turn.
pub fn decode_prompt(utterance: AiUtterance, format: PcmFormat) -> Prompt {
    let audio = utterance
        .audio_base64
        .as_deref()
        .filter(|payload| !payload.trim().is_empty())
        .and_then(|payload| match pcm_to_wav(payload, format) {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("Skipping prompt audio: {}", e);
                None
            }
        });

    Prompt {
        text: utterance.text,
        audio,
    }
}

/// Fetches the conversation so far. An empty conversation gets a fresh
/// opening prompt, otherwise the last AI message is replayed with the
/// stored question count and timer.
pub async fn load_opening<B: InterviewBackend>(
    backend: &B,
    interview_id: &str,
    user_name: &str,
    max_questions: u32,
    format: PcmFormat,
) -> Result<Opening, SessionError> {
    let snapshot = backend.conversation(interview_id).await?;

    if snapshot.messages.is_empty() {
        let details = backend.interview_details(interview_id).await?;
        info!(
            "Starting new interview {} (domain: {}, type: {})",
            interview_id,
            details.domain.as_deref().unwrap_or("unknown"),
            details.interview_type.as_deref().unwrap_or("unknown")
        );
        let first = backend
            .first_prompt(interview_id, &details, user_name)
            .await?;
        return Ok(Opening {
            prompt: decode_prompt(first, format),
            question_count: 0,
            elapsed_seconds: 0,
        });
    }

    let question_count = snapshot.questions_asked();
    if question_count >= max_questions {
        return Err(SessionError::AlreadyCompleted(interview_id.to_string()));
    }

    let prompt = snapshot
        .last_ai_message()
        .map(|message| {
            decode_prompt(
                AiUtterance {
                    text: message.text.clone(),
                    audio_base64: message.audio_base64().map(str::to_string),
                },
                format,
            )
        })
        .unwrap_or_default();

    info!(
        "Resuming interview {} at question {} ({}s elapsed)",
        interview_id, question_count, snapshot.duration_seconds
    );

    Ok(Opening {
        prompt,
        question_count,
        elapsed_seconds: snapshot.duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EncodedAudio;
    use crate::backend::{
        AudioPayload, ConversationMessage, ConversationSnapshot, InterviewDetails, NextQuestion,
    };
    use crate::error::BackendError;
    use crate::session::Completion;
    use base64::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StoredInterview {
        snapshot: ConversationSnapshot,
        first_prompt_calls: AtomicUsize,
    }

    impl StoredInterview {
        fn new(snapshot: ConversationSnapshot) -> Self {
            Self {
                snapshot,
                first_prompt_calls: AtomicUsize::new(0),
            }
        }
    }

    impl InterviewBackend for StoredInterview {
        async fn conversation(&self, _id: &str) -> Result<ConversationSnapshot, BackendError> {
            Ok(self.snapshot.clone())
        }

        async fn interview_details(&self, _id: &str) -> Result<InterviewDetails, BackendError> {
            Ok(InterviewDetails {
                domain: Some("Data".to_string()),
                interview_type: Some("Behavioral".to_string()),
                mode: Some("voice".to_string()),
            })
        }

        async fn first_prompt(
            &self,
            _id: &str,
            _details: &InterviewDetails,
            user_name: &str,
        ) -> Result<AiUtterance, BackendError> {
            self.first_prompt_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AiUtterance {
                text: Some(format!("Hello {}", user_name)),
                audio_base64: Some(pcm_base64(480)),
            })
        }

        async fn submit_answer(&self, _id: &str, _answer: &EncodedAudio) -> Result<(), BackendError> {
            Ok(())
        }

        async fn next_question(&self, _id: &str, _count: u32) -> Result<NextQuestion, BackendError> {
            Ok(NextQuestion::default())
        }

        async fn log_timer(
            &self,
            _id: &str,
            _elapsed: u64,
            _completion: Option<Completion>,
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn pcm_base64(bytes: usize) -> String {
        base64::engine::general_purpose::STANDARD.encode(vec![0u8; bytes])
    }

    fn ai(text: &str, first: bool) -> ConversationMessage {
        ConversationMessage {
            sender: "ai".to_string(),
            is_first_message: first,
            text: Some(text.to_string()),
            text_audio: Some(AudioPayload {
                audio: Some(pcm_base64(96)),
            }),
        }
    }

    fn user() -> ConversationMessage {
        ConversationMessage {
            sender: "user".to_string(),
            ..ConversationMessage::default()
        }
    }

    #[test]
    fn test_decode_prompt_wraps_pcm() {
        let prompt = decode_prompt(
            AiUtterance {
                text: Some("Q".to_string()),
                audio_base64: Some(pcm_base64(48)),
            },
            PcmFormat::BACKEND_SPEECH,
        );
        assert_eq!(prompt.audio.unwrap().len(), 44 + 48);
    }

    #[test]
    fn test_decode_prompt_drops_bad_audio() {
        let prompt = decode_prompt(
            AiUtterance {
                text: Some("Q".to_string()),
                audio_base64: Some("not base64!".to_string()),
            },
            PcmFormat::BACKEND_SPEECH,
        );
        assert_eq!(prompt.text.as_deref(), Some("Q"));
        assert!(prompt.audio.is_none());

        let odd = decode_prompt(
            AiUtterance {
                text: None,
                audio_base64: Some(pcm_base64(3)),
            },
            PcmFormat::BACKEND_SPEECH,
        );
        assert!(odd.audio.is_none());
    }

    #[tokio::test]
    async fn test_fresh_interview_gets_first_prompt() {
        let backend = StoredInterview::new(ConversationSnapshot::default());

        let opening = load_opening(&backend, "iv", "Sam", 10, PcmFormat::BACKEND_SPEECH)
            .await
            .unwrap();

        assert_eq!(backend.first_prompt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(opening.prompt.text.as_deref(), Some("Hello Sam"));
        assert!(opening.prompt.audio.is_some());
        assert_eq!(opening.question_count, 0);
        assert_eq!(opening.elapsed_seconds, 0);
    }

    #[tokio::test]
    async fn test_resume_replays_last_question() {
        let backend = StoredInterview::new(ConversationSnapshot {
            messages: vec![ai("Welcome", true), user(), ai("Q1", false), user(), ai("Q2", false)],
            duration_seconds: 410,
        });

        let opening = load_opening(&backend, "iv", "Sam", 10, PcmFormat::BACKEND_SPEECH)
            .await
            .unwrap();

        assert_eq!(backend.first_prompt_calls.load(Ordering::SeqCst), 0);
        assert_eq!(opening.prompt.text.as_deref(), Some("Q2"));
        assert_eq!(opening.question_count, 2);
        assert_eq!(opening.elapsed_seconds, 410);
    }

    #[tokio::test]
    async fn test_completed_interview_is_refused() {
        let mut messages = vec![ai("Welcome", true)];
        for i in 0..10 {
            messages.push(user());
            messages.push(ai(&format!("Q{}", i), false));
        }
        let backend = StoredInterview::new(ConversationSnapshot {
            messages,
            duration_seconds: 900,
        });

        let result = load_opening(&backend, "done", "Sam", 10, PcmFormat::BACKEND_SPEECH).await;
        assert!(matches!(result, Err(SessionError::AlreadyCompleted(id)) if id == "done"));
    }
}

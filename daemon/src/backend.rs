use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use tracing::{debug, info};

use crate::audio::EncodedAudio;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::session::Completion;

const ANSWER_FILE_NAME: &str = "answer.wav";

/// Base64 PCM attached to an AI message.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AudioPayload {
    #[serde(default)]
    pub audio: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ConversationMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub is_first_message: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_audio: Option<AudioPayload>,
}

impl ConversationMessage {
    pub fn is_ai(&self) -> bool {
        self.sender.eq_ignore_ascii_case("ai")
    }

    pub fn audio_base64(&self) -> Option<&str> {
        self.text_audio.as_ref()?.audio.as_deref()
    }
}

/// What the backend already holds for an interview.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSnapshot {
    pub messages: Vec<ConversationMessage>,
    pub duration_seconds: u64,
}

impl ConversationSnapshot {
    /// AI questions asked so far, not counting the opening greeting.
    pub fn questions_asked(&self) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.is_ai() && !m.is_first_message)
            .count() as u32
    }

    pub fn last_ai_message(&self) -> Option<&ConversationMessage> {
        self.messages.iter().rev().find(|m| m.is_ai())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct InterviewDetails {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub interview_type: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Text plus base64 PCM of one AI utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiUtterance {
    pub text: Option<String>,
    pub audio_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextQuestion {
    pub utterance: AiUtterance,
    pub interview_finished: bool,
}

/// The interview service the turn loop talks to.
pub trait InterviewBackend: Send + Sync + 'static {
    fn conversation(
        &self,
        interview_id: &str,
    ) -> impl Future<Output = Result<ConversationSnapshot, BackendError>> + Send;

    fn interview_details(
        &self,
        interview_id: &str,
    ) -> impl Future<Output = Result<InterviewDetails, BackendError>> + Send;

    fn first_prompt(
        &self,
        interview_id: &str,
        details: &InterviewDetails,
        user_name: &str,
    ) -> impl Future<Output = Result<AiUtterance, BackendError>> + Send;

    fn submit_answer(
        &self,
        interview_id: &str,
        answer: &EncodedAudio,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn next_question(
        &self,
        interview_id: &str,
        question_count: u32,
    ) -> impl Future<Output = Result<NextQuestion, BackendError>> + Send;

    fn log_timer(
        &self,
        interview_id: &str,
        elapsed_seconds: u64,
        completion: Option<Completion>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

fn default_status() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default = "default_status")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationResponse {
    #[serde(default = "default_status")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    interview_conversation: Vec<ConversationMessage>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InterviewResponse {
    #[serde(default = "default_status")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    interview: Option<InterviewDetails>,
}

#[derive(Debug, Deserialize)]
struct FirstPromptResponse {
    #[serde(default = "default_status")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    text_audio: Option<AudioPayload>,
    #[serde(default)]
    interview_conversation: Option<ConversationMessage>,
}

#[derive(Debug, Deserialize)]
struct NextQuestionResponse {
    #[serde(default = "default_status")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    text_audio: Option<AudioPayload>,
    #[serde(default)]
    interview_finished: bool,
}

fn ensure_status(status: bool, message: Option<String>) -> Result<(), BackendError> {
    if status {
        Ok(())
    } else {
        Err(BackendError::Unsuccessful(
            message.unwrap_or_else(|| "request failed".to_string()),
        ))
    }
}

/// Longest error text kept from a response body, in characters.
pub const MAX_ERROR_CHARS: usize = 300;

/// Pulls a readable message out of an error body (`detail` or `message`),
/// truncated to `MAX_ERROR_CHARS`.
pub fn error_message(body: &str) -> String {
    let message = extract_error_message(body);
    match message.char_indices().nth(MAX_ERROR_CHARS) {
        Some((cut, _)) => format!("{}...", &message[..cut]),
        None => message,
    }
}

fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = parsed
        .as_ref()
        .and_then(|v| v.get("detail").or_else(|| v.get("message")));

    match field {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None if body.trim().is_empty() => "empty response".to_string(),
        None => body.trim().to_string(),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Rejected {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Ok(response.json::<T>().await?)
}

/// JSON/multipart client for the interview HTTP API.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("interviqd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!("Interview backend at {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/interview/{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl InterviewBackend for HttpBackend {
    async fn conversation(&self, interview_id: &str) -> Result<ConversationSnapshot, BackendError> {
        let url = self.url(&format!("receive-interview-conversations/{}", interview_id));
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let body: ConversationResponse = read_json(response).await?;
        ensure_status(body.status, body.message)?;

        Ok(ConversationSnapshot {
            messages: body.interview_conversation,
            duration_seconds: body.duration.unwrap_or(0.0).max(0.0) as u64,
        })
    }

    async fn interview_details(&self, interview_id: &str) -> Result<InterviewDetails, BackendError> {
        let url = self.url(&format!("retrieve-interview/{}", interview_id));
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let body: InterviewResponse = read_json(response).await?;
        ensure_status(body.status, body.message)?;

        body.interview.ok_or(BackendError::MissingField("interview"))
    }

    async fn first_prompt(
        &self,
        interview_id: &str,
        details: &InterviewDetails,
        user_name: &str,
    ) -> Result<AiUtterance, BackendError> {
        let url = self.url("receive-first-ai-text");
        debug!("POST {}", url);

        let payload = json!({
            "interview_id": interview_id,
            "domain": details.domain,
            "interview_type": details.interview_type,
            "user_name": user_name,
        });
        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let body: FirstPromptResponse = read_json(response).await?;
        ensure_status(body.status, body.message)?;

        let text = body
            .text
            .or_else(|| body.interview_conversation.and_then(|c| c.text));
        Ok(AiUtterance {
            text,
            audio_base64: body.text_audio.and_then(|a| a.audio),
        })
    }

    async fn submit_answer(
        &self,
        interview_id: &str,
        answer: &EncodedAudio,
    ) -> Result<(), BackendError> {
        let url = self.url(&format!("answer-audio-interview-question/{}", interview_id));
        debug!("POST {} ({} bytes)", url, answer.len());

        let part = Part::bytes(answer.bytes().to_vec())
            .file_name(ANSWER_FILE_NAME)
            .mime_str(answer.mime())?;
        let form = Form::new().part("file", part).text("sender", "user");

        let response = self
            .authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .await?;
        let body: Ack = read_json(response).await?;
        ensure_status(body.status, body.message)
    }

    async fn next_question(
        &self,
        interview_id: &str,
        question_count: u32,
    ) -> Result<NextQuestion, BackendError> {
        let url = self.url(&format!("get-ai-response/{}", interview_id));
        debug!("POST {} (question_count={})", url, question_count);

        let response = self
            .authorized(self.client.post(&url))
            .json(&json!({ "question_count": question_count }))
            .send()
            .await?;
        let body: NextQuestionResponse = read_json(response).await?;
        ensure_status(body.status, body.message)?;

        Ok(NextQuestion {
            utterance: AiUtterance {
                text: body.question,
                audio_base64: body.text_audio.and_then(|a| a.audio),
            },
            interview_finished: body.interview_finished,
        })
    }

    async fn log_timer(
        &self,
        interview_id: &str,
        elapsed_seconds: u64,
        completion: Option<Completion>,
    ) -> Result<(), BackendError> {
        let url = self.url("log-interview-timer");
        debug!("POST {} (timer={})", url, elapsed_seconds);

        let mut payload = json!({
            "interview_id": interview_id,
            "timer": elapsed_seconds,
        });
        if let Some(completion) = completion {
            payload["completion"] = json!(completion.as_str());
        }

        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let body: Ack = read_json(response).await?;
        ensure_status(body.status, body.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers a single HTTP request with `status` and a JSON `body`,
    /// returning the raw request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let n = stream.read(&mut buffer).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (base_url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        if text[..header_end]
            .to_lowercase()
            .contains("transfer-encoding: chunked")
        {
            return text.ends_with("0\r\n\r\n");
        }
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn backend(base_url: String) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url,
            api_token: Some("secret".to_string()),
            ..BackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(error_message(r#"{"detail":"Interview not found"}"#), "Interview not found");
        assert_eq!(error_message(r#"{"message":"bad"}"#), "bad");
        assert_eq!(error_message("gateway down\n"), "gateway down");
        assert_eq!(error_message(""), "empty response");
    }

    #[test]
    fn test_error_message_truncates_long_bodies() {
        let page = format!("<html><body>{}</body></html>", "502 Bad Gateway ".repeat(300));
        let message = error_message(&page);

        assert_eq!(message.chars().count(), MAX_ERROR_CHARS + 3);
        assert!(message.starts_with("<html><body>502 Bad Gateway"));
        assert!(message.ends_with("..."));

        let detail = format!(r#"{{"detail":"{}"}}"#, "é".repeat(1000));
        assert_eq!(error_message(&detail).chars().count(), MAX_ERROR_CHARS + 3);
    }

    #[test]
    fn test_snapshot_counts_questions() {
        let snapshot: ConversationResponse = serde_json::from_str(
            r#"{
                "status": true,
                "duration": 125,
                "interview_conversation": [
                    {"sender": "ai", "is_first_message": true, "text": "Hi"},
                    {"sender": "user", "is_first_message": false},
                    {"sender": "ai", "is_first_message": false, "text": "Q1"},
                    {"sender": "user"},
                    {"sender": "ai", "text": "Q2", "text_audio": {"audio": "AAA="}}
                ]
            }"#,
        )
        .unwrap();
        let snapshot = ConversationSnapshot {
            messages: snapshot.interview_conversation,
            duration_seconds: 125,
        };

        assert_eq!(snapshot.questions_asked(), 2);
        let last = snapshot.last_ai_message().unwrap();
        assert_eq!(last.text.as_deref(), Some("Q2"));
        assert_eq!(last.audio_base64(), Some("AAA="));
    }

    #[tokio::test]
    async fn test_next_question_request_and_parse() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"status":true,"question":"Why Rust?","text_audio":{"audio":"AAAA"},"interview_finished":false}"#,
        )
        .await;

        let next = backend(base_url).next_question("iv-9", 3).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /interview/get-ai-response/iv-9 "));
        assert!(request.contains(r#""question_count":3"#));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
        assert_eq!(next.utterance.text.as_deref(), Some("Why Rust?"));
        assert_eq!(next.utterance.audio_base64.as_deref(), Some("AAAA"));
        assert!(!next.interview_finished);
    }

    #[tokio::test]
    async fn test_submit_answer_is_multipart() {
        let (base_url, server) = serve_once("200 OK", r#"{"status":true}"#).await;

        let answer = EncodedAudio::wav(b"RIFFdata".to_vec());
        backend(base_url).submit_answer("iv-9", &answer).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /interview/answer-audio-interview-question/iv-9 "));
        assert!(request.contains("multipart/form-data"));
        assert!(request.contains(r#"name="file"; filename="answer.wav""#));
        assert!(request.contains("Content-Type: audio/wav"));
        assert!(request.contains(r#"name="sender""#));
    }

    #[tokio::test]
    async fn test_log_timer_marks_incomplete() {
        let (base_url, server) = serve_once("200 OK", r#"{"status":true}"#).await;

        backend(base_url)
            .log_timer("iv-9", 42, Some(Completion::Incomplete))
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert!(request.contains(r#""timer":42"#));
        assert!(request.contains(r#""completion":"incomplete""#));
    }

    #[tokio::test]
    async fn test_log_timer_without_completion() {
        let (base_url, server) = serve_once("200 OK", r#"{"status":true}"#).await;

        backend(base_url).log_timer("iv-9", 600, None).await.unwrap();
        let request = server.await.unwrap();

        assert!(request.contains(r#""timer":600"#));
        assert!(!request.contains("completion"));
    }

    #[tokio::test]
    async fn test_rejected_request_carries_detail() {
        let (base_url, server) =
            serve_once("404 Not Found", r#"{"detail":"Interview not found"}"#).await;

        let err = backend(base_url).conversation("missing").await.unwrap_err();
        server.await.unwrap();

        match err {
            BackendError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Interview not found");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_false_status_is_unsuccessful() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"status":false,"message":"quota exceeded"}"#).await;

        let err = backend(base_url).next_question("iv-9", 0).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, BackendError::Unsuccessful(m) if m == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_first_prompt_reads_conversation_text() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"status":true,"interview_conversation":{"sender":"ai","text":"Welcome, Sam"},"text_audio":{"audio":"AAAA"}}"#,
        )
        .await;

        let details = InterviewDetails {
            domain: Some("Backend".to_string()),
            interview_type: Some("Technical".to_string()),
            mode: Some("voice".to_string()),
        };
        let prompt = backend(base_url)
            .first_prompt("iv-9", &details, "Sam")
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert!(request.contains(r#""domain":"Backend""#));
        assert!(request.contains(r#""user_name":"Sam""#));
        assert_eq!(prompt.text.as_deref(), Some("Welcome, Sam"));
        assert_eq!(prompt.audio_base64.as_deref(), Some("AAAA"));
    }
}

// The recommendation assistant: a remote chat service plus the conversation state that routes
// its replies through the extractor.

use crate::client::{ApiError, ClientConfig, ClientError, HttpTransport};
use crate::recommendation::{parse_reply, AssistantReply, Recommendation};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const ASK_PATH: &str = "ask";
pub const NO_RESPONSE: &str = "No response from server.";
pub const FALLBACK_REPLY: &str = "Error fetching bot response.";

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error(transparent)]
    Transport(#[from] ApiError),

    #[error("Assistant service error: {0}")]
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[async_trait]
pub trait AssistantService: Send + Sync {
    async fn ask(&self, request: ChatRequest) -> Result<String, AssistantError>;
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    response: Option<String>,
    error: Option<String>,
}

// POST {base_url}/ask with {"session_id", "message"}; the service answers {"response"} or {"error"}
pub struct HttpAssistantClient {
    transport: HttpTransport,
}

impl HttpAssistantClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            transport: HttpTransport::new(config)?,
        })
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }
}

#[async_trait]
impl AssistantService for HttpAssistantClient {
    async fn ask(&self, request: ChatRequest) -> Result<String, AssistantError> {
        debug!(session_id = %request.session_id, "asking assistant");
        let body: AskResponse = self.transport.post_json(ASK_PATH, &request).await?;
        match (body.response, body.error) {
            (Some(response), _) => Ok(response),
            (None, Some(error)) => Err(AssistantError::Service(error)),
            (None, None) => Ok(NO_RESPONSE.to_string()),
        }
    }
}

// Replays canned replies in order and remembers what it was asked. Err entries become
// service errors; an exhausted script is a service error too.
#[derive(Debug, Default)]
pub struct ScriptedAssistant {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedAssistant {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AssistantService for ScriptedAssistant {
    async fn ask(&self, request: ChatRequest) -> Result<String, AssistantError> {
        self.requests.lock().push(request);
        let next = self.replies.lock().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(AssistantError::Service(message)),
            None => Err(AssistantError::Service("no scripted reply left".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Speaker {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub text: String,
    // Parsed form of a bot reply; None for user input and for the fallback message
    pub reply: Option<AssistantReply>,
}

impl ChatMessage {
    fn user(text: &str) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.to_string(),
            reply: None,
        }
    }

    fn bot(raw: String) -> Self {
        let reply = parse_reply(&raw);
        Self {
            speaker: Speaker::Bot,
            text: raw,
            reply: Some(reply),
        }
    }

    fn fallback() -> Self {
        Self {
            speaker: Speaker::Bot,
            text: FALLBACK_REPLY.to_string(),
            reply: None,
        }
    }
}

pub struct Conversation {
    session_id: String,
    service: Arc<dyn AssistantService>,
    history: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>, service: Arc<dyn AssistantService>) -> Self {
        Self {
            session_id: session_id.into(),
            service,
            history: Vec::new(),
        }
    }

    pub fn with_random_session(service: Arc<dyn AssistantService>) -> Self {
        Self::new(format!("session-{:016x}", rand::random::<u64>()), service)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    // Returns the bot's answer, or None when the input was blank and nothing was sent
    pub async fn send(&mut self, text: &str) -> Option<&ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.history.push(ChatMessage::user(text));
        let request = ChatRequest {
            session_id: self.session_id.clone(),
            message: text.to_string(),
        };

        let answer = match self.service.ask(request).await {
            Ok(raw) => ChatMessage::bot(raw),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "assistant request failed");
                ChatMessage::fallback()
            }
        };
        self.history.push(answer);
        self.history.last()
    }

    // Most recent structured recommendation in the conversation, if any
    pub fn latest_recommendation(&self) -> Option<&Recommendation> {
        self.history
            .iter()
            .rev()
            .filter_map(|m| m.reply.as_ref())
            .find_map(AssistantReply::recommendation)
    }
}

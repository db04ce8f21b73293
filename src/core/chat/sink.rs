use async_trait::async_trait;

use super::MessageKey;
use crate::core::transform::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Connected,
    Expired,
    Disconnected,
    Unsupported,
}

impl AuthState {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthState::Connected => "connected",
            AuthState::Expired => "expired",
            AuthState::Disconnected => "disconnected",
            AuthState::Unsupported => "unsupported",
        }
    }
}

/// Consulted before any job is started or resumed.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn auth_state(&self) -> AuthState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    TransformationObjective,
    ProjectSelection,
    JavaHome,
    DependencyVersion,
    ReviewPatch,
}

/// A question for the user. Answers come back as chat events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub message: String,
    pub options: Vec<String>,
}

impl Prompt {
    pub fn new(kind: PromptKind, message: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            options,
        }
    }
}

/// One-way notifications to the chat surface. Nothing is awaited.
pub trait ChatSink: Send + Sync {
    fn send_progress(&self, tab: &str, message: &str);
    fn send_error(&self, tab: &str, key: MessageKey, detail: Option<&str>);
    fn send_prompt(&self, tab: &str, prompt: Prompt);
    fn send_job_finished(&self, tab: &str, status: JobStatus);
}

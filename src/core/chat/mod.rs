//! The conversation around a transformation: typed events in, sink notifications out.

mod controller;
mod events;
mod messages;
mod sink;

pub use controller::{
    ChatController, OBJECTIVE_LANGUAGE_UPGRADE, OBJECTIVE_SQL_CONVERSION, REVIEW_ACCEPT,
    REVIEW_REJECT, parse_objective,
};
pub use events::{ChatEvent, ProjectForm};
pub use messages::MessageKey;
pub use sink::{AuthProvider, AuthState, ChatSink, Prompt, PromptKind};

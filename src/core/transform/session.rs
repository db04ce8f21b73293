use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::project::ProjectCandidate;
use crate::core::transform::TransformationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    WaitingForTransformationObjective,
    Compiling,
    PromptJavaHome,
    JobSubmitted,
    WaitingForHilInput,
}

impl ConversationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::WaitingForTransformationObjective => {
                "waiting_for_transformation_objective"
            }
            ConversationState::Compiling => "compiling",
            ConversationState::PromptJavaHome => "prompt_java_home",
            ConversationState::JobSubmitted => "job_submitted",
            ConversationState::WaitingForHilInput => "waiting_for_hil_input",
        }
    }

    /// States in which the pipeline is already running and must not be restarted.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ConversationState::Compiling
                | ConversationState::JobSubmitted
                | ConversationState::WaitingForHilInput
        )
    }
}

pub fn can_transition(from: ConversationState, to: ConversationState) -> bool {
    if from == to {
        return true;
    }
    // Starting over is always allowed.
    if to == ConversationState::Idle {
        return true;
    }
    match from {
        ConversationState::Idle => matches!(
            to,
            ConversationState::WaitingForTransformationObjective
                | ConversationState::Compiling
                | ConversationState::JobSubmitted
        ),
        ConversationState::WaitingForTransformationObjective => {
            matches!(to, ConversationState::Compiling)
        }
        ConversationState::Compiling => matches!(
            to,
            ConversationState::JobSubmitted | ConversationState::PromptJavaHome
        ),
        ConversationState::PromptJavaHome => matches!(to, ConversationState::Compiling),
        ConversationState::JobSubmitted => matches!(to, ConversationState::WaitingForHilInput),
        ConversationState::WaitingForHilInput => matches!(to, ConversationState::JobSubmitted),
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("conversation cannot move from {} to {}", from.as_str(), to.as_str())]
pub struct InvalidTransition {
    pub from: ConversationState,
    pub to: ConversationState,
}

/// Per-tab conversation state.
#[derive(Debug, Clone)]
pub struct SessionState {
    conversation_state: ConversationState,
    pub is_authenticating: bool,
    candidate_projects: Vec<ProjectCandidate>,
    pending_objective: Option<TransformationType>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            conversation_state: ConversationState::Idle,
            is_authenticating: false,
            candidate_projects: Vec::new(),
            pending_objective: None,
        }
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.conversation_state
    }

    pub fn transition(&mut self, to: ConversationState) -> Result<(), InvalidTransition> {
        let from = self.conversation_state;
        if !can_transition(from, to) {
            return Err(InvalidTransition { from, to });
        }
        if from != to {
            debug!("Conversation {} -> {}", from.as_str(), to.as_str());
        }
        self.conversation_state = to;
        if to == ConversationState::Idle {
            self.pending_objective = None;
        }
        Ok(())
    }

    /// Drop back to idle and forget the previous scan.
    pub fn reset(&mut self) {
        self.conversation_state = ConversationState::Idle;
        self.candidate_projects.clear();
        self.pending_objective = None;
    }

    pub fn set_candidates(&mut self, candidates: Vec<ProjectCandidate>) {
        self.candidate_projects = candidates;
    }

    /// Candidates in display order.
    pub fn candidates(&self) -> &[ProjectCandidate] {
        &self.candidate_projects
    }

    pub fn candidate(&self, path: &Path) -> Option<&ProjectCandidate> {
        self.candidate_projects.iter().find(|c| c.path == path)
    }

    pub fn pending_objective(&self) -> Option<TransformationType> {
        self.pending_objective
    }

    pub fn set_pending_objective(&mut self, objective: TransformationType) {
        self.pending_objective = Some(objective);
    }
}

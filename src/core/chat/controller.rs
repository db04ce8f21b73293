use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AuthProvider, AuthState, ChatEvent, ChatSink, MessageKey, ProjectForm, Prompt, PromptKind,
};
use crate::core::build::BuildError;
use crate::core::diff::{PatchFileNode, PatchReview, ReviewState};
use crate::core::hil::{HilError, HilSession};
use crate::core::orchestrator::{
    JobArtifacts, JobError, JobObserver, ResultError, SubmitError, TransformationOrchestrator,
};
use crate::core::project::sql::read_sct_metadata;
use crate::core::project::validate_open_projects;
use crate::core::transform::{
    ConversationState, DatabaseTarget, JdkVersion, JobSetup, JobStatus, RemoteJobStatus,
    SessionState, TransformationType,
};

pub const OBJECTIVE_LANGUAGE_UPGRADE: &str = "Language upgrade";
pub const OBJECTIVE_SQL_CONVERSION: &str = "SQL conversion";
pub const REVIEW_ACCEPT: &str = "Accept";
pub const REVIEW_REJECT: &str = "Reject";

/// Map a typed reply to the objective prompt.
pub fn parse_objective(text: &str) -> Option<TransformationType> {
    let text = text.trim().to_lowercase();
    if text.contains("sql") {
        Some(TransformationType::SqlConversion)
    } else if ["upgrade", "java", "language"].iter().any(|w| text.contains(w)) {
        Some(TransformationType::LanguageUpgrade)
    } else {
        None
    }
}

/// Forwards poll-loop progress into the tab that owns the job.
struct SinkObserver {
    sink: Arc<dyn ChatSink>,
    tab: String,
}

impl JobObserver for SinkObserver {
    fn status_changed(&self, remote: RemoteJobStatus, local: JobStatus) {
        self.sink.send_progress(
            &self.tab,
            &format!("Transformation status: {} ({})", local.as_str(), remote.as_str()),
        );
    }

    fn plan_ready(&self, markdown: &str) {
        self.sink.send_progress(&self.tab, markdown);
    }
}

/// Routes chat events to the transformation pipeline, one event at a time.
///
/// Long-running steps run on spawned tasks that report back through the event
/// channel. Each job attempt gets a run number; results from an abandoned run are
/// discarded.
pub struct ChatController {
    orchestrator: Arc<TransformationOrchestrator>,
    auth: Arc<dyn AuthProvider>,
    sink: Arc<dyn ChatSink>,
    events: mpsc::UnboundedSender<ChatEvent>,
    sql_enabled: bool,
    sessions: HashMap<String, SessionState>,
    active_tab: Option<String>,
    cancel: CancellationToken,
    run: u64,
    hil: Option<HilSession>,
    review: Option<(String, PatchReview)>,
}

impl ChatController {
    pub fn new(
        orchestrator: Arc<TransformationOrchestrator>,
        auth: Arc<dyn AuthProvider>,
        sink: Arc<dyn ChatSink>,
        events: mpsc::UnboundedSender<ChatEvent>,
        sql_enabled: bool,
    ) -> Self {
        Self {
            orchestrator,
            auth,
            sink,
            events,
            sql_enabled,
            sessions: HashMap::new(),
            active_tab: None,
            cancel: CancellationToken::new(),
            run: 0,
            hil: None,
            review: None,
        }
    }

    pub fn session(&self, tab: &str) -> Option<&SessionState> {
        self.sessions.get(tab)
    }

    /// The tab whose job is in flight, if any.
    pub fn active_tab(&self) -> Option<&str> {
        self.active_tab.as_deref()
    }

    /// No job in flight and nothing left to review.
    pub fn is_settled(&self) -> bool {
        self.active_tab.is_none() && self.review.is_none()
    }

    pub fn review(&self) -> Option<&PatchReview> {
        self.review.as_ref().map(|(_, r)| r)
    }

    pub async fn handle(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::TransformRequested { tab, folders } => self.start(tab, folders).await,
            ChatEvent::StartNew { tab, folders } => self.start_new(tab, folders).await,
            ChatEvent::ObjectiveSelected { tab, objective } => {
                self.objective_selected(&tab, objective)
            }
            ChatEvent::FreeText { tab, text } => self.free_text(&tab, &text).await,
            ChatEvent::ProjectConfirmed { tab, form } => self.project_confirmed(&tab, form).await,
            ChatEvent::JavaHomeProvided { tab, path } => self.java_home_provided(&tab, path).await,
            ChatEvent::HilVersionSelected { tab, version } => {
                self.hil_version_selected(&tab, version).await
            }
            ChatEvent::HilCancelled { tab } => self.hil_cancelled(&tab).await,
            ChatEvent::StopRequested { tab } => self.stop_requested(&tab).await,
            ChatEvent::PatchAccepted { tab } => self.review_decision(&tab, true).await,
            ChatEvent::PatchRejected { tab } => self.review_decision(&tab, false).await,
            ChatEvent::FileRejected { tab, path } => self.file_rejected(&tab, &path),
            ChatEvent::TabClosed { tab } => self.tab_closed(&tab).await,

            ChatEvent::SubmissionFinished { run, result } => {
                if self.is_current(run) {
                    self.submission_finished(result).await;
                } else if let Ok(job_id) = result {
                    // The user gave up on this run while it was starting.
                    self.stop_orphaned_job(job_id);
                }
            }
            ChatEvent::PollFinished { run, result } => {
                if self.is_current(run) {
                    self.poll_finished(result).await;
                }
            }
            ChatEvent::HilPrepared { run, result } => {
                if self.is_current(run) {
                    self.hil_prepared(result).await;
                } else if let Ok(session) = result {
                    session.cancel();
                }
            }
            ChatEvent::HilFinished { run, result } => {
                if self.is_current(run) {
                    self.hil_finished(result).await;
                }
            }
            ChatEvent::ResultsReady { run, result } => {
                if self.is_current(run) {
                    self.results_ready(result).await;
                }
            }
        }
    }

    fn is_current(&self, run: u64) -> bool {
        if run != self.run || self.active_tab.is_none() {
            debug!("Discarding result of run {} (current {})", run, self.run);
            return false;
        }
        true
    }

    fn session_mut(&mut self, tab: &str) -> &mut SessionState {
        self.sessions.entry(tab.to_string()).or_default()
    }

    fn state(&self, tab: &str) -> ConversationState {
        self.sessions
            .get(tab)
            .map(SessionState::conversation_state)
            .unwrap_or(ConversationState::Idle)
    }

    fn transition(&mut self, tab: &str, to: ConversationState) {
        if let Err(e) = self.session_mut(tab).transition(to) {
            warn!("{}; resetting tab {}", e, tab);
            self.session_mut(tab).reset();
        }
    }

    fn error(&self, tab: &str, key: MessageKey) {
        self.sink.send_error(tab, key, None);
    }

    async fn is_authenticated(&mut self, tab: &str) -> bool {
        let auth = self.auth.auth_state().await;
        let session = self.session_mut(tab);
        session.is_authenticating = auth != AuthState::Connected;
        if auth != AuthState::Connected {
            info!("Transformation deferred: auth is {}", auth.as_str());
            self.sink
                .send_error(tab, MessageKey::AuthRequired, Some(auth.as_str()));
            return false;
        }
        true
    }

    // Start flow

    async fn start(&mut self, tab: String, folders: Vec<PathBuf>) {
        if self.state(&tab).is_busy() {
            self.render_progress(&tab).await;
            return;
        }
        if let Some(active) = &self.active_tab {
            if *active != tab {
                self.error(&tab, MessageKey::JobAlreadyInProgress);
                return;
            }
            // Same tab, parked on a java home prompt: start over.
            self.end_run(&tab);
        }
        if !self.is_authenticated(&tab).await {
            return;
        }

        let candidates = match validate_open_projects(
            &folders,
            self.orchestrator.runner().as_ref(),
            None,
            &CancellationToken::new(),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                info!("No transformable project: {}", e);
                self.error(&tab, (&e).into());
                self.session_mut(&tab).reset();
                return;
            }
        };

        let sql_enabled = self.sql_enabled;
        let session = self.session_mut(&tab);
        session.reset();
        session.set_candidates(candidates);
        if sql_enabled {
            self.transition(&tab, ConversationState::WaitingForTransformationObjective);
            self.prompt_objective(&tab);
        } else {
            self.session_mut(&tab)
                .set_pending_objective(TransformationType::LanguageUpgrade);
            self.prompt_project(&tab);
        }
    }

    async fn start_new(&mut self, tab: String, folders: Vec<PathBuf>) {
        if self.active_tab.as_deref() == Some(tab.as_str()) {
            self.abandon(&tab).await;
        }
        if self.review.as_ref().is_some_and(|(t, _)| *t == tab) {
            info!("Dropping unfinished review in tab {}", tab);
            self.review = None;
        }
        self.session_mut(&tab).reset();
        self.start(tab, folders).await;
    }

    fn prompt_objective(&self, tab: &str) {
        self.sink.send_prompt(
            tab,
            Prompt::new(
                PromptKind::TransformationObjective,
                "What would you like to do?",
                vec![
                    OBJECTIVE_LANGUAGE_UPGRADE.to_string(),
                    OBJECTIVE_SQL_CONVERSION.to_string(),
                ],
            ),
        );
    }

    fn prompt_project(&self, tab: &str) {
        let Some(session) = self.sessions.get(tab) else {
            return;
        };
        let message = match session.pending_objective() {
            Some(TransformationType::SqlConversion) => {
                "Choose the project and the schema conversion metadata file."
            }
            _ => "Choose the project to upgrade and confirm its Java versions.",
        };
        let options = session
            .candidates()
            .iter()
            .map(|c| {
                format!(
                    "{} ({})",
                    c.path.display(),
                    c.detected_jdk.map(|j| j.as_str()).unwrap_or("unknown JDK")
                )
            })
            .collect();
        self.sink
            .send_prompt(tab, Prompt::new(PromptKind::ProjectSelection, message, options));
    }

    fn objective_selected(&mut self, tab: &str, objective: TransformationType) {
        if self.state(tab) != ConversationState::WaitingForTransformationObjective {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        self.session_mut(tab).set_pending_objective(objective);
        self.prompt_project(tab);
    }

    async fn free_text(&mut self, tab: &str, text: &str) {
        match self.state(tab) {
            ConversationState::WaitingForTransformationObjective => match parse_objective(text) {
                Some(objective) => self.objective_selected(tab, objective),
                None => self.prompt_objective(tab),
            },
            ConversationState::PromptJavaHome => {
                self.java_home_provided(tab, PathBuf::from(text.trim())).await
            }
            _ => self.error(tab, MessageKey::UnexpectedInput),
        }
    }

    async fn project_confirmed(&mut self, tab: &str, form: ProjectForm) {
        let objective = match self.sessions.get(tab) {
            Some(s) if !s.conversation_state().is_busy() => s.pending_objective(),
            _ => None,
        };
        let Some(objective) = objective else {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        };
        if self.active_tab.as_deref().is_some_and(|t| t != tab) {
            self.error(tab, MessageKey::JobAlreadyInProgress);
            return;
        }
        if !self.is_authenticated(tab).await {
            return;
        }

        let setup = match self.job_setup(tab, objective, form) {
            Ok(setup) => setup,
            Err(key) => {
                self.error(tab, key);
                return;
            }
        };
        info!(
            "Starting {} of {}",
            setup.transformation_type.as_str(),
            setup.project_name
        );
        self.orchestrator.job().lock().await.begin(setup);
        self.active_tab = Some(tab.to_string());
        self.transition(tab, ConversationState::Compiling);
        self.sink
            .send_progress(tab, "Building the project locally before upload.");
        self.spawn_submit();
    }

    fn job_setup(
        &self,
        tab: &str,
        objective: TransformationType,
        form: ProjectForm,
    ) -> Result<JobSetup, MessageKey> {
        let candidate = self
            .sessions
            .get(tab)
            .and_then(|s| s.candidate(&form.project_path))
            .ok_or(MessageKey::InvalidProjectSelection)?;

        let mut setup = match objective {
            TransformationType::LanguageUpgrade => {
                let source = form
                    .source_jdk
                    .or(candidate.detected_jdk)
                    .filter(|j| j.is_supported_source())
                    .ok_or(MessageKey::UnsupportedSourceJdk)?;
                let target = form.target_jdk.unwrap_or(JdkVersion::Jdk17);
                if !target.is_supported_target() {
                    return Err(MessageKey::UnsupportedTargetJdk);
                }
                JobSetup::language_upgrade(candidate.path.clone(), source, target)
            }
            TransformationType::SqlConversion => {
                let metadata_file = form.sql_metadata.ok_or(MessageKey::NoSqlMetadata)?;
                let metadata = read_sct_metadata(&metadata_file).map_err(|e| MessageKey::from(&e))?;
                let schema = match form.schema {
                    Some(schema) => schema,
                    None => metadata
                        .schemas
                        .iter()
                        .next()
                        .cloned()
                        .ok_or(MessageKey::InvalidSqlMetadata)?,
                };
                if !metadata.schemas.contains(&schema) {
                    warn!("Schema {} is not in {}", schema, metadata_file.display());
                    return Err(MessageKey::InvalidSqlMetadata);
                }
                JobSetup::sql_conversion(
                    candidate.path.clone(),
                    DatabaseTarget {
                        source_vendor: metadata.source_vendor,
                        target_vendor: metadata.target_vendor,
                        server_name: metadata.server_name,
                        schema,
                        metadata_file,
                    },
                )
            }
        };
        setup.custom_build_command = form.custom_build_command;
        setup.custom_dependency_file = form.custom_dependency_file;
        Ok(setup)
    }

    async fn java_home_provided(&mut self, tab: &str, path: PathBuf) {
        if self.state(tab) != ConversationState::PromptJavaHome {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        if !path.is_dir() {
            self.error(tab, MessageKey::InvalidJavaHome);
            self.prompt_java_home(tab);
            return;
        }
        if !self.is_authenticated(tab).await {
            return;
        }
        let updated = match self.orchestrator.job().lock().await.setup_mut() {
            Ok(setup) => {
                setup.java_home = Some(path.clone());
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = updated {
            warn!("Cannot retry build: {}", e);
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        info!("Retrying local build with JAVA_HOME={}", path.display());
        self.transition(tab, ConversationState::Compiling);
        self.sink.send_progress(tab, "Building the project again.");
        self.spawn_submit();
    }

    fn prompt_java_home(&self, tab: &str) {
        self.sink.send_prompt(
            tab,
            Prompt::new(
                PromptKind::JavaHome,
                "Enter the path to a JDK matching the project's Java version.",
                Vec::new(),
            ),
        );
    }

    // Background steps

    /// A fresh run: new cancellation token and run number.
    fn next_run(&mut self) -> u64 {
        self.run += 1;
        self.cancel = CancellationToken::new();
        self.run
    }

    fn spawn_submit(&mut self) {
        let run = self.next_run();
        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = orchestrator.submit(&cancel).await;
            let _ = events.send(ChatEvent::SubmissionFinished { run, result });
        });
    }

    fn spawn_poll(&self, tab: &str) {
        let run = self.run;
        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let observer = SinkObserver {
            sink: self.sink.clone(),
            tab: tab.to_string(),
        };
        tokio::spawn(async move {
            let result = orchestrator.poll(&observer, &cancel).await;
            let _ = events.send(ChatEvent::PollFinished { run, result });
        });
    }

    fn spawn_prepare_hil(&self) {
        let run = self.run;
        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = orchestrator.prepare_dependency_resolution(&cancel).await;
            let _ = events.send(ChatEvent::HilPrepared { run, result });
        });
    }

    fn spawn_download(&self) {
        let run = self.run;
        let orchestrator = self.orchestrator.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = orchestrator.download_results().await;
            let _ = events.send(ChatEvent::ResultsReady { run, result });
        });
    }

    fn stop_orphaned_job(&self, job_id: String) {
        let orchestrator = self.orchestrator.clone();
        let cancel = CancellationToken::new();
        tokio::spawn(async move {
            info!("Stopping job {} started by an abandoned run", job_id);
            if let Err(e) = orchestrator.stop(&job_id, &cancel).await {
                warn!("Could not stop job {}: {}", job_id, e);
            }
        });
    }

    async fn submission_finished(&mut self, result: Result<String, SubmitError>) {
        let Some(tab) = self.active_tab.clone() else {
            return;
        };
        match result {
            Ok(job_id) => {
                self.transition(&tab, ConversationState::JobSubmitted);
                self.sink.send_progress(
                    &tab,
                    &format!("Transformation job {} submitted.", job_id),
                );
                self.spawn_poll(&tab);
            }
            Err(SubmitError::Build(BuildError::JavaHomeMismatch { .. })) => {
                let log = self.orchestrator.job().lock().await.take_build_log();
                if !log.is_empty() {
                    self.sink.send_progress(&tab, &log);
                }
                self.transition(&tab, ConversationState::PromptJavaHome);
                self.error(&tab, MessageKey::JavaHomeMismatch);
                self.prompt_java_home(&tab);
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                let log = self.orchestrator.job().lock().await.take_build_log();
                if !log.is_empty() {
                    self.sink.send_progress(&tab, &log);
                }
                let detail = match &e {
                    SubmitError::Remote(remote) => Some(remote.to_string()),
                    _ => None,
                };
                self.sink.send_error(&tab, (&e).into(), detail.as_deref());
                self.end_run(&tab);
            }
        }
    }

    async fn poll_finished(&mut self, result: Result<RemoteJobStatus, JobError>) {
        let Some(tab) = self.active_tab.clone() else {
            return;
        };
        match result {
            Ok(RemoteJobStatus::Paused) => {
                self.transition(&tab, ConversationState::WaitingForHilInput);
                self.sink.send_progress(
                    &tab,
                    "The transformation is paused until a dependency version is chosen.",
                );
                self.spawn_prepare_hil();
            }
            Ok(status) => {
                info!("Job finished remotely with {}", status.as_str());
                self.sink
                    .send_progress(&tab, "Downloading the proposed changes.");
                self.spawn_download();
            }
            Err(e) => {
                warn!("Polling ended: {}", e);
                let detail = match &e {
                    JobError::Stopped { reason, .. } => reason.clone(),
                    JobError::Remote(remote) => Some(remote.to_string()),
                    JobError::StoppedByCancellation => None,
                };
                self.sink.send_error(&tab, (&e).into(), detail.as_deref());
                self.finish(&tab, None).await;
            }
        }
    }

    // Dependency pause

    async fn hil_prepared(&mut self, result: Result<HilSession, HilError>) {
        let Some(tab) = self.active_tab.clone() else {
            return;
        };
        if self.state(&tab) != ConversationState::WaitingForHilInput {
            debug!("Dependency prompt no longer expected in tab {}", tab);
            if let Ok(session) = result {
                session.cancel();
            }
            return;
        }
        match result {
            Ok(session) => {
                let manifest = session.manifest();
                let message = format!(
                    "Choose a version of {}:{} to use instead of {}.",
                    manifest.pom_group_id, manifest.pom_artifact_id, manifest.source_pom_version
                );
                let options = session.choices().menu();
                self.hil = Some(session);
                self.sink.send_prompt(
                    &tab,
                    Prompt::new(PromptKind::DependencyVersion, message, options),
                );
            }
            Err(e) => {
                warn!("Dependency resolution unavailable: {}", e);
                self.error(&tab, (&e).into());
                self.continue_without_dependency(&tab).await;
            }
        }
    }

    async fn hil_version_selected(&mut self, tab: &str, version: String) {
        if self.state(tab) != ConversationState::WaitingForHilInput || self.hil.is_none() {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        if !self.is_authenticated(tab).await {
            return;
        }
        let Some(session) = self.hil.take() else {
            return;
        };
        self.transition(tab, ConversationState::JobSubmitted);
        self.sink.send_progress(
            tab,
            &format!("Resolving the dependency with version {}.", version),
        );
        let run = self.run;
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = session.submit(&version, &cancel).await;
            let _ = events.send(ChatEvent::HilFinished { run, result });
        });
    }

    async fn hil_finished(&mut self, result: Result<(), HilError>) {
        let Some(tab) = self.active_tab.clone() else {
            return;
        };
        match result {
            Ok(()) => {
                self.sink
                    .send_progress(&tab, "Dependency resolved. The transformation continues.");
                self.spawn_poll(&tab);
            }
            Err(e) => {
                warn!("Dependency resolution failed: {}", e);
                self.error(&tab, (&e).into());
                self.continue_without_dependency(&tab).await;
            }
        }
    }

    async fn hil_cancelled(&mut self, tab: &str) {
        if self.state(tab) != ConversationState::WaitingForHilInput {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        if let Some(session) = self.hil.take() {
            session.cancel();
        }
        // Preparation may still be running; whatever it produces belongs to the old run.
        self.cancel.cancel();
        self.next_run();
        self.continue_without_dependency(tab).await;
    }

    /// Resume the paused job with the dependency left as it was.
    async fn continue_without_dependency(&mut self, tab: &str) {
        if let Err(e) = self.orchestrator.reject_dependency_pause().await {
            warn!("Could not resume job: {}", e);
            self.sink
                .send_error(tab, MessageKey::JobFailed, Some(&e.to_string()));
            self.finish(tab, None).await;
            return;
        }
        self.transition(tab, ConversationState::JobSubmitted);
        self.spawn_poll(tab);
    }

    // Results

    async fn results_ready(&mut self, result: Result<JobArtifacts, ResultError>) {
        let Some(tab) = self.active_tab.clone() else {
            return;
        };
        match result {
            Ok(artifacts) => {
                let project = self
                    .orchestrator
                    .job()
                    .lock()
                    .await
                    .setup()
                    .map(|s| s.project_path.clone());
                self.finish(&tab, Some(&artifacts)).await;
                if let Some(e) = &artifacts.patch_error {
                    self.sink.send_error(&tab, e.into(), None);
                    return;
                }
                let Some(project) = project else {
                    return;
                };
                let review = PatchReview::new(
                    artifacts.patches,
                    &project,
                    self.orchestrator.temp_root(),
                );
                self.review = Some((tab.clone(), review));
                self.show_review().await;
            }
            Err(e) => {
                warn!("Result download failed: {}", e);
                self.sink
                    .send_error(&tab, (&e).into(), Some(&e.to_string()));
                self.finish(&tab, None).await;
            }
        }
    }

    /// Run one step of the review on the blocking pool. Parsing and saving
    /// patches touch the whole workspace.
    async fn with_review<T: Send + 'static>(
        &mut self,
        step: impl FnOnce(&mut PatchReview) -> T + Send + 'static,
    ) -> Option<(String, T)> {
        let (tab, mut review) = self.review.take()?;
        match tokio::task::spawn_blocking(move || {
            let out = step(&mut review);
            (review, out)
        })
        .await
        {
            Ok((review, out)) => {
                self.review = Some((tab.clone(), review));
                Some((tab, out))
            }
            Err(e) => {
                warn!("Review step in tab {} failed: {}", tab, e);
                self.sink.send_error(&tab, MessageKey::PatchFailed, Some(&e.to_string()));
                None
            }
        }
    }

    async fn show_review(&mut self) {
        let shown = self
            .with_review(|review| {
                if review.is_finished() {
                    return None;
                }
                let index = review.current_index();
                let total = review.len();
                Some(
                    review
                        .show(index)
                        .map(|node| describe_patch(node, index, total))
                        .map_err(|e| (index, e)),
                )
            })
            .await;
        let Some((tab, shown)) = shown else {
            return;
        };
        match shown {
            None => {
                self.sink
                    .send_progress(&tab, "All proposed changes have been reviewed.");
                self.review = None;
            }
            Some(Ok(text)) => {
                self.sink.send_progress(&tab, &text);
                self.sink.send_prompt(
                    &tab,
                    Prompt::new(
                        PromptKind::ReviewPatch,
                        "Apply these changes to the project?",
                        vec![REVIEW_ACCEPT.to_string(), REVIEW_REJECT.to_string()],
                    ),
                );
            }
            Some(Err((index, e))) => {
                warn!("Cannot show patch {}: {}", index, e);
                self.sink.send_error(&tab, (&e).into(), None);
                self.review = None;
            }
        }
    }

    async fn review_decision(&mut self, tab: &str, accept: bool) {
        if !self.review.as_ref().is_some_and(|(t, _)| t == tab) {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        }
        let decided = self
            .with_review(move |review| {
                if accept {
                    review.accept_current().map(Some)
                } else {
                    review.reject_current().map(|()| None)
                }
            })
            .await;
        let Some((tab, decided)) = decided else {
            return;
        };
        let sink = self.sink.clone();
        match decided {
            Ok(Some(report)) => {
                sink.send_progress(
                    &tab,
                    &format!(
                        "Applied changes: {} written, {} removed.",
                        report.written.len(),
                        report.removed.len()
                    ),
                );
                if !report.failed.is_empty() {
                    let failed = report
                        .failed
                        .iter()
                        .map(|(path, e)| format!("{}: {}", path.display(), e))
                        .collect::<Vec<_>>()
                        .join("\n");
                    sink.send_error(&tab, MessageKey::PatchFailed, Some(&failed));
                }
            }
            Ok(None) => sink.send_progress(&tab, "Changes discarded."),
            Err(e) => sink.send_error(&tab, (&e).into(), None),
        }
        self.show_review().await;
    }

    fn file_rejected(&mut self, tab: &str, path: &Path) {
        let sink = self.sink.clone();
        let Some((_, review)) = self.review.as_mut().filter(|(t, _)| t == tab) else {
            self.error(tab, MessageKey::UnexpectedInput);
            return;
        };
        if review.model_mut().set_review(path, ReviewState::Rejected) {
            sink.send_progress(tab, &format!("{} will be left unchanged.", path.display()));
        } else {
            sink.send_error(
                tab,
                MessageKey::UnexpectedInput,
                Some(&path.display().to_string()),
            );
        }
    }

    // Stopping

    async fn stop_requested(&mut self, tab: &str) {
        let stoppable = matches!(
            self.state(tab),
            ConversationState::Compiling
                | ConversationState::PromptJavaHome
                | ConversationState::JobSubmitted
                | ConversationState::WaitingForHilInput
        );
        if self.active_tab.as_deref() != Some(tab) || !stoppable {
            self.error(tab, MessageKey::NoJobRunning);
            return;
        }
        self.abandon(tab).await;
    }

    /// Cancel whatever the run is doing, stop the remote job, and settle the tab.
    async fn abandon(&mut self, tab: &str) {
        self.cancel.cancel();
        let (job_id, running) = {
            let job = self.orchestrator.job().lock().await;
            (job.job_id().to_string(), job.is_running())
        };
        if running {
            info!("Stopping job {}", job_id);
            if let Err(e) = self.orchestrator.stop(&job_id, &self.cancel).await {
                warn!("Stop request for {} failed: {}", job_id, e);
                self.sink
                    .send_error(tab, MessageKey::StopFailed, Some(&e.to_string()));
            }
            self.finish(tab, None).await;
        } else {
            self.sink.send_progress(tab, "The transformation was cancelled.");
            self.end_run(tab);
        }
    }

    async fn tab_closed(&mut self, tab: &str) {
        if self.active_tab.as_deref() == Some(tab) {
            self.abandon(tab).await;
        }
        if self.review.as_ref().is_some_and(|(t, _)| t == tab) {
            self.review = None;
        }
        self.sessions.remove(tab);
    }

    /// Record the outcome, tell the tab, and go back to idle.
    async fn finish(&mut self, tab: &str, artifacts: Option<&JobArtifacts>) {
        self.orchestrator.record_outcome(artifacts).await;
        let status = self.orchestrator.job().lock().await.status();
        info!("Job finished in tab {} with {}", tab, status.as_str());
        self.sink.send_job_finished(tab, status);
        self.end_run(tab);
    }

    fn end_run(&mut self, tab: &str) {
        if let Some(session) = self.hil.take() {
            session.cancel();
        }
        self.session_mut(tab).reset();
        self.active_tab = None;
        self.run += 1;
    }

    async fn render_progress(&self, tab: &str) {
        let state = self.state(tab);
        let message = if state == ConversationState::Compiling {
            "The project is being built locally.".to_string()
        } else {
            let job = self.orchestrator.job().lock().await;
            format!(
                "Transformation {} is {}.",
                job.job_id(),
                job.status().as_str()
            )
        };
        self.sink.send_progress(tab, &message);
        if state == ConversationState::WaitingForHilInput
            && let Some(session) = &self.hil
        {
            self.sink.send_prompt(
                tab,
                Prompt::new(
                    PromptKind::DependencyVersion,
                    format!(
                        "Choose a version of {}.",
                        session.manifest().pom_artifact_id
                    ),
                    session.choices().menu(),
                ),
            );
        }
    }
}

fn describe_patch(node: &PatchFileNode, index: usize, total: usize) -> String {
    let mut lines = vec![format!("Patch {} of {}: {}", index + 1, total, node.label)];
    for entry in &node.children {
        lines.push(format!(
            "  {} {}",
            entry.node.kind(),
            entry.relative_path.display()
        ));
    }
    lines.join("\n")
}

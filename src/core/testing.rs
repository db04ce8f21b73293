//! In-memory stand-ins for the external collaborators, shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::core::chat::{AuthProvider, AuthState, ChatSink, MessageKey, Prompt};
use crate::core::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use crate::core::remote::{
    ArtifactTransport, ExportContext, JobStatusReport, RemoteError, ResumeAction,
    StartJobRequest, TransformApi, TransformationPlan, UploadContext, UploadDestination,
};
use crate::core::transform::{JobStatus, RemoteJobStatus};

type Handler = Box<dyn Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

pub struct FakeRunner {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new(
        handler: impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command exits 0 with no output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(ok_output("")))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn ok_output(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(spec.clone());
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: spec.program.clone(),
            });
        }
        (self.handler)(spec)
    }
}

/// Scripted remote service. Statuses are served in order; the last one repeats.
pub struct FakeApi {
    statuses: Mutex<VecDeque<RemoteJobStatus>>,
    last_status: Mutex<RemoteJobStatus>,
    plan: Mutex<TransformationPlan>,
    exports: Mutex<HashMap<&'static str, Bytes>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    pub status_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub plan_calls: AtomicUsize,
    pub resumes: Mutex<Vec<(String, ResumeAction)>>,
    pub stops: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<UploadContext>>,
}

impl FakeApi {
    pub fn new(statuses: Vec<RemoteJobStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(RemoteJobStatus::Created),
            plan: Mutex::new(TransformationPlan::default()),
            exports: Mutex::new(HashMap::new()),
            cancel_after: Mutex::new(None),
            status_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            resumes: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn set_plan(&self, plan: TransformationPlan) {
        *self.plan.lock().unwrap() = plan;
    }

    pub fn push_statuses(&self, statuses: &[RemoteJobStatus]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn set_export(&self, context: &ExportContext, archive: Bytes) {
        self.exports
            .lock()
            .unwrap()
            .insert(export_key(context), archive);
    }

    /// Cancel `token` as soon as the `n`th status call has been answered.
    pub fn cancel_after_status_calls(&self, n: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((n, token));
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> Vec<(String, ResumeAction)> {
        self.resumes.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<UploadContext> {
        self.uploads.lock().unwrap().clone()
    }
}

fn export_key(context: &ExportContext) -> &'static str {
    match context {
        ExportContext::ResultArchive => "result",
        ExportContext::ClientInstructions { .. } => "client-instructions",
        ExportContext::DependencyResolution { .. } => "dependency-resolution",
    }
}

#[async_trait]
impl TransformApi for FakeApi {
    async fn create_upload_url(
        &self,
        _checksum: &str,
        context: &UploadContext,
    ) -> Result<UploadDestination, RemoteError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(context.clone());
        Ok(UploadDestination {
            upload_id: format!("upload-{}", uploads.len()),
            upload_url: "http://uploads.invalid/put".to_string(),
            kms_key_arn: None,
            request_headers: HashMap::new(),
        })
    }

    async fn start_job(&self, _request: &StartJobRequest) -> Result<String, RemoteError> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{}", n))
    }

    async fn get_status(&self, _job_id: &str) -> Result<JobStatusReport, RemoteError> {
        let n = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let status = {
            let mut last = self.last_status.lock().unwrap();
            if let Some(next) = self.statuses.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        };
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref()
            && n >= *after
        {
            token.cancel();
        }
        Ok(JobStatusReport {
            status,
            reason: matches!(status, RemoteJobStatus::Failed).then(|| "build failed".to_string()),
        })
    }

    async fn get_plan(&self, _job_id: &str) -> Result<TransformationPlan, RemoteError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.lock().unwrap().clone())
    }

    async fn stop_job(&self, job_id: &str) -> Result<(), RemoteError> {
        self.stops.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn resume_job(&self, job_id: &str, action: ResumeAction) -> Result<(), RemoteError> {
        self.resumes
            .lock()
            .unwrap()
            .push((job_id.to_string(), action));
        Ok(())
    }

    async fn export_archive(
        &self,
        _job_id: &str,
        context: &ExportContext,
    ) -> Result<Bytes, RemoteError> {
        self.exports
            .lock()
            .unwrap()
            .get(export_key(context))
            .cloned()
            .ok_or_else(|| RemoteError::new("ExportResultArchive", "no archive scripted"))
    }
}

/// Answers PUTs from a queue of statuses; records when each one arrived.
pub struct FakeTransport {
    statuses: Mutex<VecDeque<u16>>,
    pub calls: AtomicUsize,
    pub seen_at: Mutex<Vec<tokio::time::Instant>>,
    pub headers: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls: AtomicUsize::new(0),
            seen_at: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactTransport for FakeTransport {
    async fn put(
        &self,
        _url: &str,
        _body: Bytes,
        headers: &[(String, String)],
    ) -> Result<u16, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_at.lock().unwrap().push(tokio::time::Instant::now());
        *self.headers.lock().unwrap() = headers.to_vec();
        Ok(self.statuses.lock().unwrap().pop_front().unwrap_or(200))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Progress(String),
    Error(MessageKey, Option<String>),
    Prompt(Prompt),
    Finished(JobStatus),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, SinkEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn events_for(&self, tab: &str) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == tab)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<MessageKey> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Prompt(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn push(&self, tab: &str, event: SinkEvent) {
        self.events.lock().unwrap().push((tab.to_string(), event));
    }
}

impl ChatSink for RecordingSink {
    fn send_progress(&self, tab: &str, message: &str) {
        self.push(tab, SinkEvent::Progress(message.to_string()));
    }

    fn send_error(&self, tab: &str, key: MessageKey, detail: Option<&str>) {
        self.push(tab, SinkEvent::Error(key, detail.map(str::to_string)));
    }

    fn send_prompt(&self, tab: &str, prompt: Prompt) {
        self.push(tab, SinkEvent::Prompt(prompt));
    }

    fn send_job_finished(&self, tab: &str, status: JobStatus) {
        self.push(tab, SinkEvent::Finished(status));
    }
}

pub struct FixedAuth(pub AuthState);

#[async_trait]
impl AuthProvider for FixedAuth {
    async fn auth_state(&self) -> AuthState {
        self.0
    }
}

/// An in-memory zip with the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Bytes {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

/// A minimal Maven project with one source file and a compiled class.
pub fn write_maven_project(root: &std::path::Path) {
    let files: &[(&str, &[u8])] = &[
        ("pom.xml", b"<project><artifactId>demo</artifactId></project>"),
        ("src/main/java/A.java", b"class A {}"),
        ("target/classes/A.class", &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52]),
    ];
    for (rel, contents) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

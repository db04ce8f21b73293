use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use console::style;
use tokio::sync::mpsc;

use crate::core::chat::{AuthProvider, AuthState, ChatController, ChatEvent, ProjectForm};
use crate::core::config::TransformConfig;
use crate::core::history::JobHistoryStore;
use crate::core::orchestrator::TransformationOrchestrator;
use crate::core::process::TokioProcessRunner;
use crate::core::remote::{HttpArtifactTransport, HttpTransformApi, RemoteJobClient};
use crate::core::terminal::{
    self, CliAnswers, GuideSection, TerminalSink, print_error, print_info, print_status,
    print_success, print_warn,
};
use crate::core::transform::{JdkVersion, JobStatus, TransformationType, shared_job_state};
use crate::platform::{NativePlatform, Platform};

const TOKEN_ENV: &str = "QTRANSFORM_BEARER_TOKEN";
const CLI_TAB: &str = "cli";

fn print_help() {
    GuideSection::new("Transform")
        .command("transform", "Upgrade a Maven project or convert its embedded SQL")
        .print();

    GuideSection::new("History")
        .command("history", "List recent transformation jobs")
        .command("stop <job-id>", "Stop a running job")
        .command("download <job-id>", "Fetch the results of an earlier job again")
        .print();

    GuideSection::new("transform options")
        .text("--project <dir>           Project to transform (required)")
        .text("--source-jdk <8|11>       Source JDK, when it cannot be detected")
        .text("--target-jdk <17>         Target JDK (default: 17)")
        .text("--sql --sct <file>        SQL conversion using schema conversion metadata")
        .text("--schema <name>           Schema to convert (default: the first one)")
        .text("--java-home <dir>         JDK used for the local build")
        .text("--build-command <cmd>     Maven goals to run instead of `clean install`")
        .text("--dependency-file <yaml>  Custom dependency versions")
        .text("--non-interactive         Accept the first choice for every prompt")
        .text("--verbose                 Echo debug logs to the terminal")
        .blank()
        .text(&format!("Authentication is read from {}.", TOKEN_ENV))
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("qtransform").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TransformArgs {
    pub project: Option<PathBuf>,
    pub source_jdk: Option<String>,
    pub target_jdk: Option<String>,
    pub sql: bool,
    pub sct: Option<PathBuf>,
    pub schema: Option<String>,
    pub java_home: Option<PathBuf>,
    pub build_command: Option<String>,
    pub dependency_file: Option<PathBuf>,
    pub non_interactive: bool,
}

pub(crate) fn parse_transform_args(args: &[String], start: usize) -> TransformArgs {
    let mut parsed = TransformArgs::default();
    let mut i = start;
    let value = |i: usize| args.get(i + 1).cloned();
    while i < args.len() {
        let step = match args[i].as_str() {
            "--project" | "-p" => {
                parsed.project = value(i).map(PathBuf::from);
                2
            }
            "--source-jdk" => {
                parsed.source_jdk = value(i);
                2
            }
            "--target-jdk" => {
                parsed.target_jdk = value(i);
                2
            }
            "--sct" => {
                parsed.sct = value(i).map(PathBuf::from);
                2
            }
            "--schema" => {
                parsed.schema = value(i);
                2
            }
            "--java-home" => {
                parsed.java_home = value(i).map(PathBuf::from);
                2
            }
            "--build-command" => {
                parsed.build_command = value(i);
                2
            }
            "--dependency-file" => {
                parsed.dependency_file = value(i).map(PathBuf::from);
                2
            }
            "--sql" => {
                parsed.sql = true;
                1
            }
            "--non-interactive" | "-y" => {
                parsed.non_interactive = true;
                1
            }
            _ => 1,
        };
        i += step;
    }
    parsed
}

/// Parse a JDK flag value such as `8`, `17`, or `JDK11`.
pub(crate) fn parse_jdk(value: &str) -> Option<JdkVersion> {
    JdkVersion::from_name(value)
}

impl TransformArgs {
    fn answers(&self, project: &Path) -> Result<CliAnswers> {
        let jdk = |flag: &str, value: &Option<String>| -> Result<Option<JdkVersion>> {
            match value {
                Some(v) => parse_jdk(v)
                    .map(Some)
                    .ok_or_else(|| anyhow!("{} {} is not a known JDK version", flag, v)),
                None => Ok(None),
            }
        };
        let objective = if self.sql {
            TransformationType::SqlConversion
        } else {
            TransformationType::LanguageUpgrade
        };
        Ok(CliAnswers {
            objective: Some(objective),
            form: ProjectForm {
                project_path: project.to_path_buf(),
                source_jdk: jdk("--source-jdk", &self.source_jdk)?,
                target_jdk: jdk("--target-jdk", &self.target_jdk)?,
                sql_metadata: self.sct.clone(),
                schema: self.schema.clone(),
                custom_build_command: self.build_command.clone(),
                custom_dependency_file: self.dependency_file.clone(),
            },
            java_home: self.java_home.clone(),
        })
    }
}

/// Bearer token from the environment; no token means signed out.
struct EnvAuth;

#[async_trait]
impl AuthProvider for EnvAuth {
    async fn auth_state(&self) -> AuthState {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => AuthState::Connected,
            _ => AuthState::Disconnected,
        }
    }
}

fn build_orchestrator(config: &TransformConfig, data_dir: &Path) -> Result<TransformationOrchestrator> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
    let client = RemoteJobClient::new(
        Arc::new(HttpTransformApi::new(&config.endpoint, timeout, token)?),
        Arc::new(HttpArtifactTransport::new(timeout)?),
        config.upload.retry_policy(),
    );
    Ok(TransformationOrchestrator::new(
        client,
        Arc::new(TokioProcessRunner::new(config.max_process_output_bytes)),
        shared_job_state(),
        config,
        data_dir,
        &std::env::temp_dir(),
    ))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let data_dir = NativePlatform::data_dir();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    crate::logging::init(&data_dir, verbose)?;
    let config = TransformConfig::load(&data_dir).await?;

    let cmd = args.get(1).map(String::as_str).unwrap_or("");
    match cmd {
        "transform" => run_transform(&config, &data_dir, parse_transform_args(&args, 2)).await,
        "history" => show_history(&config, &data_dir),
        "stop" => {
            let Some(job_id) = args.get(2) else {
                print_error("Usage: qtransform stop <job-id>");
                return Ok(());
            };
            stop_job(&config, &data_dir, job_id).await
        }
        "download" => {
            let Some(job_id) = args.get(2) else {
                print_error("Usage: qtransform download <job-id>");
                return Ok(());
            };
            download_job(&config, &data_dir, job_id).await
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}

async fn run_transform(config: &TransformConfig, data_dir: &Path, args: TransformArgs) -> Result<()> {
    let Some(project) = args.project.clone() else {
        print_error("--project is required.");
        print_help();
        return Ok(());
    };
    if args.sql && !config.sql_conversion_enabled {
        print_error("SQL conversion is disabled in transform.toml.");
        return Ok(());
    }
    let answers = args.answers(&project)?;

    let orchestrator = build_orchestrator(config, data_dir)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = Arc::new(TerminalSink::new(
        tx.clone(),
        answers,
        !args.non_interactive,
    ));
    let mut controller = ChatController::new(
        Arc::new(orchestrator),
        Arc::new(EnvAuth),
        sink.clone(),
        tx.clone(),
        config.sql_conversion_enabled,
    );

    terminal::print_step(&format!("Transforming {}", project.display()));
    tx.send(ChatEvent::TransformRequested {
        tab: CLI_TAB.to_string(),
        folders: vec![project],
    })
    .map_err(|_| anyhow!("chat controller is not running"))?;

    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => ChatEvent::StopRequested {
                tab: CLI_TAB.to_string(),
            },
        };
        controller.handle(event).await;
        if controller.is_settled() && sink.pending_prompts() == 0 && rx.is_empty() {
            break;
        }
    }
    Ok(())
}

fn show_history(config: &TransformConfig, data_dir: &Path) -> Result<()> {
    let store = JobHistoryStore::new(data_dir, config.history_window_days, config.history_max_entries);
    let entries = store.read()?;
    if entries.is_empty() {
        print_info("No transformations in the last few weeks.");
        return Ok(());
    }
    let header = format!(
        "{:<17} {:<20} {:<22} {:<16} {}",
        "Started", "Project", "Status", "Duration", "Job"
    );
    println!("{}", style(header).bold());
    for entry in &entries {
        println!(
            "{:<17} {:<20} {:<22} {:<16} {}",
            entry.start_time.format("%Y-%m-%d %H:%M").to_string(),
            entry.project_name,
            entry.status,
            entry.duration,
            entry.job_id
        );
        if entry.is_stale() {
            print_status("Hint", &format!("qtransform download {}", entry.job_id));
        }
    }
    Ok(())
}

async fn stop_job(config: &TransformConfig, data_dir: &Path, job_id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, data_dir)?;
    orchestrator.client().stop_job(job_id).await?;
    let updated = orchestrator
        .history()
        .update(job_id, |e| e.status = JobStatus::Stopped.as_str().to_string())?;
    if !updated {
        print_warn("The job is not in the local history.");
    }
    print_success(&format!("Stop requested for {}.", job_id));
    Ok(())
}

async fn download_job(config: &TransformConfig, data_dir: &Path, job_id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, data_dir)?;
    let artifacts = orchestrator.redownload(job_id).await?;
    print_success(&format!("Results of {} downloaded.", job_id));
    print_status("Artifacts", &artifacts.job_dir.display().to_string());
    if let Some(diff) = &artifacts.diff_patch {
        print_status("Diff", &diff.display().to_string());
    }
    if let Some(summary) = &artifacts.summary {
        print_status("Summary", &summary.display().to_string());
    }
    if let Some(e) = &artifacts.patch_error {
        print_warn(&format!("The proposed changes cannot be shown: {}", e));
    }
    Ok(())
}

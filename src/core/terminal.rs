use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use console::{Emoji, style};
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::chat::{
    ChatEvent, ChatSink, MessageKey, ProjectForm, Prompt, PromptKind, REVIEW_ACCEPT,
};
use crate::core::transform::{JobStatus, TransformationType};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Done.").bold().cyan());
}

/// A titled block of help text.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "  {:<28} {}",
            style(name).green(),
            description
        ));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(self) {
        println!("\n {}", style(self.title).bold().underlined());
        for line in self.lines {
            println!("{}", line);
        }
    }
}

/// Answers given up front on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliAnswers {
    pub objective: Option<TransformationType>,
    pub form: ProjectForm,
    pub java_home: Option<PathBuf>,
}

/// Renders chat output on the terminal and answers prompts from the command line
/// or, when interactive, from the user.
pub struct TerminalSink {
    events: mpsc::UnboundedSender<ChatEvent>,
    answers: Mutex<CliAnswers>,
    interactive: bool,
    pending: Arc<AtomicUsize>,
}

impl TerminalSink {
    pub fn new(
        events: mpsc::UnboundedSender<ChatEvent>,
        answers: CliAnswers,
        interactive: bool,
    ) -> Self {
        Self {
            events,
            answers: Mutex::new(answers),
            interactive,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Prompts still waiting for the user.
    pub fn pending_prompts(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn post(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            warn!("Chat event dropped; the controller has shut down");
        }
    }

    /// Ask on a blocking thread and post whatever `answer` makes of the choice.
    fn select(
        &self,
        prompt: Prompt,
        answer: impl FnOnce(Option<String>) -> ChatEvent + Send + 'static,
    ) {
        let events = self.events.clone();
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || {
            let choice = inquire::Select::new(&prompt.message, prompt.options)
                .prompt()
                .ok();
            let _ = events.send(answer(choice));
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn ask_text(
        &self,
        message: String,
        answer: impl FnOnce(Option<String>) -> ChatEvent + Send + 'static,
    ) {
        let events = self.events.clone();
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || {
            let text = inquire::Text::new(&message).prompt().ok();
            let _ = events.send(answer(text));
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

impl ChatSink for TerminalSink {
    fn send_progress(&self, _tab: &str, message: &str) {
        if message.contains('\n') {
            println!("{}", message);
        } else {
            print_info(message);
        }
    }

    fn send_error(&self, _tab: &str, key: MessageKey, detail: Option<&str>) {
        print_error(key.text());
        if let Some(detail) = detail {
            print_status("Detail", detail);
        }
    }

    fn send_prompt(&self, tab: &str, prompt: Prompt) {
        let tab = tab.to_string();
        match prompt.kind {
            PromptKind::TransformationObjective => {
                let preset = self.answers.lock().ok().and_then(|a| a.objective);
                match preset {
                    Some(objective) => self.post(ChatEvent::ObjectiveSelected { tab, objective }),
                    None if self.interactive => self.select(prompt, move |choice| ChatEvent::FreeText {
                        tab,
                        text: choice.unwrap_or_default(),
                    }),
                    None => {
                        let text = prompt.options.first().cloned().unwrap_or_default();
                        self.post(ChatEvent::FreeText { tab, text });
                    }
                }
            }
            PromptKind::ProjectSelection => {
                for option in &prompt.options {
                    print_status("Project", option);
                }
                let form = self
                    .answers
                    .lock()
                    .map(|a| a.form.clone())
                    .unwrap_or_default();
                self.post(ChatEvent::ProjectConfirmed { tab, form });
            }
            PromptKind::JavaHome => {
                // A preset path is tried once; after that the user is asked.
                let preset = self.answers.lock().ok().and_then(|mut a| a.java_home.take());
                match preset {
                    Some(path) => self.post(ChatEvent::JavaHomeProvided { tab, path }),
                    None if self.interactive => self.ask_text(prompt.message, move |text| match text {
                        Some(text) => ChatEvent::JavaHomeProvided {
                            tab,
                            path: PathBuf::from(text.trim()),
                        },
                        None => ChatEvent::StopRequested { tab },
                    }),
                    None => {
                        print_warn("Pass --java-home to build with a different JDK.");
                        self.post(ChatEvent::StopRequested { tab });
                    }
                }
            }
            PromptKind::DependencyVersion => {
                if self.interactive {
                    self.select(prompt, move |choice| match choice {
                        Some(version) => ChatEvent::HilVersionSelected { tab, version },
                        None => ChatEvent::HilCancelled { tab },
                    });
                } else {
                    match prompt.options.first().cloned() {
                        Some(version) => {
                            print_status("Dependency version", &version);
                            self.post(ChatEvent::HilVersionSelected { tab, version });
                        }
                        None => self.post(ChatEvent::HilCancelled { tab }),
                    }
                }
            }
            PromptKind::ReviewPatch => {
                if self.interactive {
                    self.select(prompt, move |choice| {
                        if choice.as_deref() == Some(REVIEW_ACCEPT) {
                            ChatEvent::PatchAccepted { tab }
                        } else {
                            ChatEvent::PatchRejected { tab }
                        }
                    });
                } else {
                    print_status("Review", REVIEW_ACCEPT);
                    self.post(ChatEvent::PatchAccepted { tab });
                }
            }
        }
    }

    fn send_job_finished(&self, _tab: &str, status: JobStatus) {
        match status {
            JobStatus::Completed => print_success("Transformation completed."),
            JobStatus::PartiallyCompleted => {
                print_warn("Transformation partially completed.")
            }
            other => print_step(&format!("Transformation ended: {}", other.as_str())),
        }
    }
}

use std::error::Error;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

mod config;
mod error;
mod handlers;
mod llm;
mod prompts;
mod state;
mod utils;

use config::{Config, CONFIG};
use handlers::{write_artifacts, Slot, UploadOutcome};
use llm::GeminiImageClient;
use state::{GenerationRecord, InFlight, Outcome, PromptStatus, Studio};
use utils::logging::{init_logging, read_recent_log_lines, APP_LOG};
use utils::timing::ActionTimer;

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;
type Session = Studio<GeminiImageClient>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Upload(PathBuf),
    Background(String),
    BackgroundImage(PathBuf),
    BackgroundClear,
    Clothing(String),
    ClothingImage(PathBuf),
    ClothingClear,
    Action(String),
    Consistency(bool),
    Expressions,
    Add(String),
    Select(String),
    Generate(String),
    Restore,
    Pick(String),
    Download,
    Status,
    Diagnose,
    Help,
    Quit,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Upload(_) => "upload",
            Command::Background(_) => "background",
            Command::BackgroundImage(_) => "background-image",
            Command::BackgroundClear => "background-clear",
            Command::Clothing(_) => "clothing",
            Command::ClothingImage(_) => "clothing-image",
            Command::ClothingClear => "clothing-clear",
            Command::Action(_) => "action",
            Command::Consistency(_) => "consistency",
            Command::Expressions => "expressions",
            Command::Add(_) => "add",
            Command::Select(_) => "select",
            Command::Generate(_) => "generate",
            Command::Restore => "restore",
            Command::Pick(_) => "pick",
            Command::Download => "download",
            Command::Status => "status",
            Command::Diagnose => "diagnose",
            Command::Help => "help",
            Command::Quit => "quit",
        }
    }
}

fn usage() -> &'static str {
    "Commands:
  upload <path>              load the photo to work on (PNG, JPEG, WEBP)
  background <text>          describe a replacement background
  background-image <path>    use a reference image as background
  background-clear           remove background guidance
  clothing <text>            describe replacement clothing
  clothing-image <path>      use a reference image for clothing
  clothing-clear             remove clothing guidance
  action <text>              pose/action to apply (empty to clear)
  consistency on|off         strict identity preservation
  expressions                list expressions and their status
  add <label>                add and select a custom expression
  select <label>             toggle an expression for generation
  generate <label>           generate (or retry) one expression
  restore                    restore the uploaded photo itself
  pick <id|label>            toggle a result for download
  download                   save picked results
  status                     show the session state
  diagnose                   show recent log lines
  quit"
}

fn required_arg(command: &str, rest: &str) -> anyhow::Result<String> {
    let value = rest.trim();
    if value.is_empty() {
        return Err(anyhow!("Missing argument for {command}\n{}", usage()));
    }
    Ok(value.to_string())
}

fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head.to_lowercase().as_str() {
        "upload" => Command::Upload(PathBuf::from(required_arg(head, rest)?)),
        "background" => Command::Background(required_arg(head, rest)?),
        "background-image" => Command::BackgroundImage(PathBuf::from(required_arg(head, rest)?)),
        "background-clear" => Command::BackgroundClear,
        "clothing" => Command::Clothing(required_arg(head, rest)?),
        "clothing-image" => Command::ClothingImage(PathBuf::from(required_arg(head, rest)?)),
        "clothing-clear" => Command::ClothingClear,
        "action" => Command::Action(rest.to_string()),
        "consistency" => match rest.to_lowercase().as_str() {
            "on" | "true" | "yes" => Command::Consistency(true),
            "off" | "false" | "no" => Command::Consistency(false),
            other => return Err(anyhow!("Expected on|off for consistency, got '{other}'")),
        },
        "expressions" | "list" => Command::Expressions,
        "add" => Command::Add(required_arg(head, rest)?),
        "select" => Command::Select(required_arg(head, rest)?),
        "generate" | "retry" => Command::Generate(required_arg(head, rest)?),
        "restore" => Command::Restore,
        "pick" => Command::Pick(required_arg(head, rest)?),
        "download" | "export" => Command::Download,
        "status" => Command::Status,
        "diagnose" => Command::Diagnose,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("Unknown command: {other}\n{}", usage())),
    };
    Ok(Some(command))
}

fn banner(message: impl std::fmt::Display) {
    println!("[error] {message}");
}

fn status_label(status: &PromptStatus) -> String {
    match status {
        PromptStatus::Idle => "idle".to_string(),
        PromptStatus::Generating => "generating...".to_string(),
        PromptStatus::Done => "done".to_string(),
        PromptStatus::Error(message) => format!("error: {message}"),
    }
}

fn report_record(record: &GenerationRecord) {
    match &record.outcome {
        Outcome::Success(image) => println!(
            "[done] {} -> {} ({}, {} bytes)",
            record.prompt,
            record.id,
            image.media_type(),
            image.len()
        ),
        Outcome::Failure(message) => println!("[failed] {}: {}", record.prompt, message),
        Outcome::Pending => println!("[pending] {}", record.prompt),
    }
}

fn print_expressions(studio: &Session) {
    let snapshot = studio.snapshot();
    for row in &snapshot.prompts {
        let marker = if row.selected { "[x]" } else { "[ ]" };
        let custom = if row.custom { " (custom)" } else { "" };
        let status = if row.selected || row.record_id.is_some() {
            format!(" - {}", status_label(&row.status))
        } else {
            String::new()
        };
        let id = row
            .record_id
            .as_deref()
            .map(|id| format!(" [{id}]"))
            .unwrap_or_default();
        println!("{marker} {}{custom}{status}{id}", row.label);
    }
}

fn print_status(studio: &Session) {
    let snapshot = studio.snapshot();
    match &snapshot.source {
        Some(source) => println!(
            "photo: {} ({}, {} bytes{})",
            source.name,
            source.media_type,
            source.bytes,
            if source.restored { ", restored" } else { "" }
        ),
        None => println!("photo: none"),
    }
    println!("background: {}", snapshot.background);
    println!("clothing: {}", snapshot.clothing);
    println!(
        "action: {}",
        if snapshot.action.is_empty() {
            "none"
        } else {
            snapshot.action.as_str()
        }
    );
    println!(
        "consistency: {}",
        if snapshot.consistency_enhanced { "strict" } else { "natural" }
    );
    match &snapshot.in_flight {
        Some(InFlight::Prompt(prompt)) => println!("running: {prompt}"),
        Some(InFlight::Restore) => println!("running: photo restoration"),
        None => println!("running: nothing"),
    }
    for row in snapshot.prompts.iter().filter(|row| row.selected) {
        println!("  {} - {}", row.label, status_label(&row.status));
    }
    println!("picked for download: {}", snapshot.selection.len());
}

fn print_diagnostics() {
    match read_recent_log_lines(&CONFIG.log_dir, &format!("{APP_LOG}.log"), 20) {
        Ok(Some(tail)) => {
            println!("{}:", tail.path.display());
            for line in tail.lines {
                println!("  {line}");
            }
        }
        Ok(None) => println!("No log file found in {}", CONFIG.log_dir.display()),
        Err(err) => banner(format!("Failed to read logs: {err}")),
    }
}

fn report_upload(outcome: UploadOutcome, what: &str) {
    match outcome {
        UploadOutcome::Accepted => println!("{what} loaded."),
        UploadOutcome::Ignored => println!("Ignored: only PNG, JPEG and WEBP images are accepted."),
    }
}

fn set_aux_from_text(studio: &Session, slot: Slot, text: &str) {
    match studio.set_aux_text(slot, text) {
        Ok(()) => println!("{} set.", slot.as_str()),
        Err(err) => banner(err),
    }
}

async fn set_aux_from_file(studio: &Session, slot: Slot, path: &Path) {
    match studio.upload_aux(slot, path).await {
        Ok(outcome) => report_upload(outcome, slot.as_str()),
        Err(err) => banner(err),
    }
}

async fn run_download(studio: &Session) {
    let artifacts = studio.export_selected();
    if artifacts.is_empty() {
        println!("Nothing to download; pick finished results first.");
        return;
    }
    match write_artifacts(&CONFIG.export_dir, &artifacts).await {
        Ok(paths) => {
            for path in paths {
                println!("saved {}", path.display());
            }
        }
        Err(err) => {
            error!("Export failed: {err}");
            banner(format!("Failed to save downloads: {err}"));
        }
    }
}

fn spawn_generation(studio: &Session, label: String) {
    let studio = studio.clone();
    tokio::spawn(async move {
        let timer = ActionTimer::start("generate", Some(&label));
        match studio.request_generation(&label).await {
            Ok(record) => {
                report_record(&record);
                let status = if record.is_success() { "success" } else { "error" };
                timer.finish(status, None);
            }
            Err(err) => {
                banner(&err);
                timer.finish("rejected", Some(err.to_string().as_str()));
            }
        }
    });
}

fn spawn_restore(studio: &Session) {
    let studio = studio.clone();
    tokio::spawn(async move {
        let timer = ActionTimer::start("restore", None);
        match studio.request_restore().await {
            Ok(()) => {
                println!("[done] photo restored; previous results were cleared.");
                timer.finish("success", None);
            }
            Err(err) => {
                banner(&err);
                let status = if err.is_validation() { "rejected" } else { "error" };
                timer.finish(status, Some(err.to_string().as_str()));
            }
        }
    });
}

/// Returns `false` when the session should end.
async fn handle_command(studio: &Session, command: Command) -> bool {
    let name = command.name();
    match command {
        Command::Generate(label) => {
            spawn_generation(studio, label);
            return true;
        }
        Command::Restore => {
            spawn_restore(studio);
            return true;
        }
        Command::Quit => return false,
        command => {
            let timer = ActionTimer::start(name, None);
            run_inline_command(studio, command).await;
            timer.finish("success", None);
        }
    }
    true
}

async fn run_inline_command(studio: &Session, command: Command) {
    match command {
        Command::Upload(path) => match studio.upload_source(&path).await {
            Ok(outcome) => report_upload(outcome, "Photo"),
            Err(err) => banner(err),
        },
        Command::Background(text) => set_aux_from_text(studio, Slot::Background, &text),
        Command::BackgroundImage(path) => set_aux_from_file(studio, Slot::Background, &path).await,
        Command::BackgroundClear => {
            studio.clear_aux(Slot::Background);
            println!("background cleared.");
        }
        Command::Clothing(text) => set_aux_from_text(studio, Slot::Clothing, &text),
        Command::ClothingImage(path) => set_aux_from_file(studio, Slot::Clothing, &path).await,
        Command::ClothingClear => {
            studio.clear_aux(Slot::Clothing);
            println!("clothing cleared.");
        }
        Command::Action(text) => {
            studio.set_action(&text);
            println!("action set.");
        }
        Command::Consistency(enabled) => {
            studio.set_consistency(enabled);
            println!("consistency {}.", if enabled { "on" } else { "off" });
        }
        Command::Expressions => print_expressions(studio),
        Command::Add(label) => match studio.add_custom_prompt(&label) {
            Ok(label) => println!("added and selected \"{label}\"."),
            Err(err) => banner(err),
        },
        Command::Select(label) => match studio.toggle_prompt(&label) {
            Ok(true) => println!("selected \"{label}\"."),
            Ok(false) => println!("unselected \"{label}\"."),
            Err(err) => banner(err),
        },
        Command::Pick(target) => {
            let id = studio
                .record(&target)
                .map(|record| record.id)
                .unwrap_or(target);
            if studio.toggle_selection(&id) {
                println!("picked {id}.");
            } else {
                println!("unpicked {id}.");
            }
        }
        Command::Download => run_download(studio).await,
        Command::Status => print_status(studio),
        Command::Diagnose => print_diagnostics(),
        Command::Help => println!("{}", usage()),
        other @ (Command::Generate(_) | Command::Restore | Command::Quit) => {
            warn!("{} should not run inline", other.name());
        }
    }
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    // Fail before anything else starts when the API credential is missing.
    Config::load()?;
    let _guards = init_logging(&CONFIG.log_dir, &CONFIG.log_level);
    for warning in &CONFIG.warnings {
        warn!("{warning}");
    }

    let generator = GeminiImageClient::from_config(&CONFIG);
    info!(
        model = generator.model(),
        timeout_s = CONFIG.generation_timeout_seconds,
        "Starting meme variant studio"
    );
    let studio = Studio::new(generator, &CONFIG.expressions, CONFIG.generation_timeout());

    println!("{}", usage());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                banner(err);
                continue;
            }
        };
        if !handle_command(&studio, command).await {
            break;
        }
    }

    if let Some(running) = studio.in_flight() {
        warn!("Exiting while {:?} is still running", running);
    }
    info!("Studio session ended");
    Ok(())
}

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer, Registry};

pub const TIMING_TARGET: &str = "studio.timing";

/// File stem of the general log; `diagnose` tails `<APP_LOG>.log`.
pub const APP_LOG: &str = "studio";
const TIMING_LOG: &str = "timing";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking writers flushing until dropped at exit.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct LogTail {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

// Timing events only go to the timing files; HTTP internals stay quiet.
fn general_filter(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn rolling_writer(logs_dir: &Path, file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(logs_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// A plain-text `<stem>.log` and a JSON-lines `<stem>.jsonl`, both rolled daily.
fn file_layers(
    logs_dir: &Path,
    stem: &str,
    filter: Targets,
    guards: &mut Vec<WorkerGuard>,
) -> Vec<BoxedLayer> {
    let text = fmt::layer()
        .with_writer(rolling_writer(logs_dir, &format!("{stem}.log"), guards))
        .with_ansi(false)
        .with_filter(filter.clone())
        .boxed();
    let json = fmt::layer()
        .json()
        .with_writer(rolling_writer(logs_dir, &format!("{stem}.jsonl"), guards))
        .with_filter(filter)
        .boxed();
    vec![text, json]
}

/// Console output goes to stderr so it does not interleave with the
/// front end's replies on stdout.
pub fn init_logging(logs_dir: &Path, log_level: &str) -> LoggingGuards {
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory {}: {err}", logs_dir.display());
    }

    let mut guards = Vec::with_capacity(4);
    let general = general_filter(parse_log_level(log_level));

    let mut layers = file_layers(logs_dir, APP_LOG, general.clone(), &mut guards);
    layers.extend(file_layers(logs_dir, TIMING_LOG, timing_filter(), &mut guards));
    layers.push(
        fmt::layer()
            .with_writer(io::stderr)
            .with_filter(general)
            .boxed(),
    );

    tracing_subscriber::registry().with(layers).init();

    LoggingGuards { _guards: guards }
}

/// Last `max_lines` lines of the most recently modified file in `logs_dir`
/// whose name starts with `base_name` (rolled files carry a date suffix).
pub fn read_recent_log_lines(
    logs_dir: &Path,
    base_name: &str,
    max_lines: usize,
) -> io::Result<Option<LogTail>> {
    if max_lines == 0 {
        return Ok(None);
    }
    match newest_matching_file(logs_dir, base_name)? {
        Some(path) => {
            let lines = last_lines(&path, max_lines)?;
            Ok(Some(LogTail { path, lines }))
        }
        None => Ok(None),
    }
}

fn newest_matching_file(logs_dir: &Path, base_name: &str) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(base_name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(seen, _)| modified > *seen) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn last_lines(path: &Path, max_lines: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut tail = VecDeque::with_capacity(max_lines + 1);
    for line in reader.lines() {
        tail.push_back(line?);
        if tail.len() > max_lines {
            tail.pop_front();
        }
    }
    Ok(tail.into())
}

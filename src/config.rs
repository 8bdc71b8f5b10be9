use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;

pub const DEFAULT_EXPRESSIONS: &[&str] = &[
    "big smile",
    "laughing out loud",
    "crying",
    "angry",
    "surprised",
    "sad",
    "winking",
    "deep in thought",
    "embarrassed",
    "disgusted",
];

/// Blocking threshold sent with every Gemini request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyProfile {
    Permissive,
    Standard,
}

impl SafetyProfile {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "permissive" | "off" | "none" => Some(SafetyProfile::Permissive),
            "standard" => Some(SafetyProfile::Standard),
            _ => None,
        }
    }

    pub const fn threshold(self) -> &'static str {
        match self {
            SafetyProfile::Permissive => "OFF",
            SafetyProfile::Standard => "BLOCK_MEDIUM_AND_ABOVE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub export_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_image_model: String,
    pub gemini_safety: SafetyProfile,
    pub generation_timeout_seconds: u64,
    pub expressions: Vec<String>,
    /// Problems found while loading; logged once logging is up.
    pub warnings: Vec<String>,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_csv(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
    lookup(name)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_with(|name| env::var(name).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its value.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let setting = |name: &str, default: &str| env_string(&lookup, name, default);
        let mut warnings = Vec::new();

        let gemini_api_key = match setting("GEMINI_API_KEY", "") {
            key if !key.is_empty() => key,
            _ => setting("API_KEY", ""),
        };
        if gemini_api_key.is_empty() {
            bail!("GEMINI_API_KEY (or API_KEY) environment variable is required");
        }

        let safety_raw = setting("GEMINI_SAFETY_SETTINGS", "permissive");
        let gemini_safety = SafetyProfile::parse(&safety_raw).unwrap_or_else(|| {
            warnings.push(format!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{safety_raw}'; using permissive."
            ));
            SafetyProfile::Permissive
        });

        let timeout_raw = setting("GENERATION_TIMEOUT_SECONDS", "120");
        let generation_timeout_seconds = match timeout_raw.parse::<u64>() {
            Ok(seconds) => seconds.max(1),
            Err(_) => {
                warnings.push(format!(
                    "GENERATION_TIMEOUT_SECONDS '{timeout_raw}' is not a number; using 120."
                ));
                120
            }
        };

        let mut expressions = env_csv(&lookup, "STUDIO_EXPRESSIONS");
        if expressions.is_empty() {
            expressions = DEFAULT_EXPRESSIONS.iter().map(|label| label.to_string()).collect();
        }

        Ok(Config {
            log_level: setting("LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(setting("LOG_DIR", "logs")),
            export_dir: PathBuf::from(setting("EXPORT_DIR", "exports")),
            gemini_api_key,
            gemini_api_base: setting(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            )
            .trim_end_matches('/')
            .to_string(),
            gemini_image_model: setting("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            gemini_safety,
            generation_timeout_seconds,
            expressions,
            warnings,
        })
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }
}

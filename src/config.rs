//! Service settings and per-prompt generation profiles.
//!
//! Settings are read once at startup from the environment (a `.env` file is
//! loaded first by `main`). Prompt profiles are constants: callers pick a
//! [`PromptKind`](crate::gateway::PromptKind), never its parameters.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3070;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OUTPUT_DIR: &str = "public/pdfs";
pub const DEFAULT_PUBLIC_PREFIX: &str = "/pdfs";
pub const DEFAULT_MAX_FILES: usize = 500;

/// Fixed generation parameters for one prompt kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptProfile {
    pub system: &'static str,
    pub model: &'static str,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

pub const CASE_PROFILE: PromptProfile = PromptProfile {
    system: "Eres un experto en gestión de riesgos de TI y normas ISO.",
    model: "gpt-4",
    temperature: 0.7,
    max_tokens: Some(250),
    json_mode: false,
};

pub const AI_RESPONSE_PROFILE: PromptProfile = PromptProfile {
    system: "Eres un consultor experto en gestión de riesgos de TI.",
    model: "gpt-4",
    temperature: 0.6,
    max_tokens: Some(480),
    json_mode: false,
};

pub const COMPARISON_PROFILE: PromptProfile = PromptProfile {
    system: "Eres un analista experto. Devuelve ÚNICAMENTE un JSON válido con los 5 campos requeridos, usando 'No disponible' si no hay datos.",
    model: "gpt-4-1106-preview",
    temperature: 0.5,
    max_tokens: None,
    json_mode: true,
};

/// Process-wide model overrides. `None` keeps the profile's model.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub case: Option<String>,
    pub ai_response: Option<String>,
    pub comparison: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub models: ModelOverrides,
    pub output_dir: PathBuf,
    pub public_prefix: String,
    /// Retention limit for rendered documents; `None` keeps everything.
    pub max_files: Option<usize>,
    pub escape_html: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        let max_files: usize = parse_or(get("PDF_MAX_FILES"), "PDF_MAX_FILES", DEFAULT_MAX_FILES)?;

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            api_key,
            base_url: get("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(parse_or(
                get("OPENAI_TIMEOUT_SECS"),
                "OPENAI_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            models: ModelOverrides {
                case: get("OPENAI_CASE_MODEL"),
                ai_response: get("OPENAI_RESPONSE_MODEL"),
                comparison: get("OPENAI_COMPARISON_MODEL"),
            },
            output_dir: get("PDF_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            public_prefix: get("PDF_PUBLIC_PREFIX")
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| p.starts_with('/'))
                .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string()),
            max_files: (max_files > 0).then_some(max_files),
            escape_html: parse_or(get("RENDER_ESCAPE_HTML"), "RENDER_ESCAPE_HTML", true)?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, value)),
        None => Ok(default),
    }
}

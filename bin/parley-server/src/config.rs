//! Server configuration, loaded from environment variables at startup.

/// Directive prepended to every turn before it reaches the model.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer support agent.

Guidelines:
- Be friendly and professional
- Provide step-by-step solutions when possible
- Keep responses concise but helpful
- If unsure, suggest contacting a human support representative";

/// Runtime configuration for parley-server.
///
/// Every field has a default so the relay starts without any environment
/// variables set; only the upstream API key is needed for real traffic.
#[derive(Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Base URL of the OpenAI-compatible completion API.
    pub llm_base_url: String,

    /// Bearer key for the completion API. `PARLEY_LLM_API_KEY`, else
    /// `GROQ_API_KEY`.
    pub llm_api_key: Option<String>,

    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,

    /// Fixed system directive for every turn.
    pub system_prompt: String,

    /// Comma-separated CORS origin allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve `/api-docs/openapi.json`.
    pub enable_docs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            log_level: "info".into(),
            log_json: false,
            llm_base_url: "https://api.groq.com/openai/v1".into(),
            llm_api_key: None,
            llm_model: "llama3-8b-8192".into(),
            llm_temperature: 0.7,
            llm_max_tokens: 400,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            cors_allowed_origins: None,
            enable_docs: true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .field("llm_model", &self.llm_model)
            .field("llm_temperature", &self.llm_temperature)
            .field("llm_max_tokens", &self.llm_max_tokens)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("enable_docs", &self.enable_docs)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("PARLEY_BIND", &defaults.bind_address),
            log_level: env_or("PARLEY_LOG", &defaults.log_level),
            log_json: bool_env("PARLEY_LOG_JSON", defaults.log_json),
            llm_base_url: env_or("PARLEY_LLM_BASE_URL", &defaults.llm_base_url),
            llm_api_key: non_empty_env("PARLEY_LLM_API_KEY").or_else(|| non_empty_env("GROQ_API_KEY")),
            llm_model: env_or("PARLEY_LLM_MODEL", &defaults.llm_model),
            llm_temperature: parse_env("PARLEY_LLM_TEMPERATURE", defaults.llm_temperature),
            llm_max_tokens: parse_env("PARLEY_LLM_MAX_TOKENS", defaults.llm_max_tokens),
            system_prompt: env_or("PARLEY_SYSTEM_PROMPT", &defaults.system_prompt),
            cors_allowed_origins: non_empty_env("PARLEY_CORS_ORIGINS"),
            enable_docs: bool_env("PARLEY_ENABLE_DOCS", defaults.enable_docs),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

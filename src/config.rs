use std::{env, time::Duration};

use crate::retry::RetryPolicy;

/// Delays that keep a multi-part reply in reading order on the customer's
/// phone and under WhatsApp's burst limits.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Between two response units of one model reply.
    pub between_units: Duration,
    /// Between short text steps.
    pub step: Duration,
    /// After each media attachment.
    pub after_media: Duration,
    /// After a text longer than `long_text_chars`.
    pub after_long_text: Duration,
    pub long_text_chars: usize,
    /// Between quote result chunks and mode transitions.
    pub quote_chunk: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            between_units: Duration::from_millis(1500),
            step: Duration::from_millis(400),
            after_media: Duration::from_millis(900),
            after_long_text: Duration::from_millis(1200),
            long_text_chars: 350,
            quote_chunk: Duration::from_millis(1000),
        }
    }
}

impl PacingConfig {
    /// Pause after sending `text`; longer content gets more time.
    pub fn after_text(&self, text: &str) -> Duration {
        if text.chars().count() > self.long_text_chars {
            self.after_long_text
        } else {
            self.step
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub agency_name: String,
    /// Quiet period after the last inbound message before the model runs.
    pub debounce: Duration,
    /// Trailing window in which an identical outbound message is skipped.
    pub dedupe_window: Duration,
    /// Name used when neither the webhook nor the contact book has one.
    pub fallback_display_name: String,
    /// Free-form agency instructions appended to the system prompt.
    pub prompt_notes: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            agency_name: "Viajes Sol y Mar".to_string(),
            debounce: Duration::from_secs(35),
            dedupe_window: Duration::from_secs(5),
            fallback_display_name: "viajero".to_string(),
            prompt_notes: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuoteSettings {
    pub max_windows: usize,
    /// How many option images are fetched when a result has none.
    pub media_per_option: usize,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            max_windows: 3,
            media_per_option: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub app_secret: String,
    pub verify_token: String,
    pub api_version: String,
    pub graph_base_url: String,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.phone_number_id.trim().is_empty()
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.graph_base_url.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub assistant: AssistantSettings,
    pub pacing: PacingConfig,
    pub quote: QuoteSettings,
    pub retry: RetryPolicy,
    pub whatsapp: WhatsAppConfig,
    pub openai: OpenAiConfig,
    pub search: SearchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            database_url: String::new(),
            assistant: AssistantSettings::default(),
            pacing: PacingConfig::default(),
            quote: QuoteSettings::default(),
            retry: RetryPolicy::default(),
            whatsapp: WhatsAppConfig {
                api_version: "v21.0".to_string(),
                graph_base_url: "https://graph.facebook.com".to_string(),
                ..WhatsAppConfig::default()
            },
            openai: OpenAiConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment (after `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let assistant_defaults = AssistantSettings::default();
        let pacing_defaults = PacingConfig::default();
        let quote_defaults = QuoteSettings::default();
        let retry_defaults = RetryPolicy::default();

        Self {
            port: env_parse("PORT", 4000),
            database_url: resolve_database_url(),
            assistant: AssistantSettings {
                agency_name: env_text("AGENCY_NAME", &assistant_defaults.agency_name),
                debounce: env_secs("ASSISTANT_DEBOUNCE_SECS", assistant_defaults.debounce),
                dedupe_window: env_secs("DEDUPE_WINDOW_SECS", assistant_defaults.dedupe_window),
                fallback_display_name: env_text(
                    "ASSISTANT_FALLBACK_NAME",
                    &assistant_defaults.fallback_display_name,
                ),
                prompt_notes: env_text("ASSISTANT_PROMPT_NOTES", ""),
            },
            pacing: PacingConfig {
                between_units: env_millis("PACING_BETWEEN_UNITS_MS", pacing_defaults.between_units),
                step: env_millis("PACING_STEP_MS", pacing_defaults.step),
                after_media: env_millis("PACING_AFTER_MEDIA_MS", pacing_defaults.after_media),
                after_long_text: env_millis(
                    "PACING_AFTER_LONG_TEXT_MS",
                    pacing_defaults.after_long_text,
                ),
                long_text_chars: env_parse("PACING_LONG_TEXT_CHARS", pacing_defaults.long_text_chars),
                quote_chunk: env_millis("PACING_QUOTE_CHUNK_MS", pacing_defaults.quote_chunk),
            },
            quote: QuoteSettings {
                max_windows: env_parse("QUOTE_MAX_WINDOWS", quote_defaults.max_windows),
                media_per_option: env_parse(
                    "QUOTE_MEDIA_PER_OPTION",
                    quote_defaults.media_per_option,
                ),
            },
            retry: RetryPolicy {
                max_attempts: env_parse("RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts),
                base_delay: env_millis("RETRY_BASE_DELAY_MS", retry_defaults.base_delay),
                max_delay: env_millis("RETRY_MAX_DELAY_MS", retry_defaults.max_delay),
            },
            whatsapp: WhatsAppConfig {
                access_token: env_text("WHATSAPP_ACCESS_TOKEN", ""),
                phone_number_id: env_text("WHATSAPP_PHONE_NUMBER_ID", ""),
                app_secret: env_text("WHATSAPP_APP_SECRET", ""),
                verify_token: env_text("WHATSAPP_VERIFY_TOKEN", ""),
                api_version: env_text("WHATSAPP_API_VERSION", "v21.0"),
                graph_base_url: env_text("WHATSAPP_GRAPH_URL", "https://graph.facebook.com"),
            },
            openai: OpenAiConfig {
                api_key: env_text("OPENAI_API_KEY", ""),
                model: env_text("OPENAI_MODEL", "gpt-4o-mini"),
                base_url: env_text("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            },
            search: SearchConfig {
                base_url: env_text("SEARCH_API_URL", "http://localhost:8088"),
                api_key: env_text("SEARCH_API_KEY", ""),
            },
        }
    }
}

fn env_text(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "agency_chat".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

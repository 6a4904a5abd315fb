use clap::Parser;
use std::fmt;
use std::time::Duration;

/// Alternate environment variables consulted for the primary credential, in order
pub const API_KEY_FALLBACK_VARS: [&str; 2] = ["OPENAI_API_KEY", "VITE_GEMINI_API_KEY"];

#[derive(Parser, Debug)]
#[command(name = "document-ocr-server")]
#[command(about = "Document OCR service with cloud primary and local fallback")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "API_PORT", default_value = "8050")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 10MB)
    #[arg(long, env = "MAX_FILE_SIZE", default_value = "10485760")]
    pub max_file_size: usize,

    /// Default OCR language (e.g., "en", "fr")
    #[arg(long, env = "OCR_LANG", default_value = "en")]
    pub ocr_lang: String,

    /// Gemini API key; OPENAI_API_KEY and VITE_GEMINI_API_KEY are also checked
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model used for primary recognition
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// Base URL of the Gemini API
    #[arg(
        long,
        env = "GEMINI_ENDPOINT",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_endpoint: String,

    /// Timeout for one primary recognition call, in seconds
    #[arg(long, env = "PRIMARY_TIMEOUT_SECS", default_value = "30")]
    pub primary_timeout_secs: u64,

    /// Maximum number of concurrent fallback recognitions (default: CPU count)
    #[arg(long, env = "MAX_CONCURRENT_FALLBACK")]
    pub max_concurrent_fallback: Option<usize>,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase service key
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Comma-separated allowed CORS origins, or "*"
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Secret credential; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Primary (cloud) recognizer settings
#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    /// `None` means the primary tier is unconfigured and will be skipped
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

/// Fallback (local) recognizer settings
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub default_language: String,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Keep documents in process memory only
    Memory,
    Supabase { url: String, key: ApiKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return Self::Any;
        }
        Self::List(
            raw.split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub primary: PrimaryConfig,
    pub fallback: FallbackConfig,
    pub store: StoreConfig,
    pub cors_origins: CorsOrigins,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let api_key = resolve_api_key(args.gemini_api_key, |name| std::env::var(name).ok());
        let max_concurrent = args
            .max_concurrent_fallback
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);

        Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            primary: PrimaryConfig {
                api_key,
                model: args.gemini_model,
                endpoint: args.gemini_endpoint.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(args.primary_timeout_secs.max(1)),
            },
            fallback: FallbackConfig {
                default_language: args.ocr_lang,
                max_concurrent,
            },
            store: store_config(args.supabase_url, args.supabase_key),
            cors_origins: CorsOrigins::parse(&args.cors_origins),
        }
    }
}

/// First non-blank credential among the explicit value and the alternate variables
pub fn resolve_api_key<F>(explicit: Option<String>, lookup: F) -> Option<ApiKey>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .into_iter()
        .chain(API_KEY_FALLBACK_VARS.iter().filter_map(|name| lookup(*name)))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .map(ApiKey)
}

fn store_config(url: Option<String>, key: Option<String>) -> StoreConfig {
    let non_blank = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    match (non_blank(url), non_blank(key)) {
        (Some(url), Some(key)) => StoreConfig::Supabase {
            url: url.trim_end_matches('/').to_string(),
            key: ApiKey(key),
        },
        _ => StoreConfig::Memory,
    }
}

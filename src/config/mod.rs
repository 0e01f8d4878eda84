//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    fmt,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::validation::{DEFAULT_DENY_PATTERNS, DEFAULT_MAX_SOURCE_BYTES, SourceValidator};

pub use cli::{CliArgs, Command, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tikzrender";
const ENV_PREFIX: &str = "TIKZRENDER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_TEMP_DIR: &str = "./temp";
const DEFAULT_MAX_CONCURRENCY: u64 = 2;
const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONVERT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RASTER_DPI: u64 = 300;
const DEFAULT_PDFLATEX_PATH: &str = "pdflatex";
const DEFAULT_PDF2SVG_PATH: &str = "pdf2svg";
const DEFAULT_PDFTOPPM_PATH: &str = "pdftoppm";
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 600;
const DEFAULT_CACHE_CAPACITY: u64 = 1024;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 20;
/// Worst-case JSON growth of one source byte (`\u00XX`).
const JSON_ESCAPE_FACTOR: usize = 6;
/// Room for the request envelope around `tikzCode`.
const JSON_ENVELOPE_BYTES: usize = 1024;
const DEFAULT_DESCRIBE_BODY_LIMIT_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_DESCRIBE_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_DESCRIBE_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_DESCRIBE_MAX_TOKENS: u64 = 1024;
const DEFAULT_DESCRIBE_TIMEOUT_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub http: HttpSettings,
    pub describe: DescribeSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub temp_dir: PathBuf,
    pub max_source_bytes: NonZeroUsize,
    pub max_concurrency: NonZeroUsize,
    pub compile_timeout: Duration,
    pub convert_timeout: Duration,
    pub raster_dpi: NonZeroU32,
    pub pdflatex_path: PathBuf,
    pub pdf2svg_path: PathBuf,
    pub pdftoppm_path: PathBuf,
    pub coalesce_identical: bool,
    pub deny_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub render_body_limit_bytes: usize,
    pub describe_body_limit_bytes: usize,
}

#[derive(Clone)]
pub struct DescribeSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: NonZeroU32,
    pub timeout: Duration,
}

impl fmt::Debug for DescribeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescribeSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
    rate_limit: RawRateLimitSettings,
    http: RawHttpSettings,
    describe: RawDescribeSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }
        if let Some(key) = overrides.describe_api_key.as_ref() {
            self.describe.api_key = Some(key.clone());
        }
        if let Some(model) = overrides.describe_model.as_ref() {
            self.describe.model = Some(model.clone());
        }

        self.apply_render_overrides(&overrides.render);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(dir) = overrides.temp_dir.as_ref() {
            self.render.temp_dir = Some(dir.clone());
        }
        if let Some(value) = overrides.max_concurrency {
            self.render.max_concurrency = Some(value);
        }
        if let Some(value) = overrides.compile_timeout_ms {
            self.render.compile_timeout_ms = Some(value);
        }
        if let Some(value) = overrides.convert_timeout_ms {
            self.render.convert_timeout_ms = Some(value);
        }
        if let Some(value) = overrides.raster_dpi {
            self.render.raster_dpi = Some(value);
        }
        if let Some(path) = overrides.pdflatex_path.as_ref() {
            self.render.pdflatex_path = Some(path.clone());
        }
        if let Some(path) = overrides.pdf2svg_path.as_ref() {
            self.render.pdf2svg_path = Some(path.clone());
        }
        if let Some(path) = overrides.pdftoppm_path.as_ref() {
            self.render.pdftoppm_path = Some(path.clone());
        }
        if let Some(value) = overrides.coalesce_identical {
            self.render.coalesce_identical = Some(value);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            cache,
            rate_limit,
            http,
            describe,
        } = raw;

        let render = build_render_settings(render)?;
        let http = build_http_settings(http, render.max_source_bytes.get())?;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render,
            cache: build_cache_settings(cache)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            http,
            describe: build_describe_settings(describe)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let temp_dir = non_empty_path(render.temp_dir, DEFAULT_TEMP_DIR, "render.temp_dir")?;
    let pdflatex_path = non_empty_path(
        render.pdflatex_path,
        DEFAULT_PDFLATEX_PATH,
        "render.pdflatex_path",
    )?;
    let pdf2svg_path = non_empty_path(
        render.pdf2svg_path,
        DEFAULT_PDF2SVG_PATH,
        "render.pdf2svg_path",
    )?;
    let pdftoppm_path = non_empty_path(
        render.pdftoppm_path,
        DEFAULT_PDFTOPPM_PATH,
        "render.pdftoppm_path",
    )?;

    let max_source_bytes = non_zero_usize(
        render
            .max_source_bytes
            .unwrap_or(DEFAULT_MAX_SOURCE_BYTES as u64),
        "render.max_source_bytes",
    )?;
    let max_concurrency = non_zero_usize(
        render.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        "render.max_concurrency",
    )?;
    let compile_timeout = non_zero_millis(
        render.compile_timeout_ms.unwrap_or(DEFAULT_COMPILE_TIMEOUT_MS),
        "render.compile_timeout_ms",
    )?;
    let convert_timeout = non_zero_millis(
        render.convert_timeout_ms.unwrap_or(DEFAULT_CONVERT_TIMEOUT_MS),
        "render.convert_timeout_ms",
    )?;
    let raster_dpi = non_zero_u32(
        render.raster_dpi.unwrap_or(DEFAULT_RASTER_DPI),
        "render.raster_dpi",
    )?;

    let deny_patterns = render.deny_patterns.unwrap_or_else(|| {
        DEFAULT_DENY_PATTERNS
            .iter()
            .map(|pattern| pattern.to_string())
            .collect()
    });
    SourceValidator::new(max_source_bytes.get(), &deny_patterns)
        .map_err(|err| LoadError::invalid("render.deny_patterns", err.to_string()))?;

    Ok(RenderSettings {
        temp_dir,
        max_source_bytes,
        max_concurrency,
        compile_timeout,
        convert_timeout,
        raster_dpi,
        pdflatex_path,
        pdf2svg_path,
        pdftoppm_path,
        coalesce_identical: render.coalesce_identical.unwrap_or(true),
        deny_patterns,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }
    let sweep_secs = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }
    let capacity = non_zero_usize(
        cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
        "cache.capacity",
    )?;

    Ok(CacheSettings {
        ttl: Duration::from_secs(ttl_secs),
        sweep_interval: Duration::from_secs(sweep_secs),
        capacity,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

/// Smallest render body that still fits a source of `max_source_bytes`
/// after JSON escaping, so the validator rather than the transport decides
/// what is too large.
pub fn render_body_limit_for(max_source_bytes: usize) -> usize {
    max_source_bytes
        .saturating_mul(JSON_ESCAPE_FACTOR)
        .saturating_add(JSON_ENVELOPE_BYTES)
}

fn build_http_settings(
    http: RawHttpSettings,
    max_source_bytes: usize,
) -> Result<HttpSettings, LoadError> {
    let floor = render_body_limit_for(max_source_bytes);
    let render_body_limit_bytes = match http.render_body_limit_bytes {
        None => floor,
        Some(value) => {
            let value = non_zero_usize(value, "http.render_body_limit_bytes")?.get();
            if value < floor {
                return Err(LoadError::invalid(
                    "http.render_body_limit_bytes",
                    format!(
                        "must be at least {floor} bytes to fit render.max_source_bytes={max_source_bytes} after JSON escaping"
                    ),
                ));
            }
            value
        }
    };
    let describe_body_limit_bytes = non_zero_usize(
        http.describe_body_limit_bytes
            .unwrap_or(DEFAULT_DESCRIBE_BODY_LIMIT_BYTES),
        "http.describe_body_limit_bytes",
    )?;

    Ok(HttpSettings {
        render_body_limit_bytes,
        describe_body_limit_bytes: describe_body_limit_bytes.get(),
    })
}

fn build_describe_settings(describe: RawDescribeSettings) -> Result<DescribeSettings, LoadError> {
    let api_key = describe.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let base_url = describe
        .base_url
        .unwrap_or_else(|| DEFAULT_DESCRIBE_BASE_URL.to_string());
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(LoadError::invalid(
            "describe.base_url",
            format!("`{base_url}` is not an http(s) URL"),
        ));
    }

    let model = describe
        .model
        .unwrap_or_else(|| DEFAULT_DESCRIBE_MODEL.to_string());
    if model.trim().is_empty() {
        return Err(LoadError::invalid("describe.model", "must not be empty"));
    }

    let max_tokens = non_zero_u32(
        describe.max_tokens.unwrap_or(DEFAULT_DESCRIBE_MAX_TOKENS),
        "describe.max_tokens",
    )?;
    let timeout_secs = describe
        .timeout_seconds
        .unwrap_or(DEFAULT_DESCRIBE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "describe.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DescribeSettings {
        api_key,
        base_url: base_url.trim_end_matches('/').to_string(),
        model,
        max_tokens,
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    temp_dir: Option<PathBuf>,
    max_source_bytes: Option<u64>,
    max_concurrency: Option<u64>,
    compile_timeout_ms: Option<u64>,
    convert_timeout_ms: Option<u64>,
    raster_dpi: Option<u64>,
    pdflatex_path: Option<PathBuf>,
    pdf2svg_path: Option<PathBuf>,
    pdftoppm_path: Option<PathBuf>,
    coalesce_identical: Option<bool>,
    deny_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    render_body_limit_bytes: Option<u64>,
    describe_body_limit_bytes: Option<u64>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawDescribeSettings {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u64>,
    timeout_seconds: Option<u64>,
}

impl fmt::Debug for RawDescribeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDescribeSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

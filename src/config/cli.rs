use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::OutputFormat;

/// Command-line arguments for the tikzrender binary.
#[derive(Debug, Parser)]
#[command(
    name = "tikzrender",
    version,
    about = "Render TikZ diagrams to SVG or PNG"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIKZRENDER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a single TikZ file and exit.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Output format (svg or png).
    #[arg(long, default_value_t = OutputFormat::Svg)]
    pub format: OutputFormat,

    /// Where to write the image; stdout when omitted.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// TikZ source file (the body placed inside the document environment).
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the directory used for intermediate artifacts.
    #[arg(long = "render-temp-dir", value_name = "PATH")]
    pub temp_dir: Option<PathBuf>,

    /// Override the number of pipelines allowed to run at once.
    #[arg(long = "render-max-concurrency", value_name = "COUNT")]
    pub max_concurrency: Option<u64>,

    /// Override the pdflatex time limit.
    #[arg(long = "render-compile-timeout-ms", value_name = "MILLIS")]
    pub compile_timeout_ms: Option<u64>,

    /// Override the pdf2svg/pdftoppm time limit.
    #[arg(long = "render-convert-timeout-ms", value_name = "MILLIS")]
    pub convert_timeout_ms: Option<u64>,

    /// Override the PNG resolution.
    #[arg(long = "render-raster-dpi", value_name = "DPI")]
    pub raster_dpi: Option<u64>,

    /// Override the pdflatex executable.
    #[arg(long = "render-pdflatex-path", value_name = "PATH")]
    pub pdflatex_path: Option<PathBuf>,

    /// Override the pdf2svg executable.
    #[arg(long = "render-pdf2svg-path", value_name = "PATH")]
    pub pdf2svg_path: Option<PathBuf>,

    /// Override the pdftoppm executable.
    #[arg(long = "render-pdftoppm-path", value_name = "PATH")]
    pub pdftoppm_path: Option<PathBuf>,

    /// Toggle sharing one pipeline run between identical concurrent requests.
    #[arg(
        long = "render-coalesce-identical",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub coalesce_identical: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the result cache time-to-live.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the maximum number of cached results.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,

    /// API key enabling diagram descriptions.
    #[arg(
        long = "describe-api-key",
        env = "ANTHROPIC_API_KEY",
        value_name = "KEY",
        hide_env_values = true
    )]
    pub describe_api_key: Option<String>,

    /// Override the model used for descriptions.
    #[arg(long = "describe-model", value_name = "MODEL")]
    pub describe_model: Option<String>,
}

pub mod commands;
pub mod server;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use chrono::{Local, SecondsFormat};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use smc_core::{load_station_config, Catalog, FfprobeProber, StationConfig};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::commands::{CatalogCommands, CatalogListArgs, ServeArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] smc_core::ConfigError),
    #[error("catalog error: {0}")]
    Catalog(#[from] smc_core::CatalogError),
    #[error("station error: {0}")]
    Station(#[from] smc_core::StationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "SMC station: simulated broadcast channel over HLS", long_about = None)]
pub struct Cli {
    /// Arquivo de configuração, relativo ao diretório home
    #[arg(long, default_value = "smc.toml")]
    pub config: PathBuf,
    /// Diretório home da estação (padrão: $HOME)
    #[arg(long)]
    pub home: Option<PathBuf>,
    /// Arquivo de log (padrão: stderr)
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Configuration file: `--config` joined onto `--home` (or `$HOME`).
    pub fn config_path(&self) -> PathBuf {
        let home = self
            .home
            .clone()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(&self.config)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inicia a estação e o servidor web
    Serve(ServeArgs),
    /// Operações sobre o catálogo de vídeos
    #[command(subcommand)]
    Catalog(CatalogCommands),
    /// Mostra a janela de exibição configurada
    Schedule,
    /// Executa verificações de integridade
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Executa checagens básicas
    Check,
}

/// Installs the global subscriber: `RUST_LOG` (default `info`) to stderr or the `--log` file.
pub fn init_tracing(log: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| AppError::Logging(err.to_string()))
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();

    match &cli.command {
        Commands::Serve(args) => {
            commands::serve(config_path, args).await?;
        }
        Commands::Catalog(CatalogCommands::List(args)) => {
            let config = load_station_config(&config_path)?;
            let listing = catalog_list(&config, args).await?;
            render(&listing, cli.format)?;
        }
        Commands::Schedule => {
            let config = load_station_config(&config_path)?;
            let report = ScheduleReport::evaluate(&config);
            render(&report, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = health_check(&config_path);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "Uma ou mais verificações falharam".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

async fn catalog_list(config: &StationConfig, args: &CatalogListArgs) -> Result<CatalogListing> {
    let prober = FfprobeProber::new(&config.transcoder.ffprobe, None);
    let catalog = Catalog::scan_config(config, &prober).await?;
    Ok(CatalogListing::from_catalog(&config.data_dir(), &catalog, args.limit))
}

#[derive(Debug, Serialize)]
pub struct CatalogListing {
    pub root: PathBuf,
    pub assets: usize,
    pub total_duration_s: f64,
    pub rows: Vec<AssetEntry>,
}

#[derive(Debug, Serialize)]
pub struct AssetEntry {
    pub path: PathBuf,
    pub duration_s: f64,
    pub video_codec: Option<String>,
    pub video_streams: Vec<u32>,
    pub audio_streams: Vec<u32>,
}

impl CatalogListing {
    fn from_catalog(root: &Path, catalog: &Catalog, limit: usize) -> Self {
        let rows = catalog
            .assets()
            .iter()
            .take(limit)
            .map(|asset| AssetEntry {
                path: asset
                    .path
                    .strip_prefix(root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| asset.path.clone()),
                duration_s: asset.duration.as_secs_f64(),
                video_codec: asset.video_codec.clone(),
                video_streams: asset.video_streams.clone(),
                audio_streams: asset.audio_streams.clone(),
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            assets: catalog.len(),
            total_duration_s: catalog.total_duration().as_secs_f64(),
            rows,
        }
    }
}

impl DisplayFallback for CatalogListing {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return format!("Nenhum vídeo encontrado em {}", self.root.display());
        }
        let mut lines = vec![format!(
            "{} vídeos, {} no total",
            self.assets,
            format_seconds(self.total_duration_s)
        )];
        for entry in &self.rows {
            lines.push(format!(
                "{} | {} | codec={} | audio={:?}",
                entry.path.display(),
                format_seconds(entry.duration_s),
                entry.video_codec.as_deref().unwrap_or("-"),
                entry.audio_streams
            ));
        }
        if self.rows.len() < self.assets {
            lines.push(format!("... mais {}", self.assets - self.rows.len()));
        }
        lines.join("\n")
    }
}

fn format_seconds(secs: f64) -> String {
    let total = secs.round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

#[derive(Debug, Serialize)]
pub struct ScheduleReport {
    pub now: String,
    pub open: bool,
    pub starts_at: String,
    pub wait_s: u64,
    pub play_s: u64,
}

impl ScheduleReport {
    fn evaluate(config: &StationConfig) -> Self {
        let now = Local::now();
        let readiness = config.schedule.readiness(&now);
        Self {
            now: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            open: readiness.open,
            starts_at: readiness
                .starts_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            wait_s: readiness.wait.as_secs(),
            play_s: readiness.play.as_secs(),
        }
    }
}

impl DisplayFallback for ScheduleReport {
    fn display(&self) -> String {
        if self.open {
            format!(
                "No ar: restam {}",
                format_seconds(self.play_s as f64)
            )
        } else {
            format!(
                "Próxima exibição em {} ({}), duração {}",
                self.starts_at,
                format_seconds(self.wait_s as f64),
                format_seconds(self.play_s as f64)
            )
        }
    }
}

fn health_check(config_path: &Path) -> Vec<HealthEntry> {
    let mut results = vec![check_path("config", config_path)];
    match load_station_config(config_path) {
        Ok(config) => {
            results.push(check_directory("data_dir", &config.data_dir()));
            results.push(check_directory("static_dir", &config.static_dir()));
            results.push(check_tool("ffmpeg", &config.transcoder.ffmpeg));
            results.push(check_tool("ffprobe", &config.transcoder.ffprobe));
        }
        Err(err) => results.push(HealthEntry::error("config", format!("inválida: {err}"))),
    }
    results
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{path} ausente", path = path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(
            name,
            format!("{path} não é diretório", path = path.display()),
        ),
        Err(_) => HealthEntry::warn(
            name,
            format!("{path} não encontrado", path = path.display()),
        ),
    }
}

fn check_tool(name: &str, program: &str) -> HealthEntry {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().unwrap_or(program).trim().to_string();
            HealthEntry::ok(name, version)
        }
        Ok(output) => HealthEntry::error(
            name,
            format!("{program} saiu com status {:?}", output.status.code()),
        ),
        Err(err) => HealthEntry::error(name, format!("{program}: {err}")),
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

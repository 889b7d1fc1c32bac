use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Directory uploads are staged in before transfer.
    pub temp_dir: PathBuf,
    /// Request body cap for the upload endpoints.
    pub max_upload_bytes: usize,
    /// Log filter used when `RUST_LOG` is unset.
    pub log: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File service: uploads to object storage with URL resolution")]
pub struct Args {
    /// Host to bind to (overrides FILE_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILE_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Staging directory for uploads (overrides FILE_SERVICE_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum upload body in bytes (overrides FILE_SERVICE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Log filter when RUST_LOG is unset (overrides FILE_SERVICE_LOG)
    #[arg(long)]
    pub log: Option<String>,

    /// Apply the embedded schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("FILE_SERVICE_PORT", 8080u16)?;
        let env_db = env::var("FILE_SERVICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_service.db".into());
        let env_temp = env::var_os("FILE_SERVICE_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let env_max_upload = env_number("FILE_SERVICE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_log = env::var("FILE_SERVICE_LOG").unwrap_or_else(|_| "info".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            temp_dir: args.temp_dir.unwrap_or(env_temp),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            log: args.log.unwrap_or(env_log),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse a numeric variable, falling back to `default` when unset.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

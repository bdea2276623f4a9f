use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an optional configuration file.
pub const CONFIG_FILE_ENV: &str = "NEUROSCAN_CONFIG_FILE";
const ENV_PREFIX: &str = "NEUROSCAN";

#[derive(Debug, Parser)]
#[command(name = "neuroscan", version, about = "Serves NIfTI volumes to the 3D viewer")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding uploaded files
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Upper bound for cached artifacts, in bytes
    #[arg(long)]
    pub cache_max_bytes: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub filter: String,
    pub json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
            cors_origins: vec!["http://localhost:5173".into(), "http://localhost:3000".into()],
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/uploads"),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}

impl Settings {
    /// Build settings from defaults, an optional file, `NEUROSCAN__*`
    /// environment variables and finally the command line, later sources
    /// winning.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = cli
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        builder = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .set_override_option("server.bind", cli.bind.clone())?
            .set_override_option(
                "storage.dir",
                cli.storage_dir
                    .as_ref()
                    .map(|dir| dir.to_string_lossy().into_owned()),
            )?
            .set_override_option("cache.max_bytes", cli.cache_max_bytes)?
            .set_override_option("log.json", cli.json_logs.then_some(true))?;

        builder.build()?.try_deserialize()
    }
}

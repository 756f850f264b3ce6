//! Environment-driven configuration.
//!
//! Every setting has a default; only malformed values fail startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Error type for configuration parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Stdout,
    File,
    /// File when `LESIONSCOPE_LOG_FILE` is set, stdout otherwise
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub mode: LogMode,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    const DEFAULT_FILE: &'static str = "data/lesionscope.log";

    /// File to write to, or `None` for stdout.
    #[must_use]
    pub fn target_file(&self) -> Option<PathBuf> {
        match self.mode {
            LogMode::Stdout => None,
            LogMode::File => Some(
                self.file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_FILE)),
            ),
            LogMode::Auto => self.file.clone(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub model_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub require_manifest: bool,
    pub db_path: PathBuf,
    pub db_pool_size: u32,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub inference_timeout: Duration,
    pub max_concurrent_inferences: usize,
    pub log: LogConfig,
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

fn parse_positive<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = value else {
        return Ok(default);
    };
    let parsed = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if parsed <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is set to a malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup` (used by tests).
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is set to a malformed value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("LESIONSCOPE_BIND_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: "LESIONSCOPE_BIND_ADDR",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8000)),
        };

        let model_dir = PathBuf::from(get("LESIONSCOPE_MODEL_DIR").unwrap_or_else(|| "model".into()));
        let artifact_path = get("LESIONSCOPE_ARTIFACT_PATH")
            .map_or_else(|| model_dir.join("preprocess_artifacts.json"), PathBuf::from);

        let log_mode = match get("LESIONSCOPE_LOG_MODE").as_deref() {
            None | Some("auto") => LogMode::Auto,
            Some("stdout") => LogMode::Stdout,
            Some("file") => LogMode::File,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LESIONSCOPE_LOG_MODE",
                    value: other.to_string(),
                    reason: "expected stdout, file or auto".to_string(),
                })
            }
        };

        let timeout_ms: u64 = parse_positive(
            "LESIONSCOPE_INFERENCE_TIMEOUT_MS",
            get("LESIONSCOPE_INFERENCE_TIMEOUT_MS"),
            15_000,
        )?;

        Ok(Self {
            bind_addr,
            artifact_path,
            require_manifest: get("LESIONSCOPE_REQUIRE_MANIFEST").is_some_and(|v| parse_bool(&v)),
            db_path: PathBuf::from(get("LESIONSCOPE_DB_PATH").unwrap_or_else(|| "lesionscope.db".into())),
            db_pool_size: parse_positive("LESIONSCOPE_DB_POOL_SIZE", get("LESIONSCOPE_DB_POOL_SIZE"), 8)?,
            static_dir: PathBuf::from(get("LESIONSCOPE_STATIC_DIR").unwrap_or_else(|| "frontend".into())),
            max_upload_bytes: parse_positive(
                "LESIONSCOPE_MAX_UPLOAD_BYTES",
                get("LESIONSCOPE_MAX_UPLOAD_BYTES"),
                10 * 1024 * 1024,
            )?,
            max_image_dimension: parse_positive(
                "LESIONSCOPE_MAX_IMAGE_DIMENSION",
                get("LESIONSCOPE_MAX_IMAGE_DIMENSION"),
                8192,
            )?,
            inference_timeout: Duration::from_millis(timeout_ms),
            max_concurrent_inferences: parse_positive(
                "LESIONSCOPE_MAX_CONCURRENT_INFERENCES",
                get("LESIONSCOPE_MAX_CONCURRENT_INFERENCES"),
                4,
            )?,
            log: LogConfig {
                mode: log_mode,
                file: get("LESIONSCOPE_LOG_FILE").map(PathBuf::from),
            },
            model_dir,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            model_dir: PathBuf::from("model"),
            artifact_path: PathBuf::from("model/preprocess_artifacts.json"),
            require_manifest: false,
            db_path: PathBuf::from("lesionscope.db"),
            db_pool_size: 8,
            static_dir: PathBuf::from("frontend"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_image_dimension: 8192,
            inference_timeout: Duration::from_millis(15_000),
            max_concurrent_inferences: 4,
            log: LogConfig {
                mode: LogMode::Auto,
                file: None,
            },
        }
    }
}

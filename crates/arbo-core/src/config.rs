use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::writer::StorageFormat;

pub const DEFAULT_CONFIG_PATH: &str = "arbo.toml";
pub const DEFAULT_PG_PORT: u16 = 5432;

pub const ENV_PG_HOST: &str = "ARBO_PG_HOST";
pub const ENV_PG_DATABASE: &str = "ARBO_PG_DATABASE";
pub const ENV_PG_USER: &str = "ARBO_PG_USER";
pub const ENV_PG_PASSWORD: &str = "ARBO_PG_PASSWORD";
pub const ENV_BASE_PATH: &str = "ARBO_BASE_PATH";
pub const ENV_FORMAT: &str = "ARBO_FORMAT";

/// Connection parameters for the source database.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// `host` or `host:port`.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
            password: Some(password.into()),
        }
    }

    /// Splits `host` into hostname and port, falling back to 5432.
    ///
    /// IPv6 literals are taken bare (`::1`) or bracketed (`[::1]:5433`).
    pub fn host_and_port(&self) -> Result<(&str, u16)> {
        let host = self.host.as_str();
        let invalid_port = || EtlError::Config(format!("invalid port in host '{host}'"));

        if let Some(rest) = host.strip_prefix('[') {
            let (address, tail) = rest
                .split_once(']')
                .ok_or_else(|| EtlError::Config(format!("unclosed '[' in host '{host}'")))?;
            return match tail {
                "" => Ok((address, DEFAULT_PG_PORT)),
                _ => {
                    let port = tail.strip_prefix(':').ok_or_else(invalid_port)?;
                    Ok((address, port.parse().map_err(|_| invalid_port())?))
                }
            };
        }

        match host.split_once(':') {
            // more than one colon: a bare IPv6 address
            Some((_, rest)) if rest.contains(':') => Ok((host, DEFAULT_PG_PORT)),
            Some(("", _)) => Err(EtlError::Config(format!("missing hostname in '{host}'"))),
            Some((name, port)) => Ok((name, port.parse().map_err(|_| invalid_port())?)),
            None => Ok((host, DEFAULT_PG_PORT)),
        }
    }

    /// Connection URL with the password left out. Encrypted transport is always required.
    pub fn connection_url(&self) -> String {
        let (host, port) = self
            .host_and_port()
            .unwrap_or((self.host.as_str(), DEFAULT_PG_PORT));
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        format!(
            "postgres://{}@{}:{}/{}?sslmode=require",
            self.user, host, port, self.database
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default)]
    pub format: StorageFormat,
    /// Number of rows to log from each frame as it is read or computed.
    #[serde(default)]
    pub preview_rows: Option<usize>,
    #[serde(default)]
    pub source: Credentials,
}

fn default_app_name() -> String {
    "arbo".to_string()
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./lake")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            base_path: default_base_path(),
            format: StorageFormat::default(),
            preview_rows: None,
            source: Credentials::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolves the configuration and validates it for a pipeline run.
    ///
    /// See [`Config::resolve`] for how `path` is treated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::resolve(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the config file and applies `ARBO_*` environment overrides,
    /// without validating the source section.
    ///
    /// With `None` the default `arbo.toml` is read when present and the
    /// environment alone is used otherwise. An explicit path must exist.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if !path.is_file() => {
                return Err(EtlError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            Some(path) => Self::read_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.is_file() {
                    Self::read_file(default)?
                } else {
                    debug!(path = DEFAULT_CONFIG_PATH, "config file not found, using environment only");
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "reading config file");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_PG_HOST) {
            self.source.host = host;
        }
        if let Some(database) = lookup(ENV_PG_DATABASE) {
            self.source.database = database;
        }
        if let Some(user) = lookup(ENV_PG_USER) {
            self.source.user = user;
        }
        if let Some(password) = lookup(ENV_PG_PASSWORD) {
            self.source.password = Some(password);
        }
        if let Some(base_path) = lookup(ENV_BASE_PATH) {
            self.base_path = PathBuf::from(base_path);
        }
        if let Some(format) = lookup(ENV_FORMAT) {
            self.format = format.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source.host", &self.source.host),
            ("source.database", &self.source.database),
            ("source.user", &self.source.user),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EtlError::Config(format!("{name} must be set")));
            }
        }
        if self.app_name.trim().is_empty() {
            return Err(EtlError::Config("app_name must not be empty".into()));
        }
        self.source.host_and_port()?;
        Ok(())
    }
}

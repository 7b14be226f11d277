//! Configuration management for db-tally.
//!
//! Handles loading configuration from TOML files: the two backends and the
//! catalog of query templates. Secrets stay out of the file; a backend can
//! name the environment variables that hold its URL and password.

use crate::db::{self, BackendKind, Backends, Engine};
use crate::error::{Result, TallyError};
use crate::runner::QueryTemplateRunner;
use crate::template::QueryTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default statement timeout for the row store.
const ROW_STORE_TIMEOUT_SECS: u64 = 60;

/// Default statement timeout for the batch store. Historical scans run long.
const BATCH_STORE_TIMEOUT_SECS: u64 = 1800;

/// Main configuration structure for db-tally.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend connections.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Query template catalog.
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

/// The row-store and batch-store connections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    pub row_store: Option<BackendConfig>,
    pub batch_store: Option<BackendConfig>,
}

/// Connection settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Engine behind the backend.
    #[serde(default)]
    pub engine: Engine,

    /// Connection URL (`postgres://…`, `sqlite:…`, or the coordinator's
    /// `http(s)://` base URL).
    pub url: Option<String>,

    /// Environment variable holding the URL, used when `url` is unset.
    pub url_env: Option<String>,

    /// User name (batch store).
    pub user: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Default catalog (batch store).
    pub catalog: Option<String>,

    /// Default schema (batch store).
    pub schema: Option<String>,

    /// Pool size (row store).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Statement timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// Session directives sent before every query on this backend, e.g.
    /// resource-limit settings.
    #[serde(default)]
    pub pre_statements: Vec<String>,
}

fn default_max_connections() -> u32 {
    2
}

/// A template entry in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,

    /// Templated SQL with `{name}` placeholders.
    pub text: String,

    /// Backend the template targets.
    #[serde(default)]
    pub backend: BackendKind,

    pub description: Option<String>,
}

impl BackendConfig {
    /// Creates a backend config from a connection URL, validating its scheme.
    pub fn from_url(engine: Engine, url: &str) -> Result<Self> {
        let config = Self {
            engine,
            url: Some(url.to_string()),
            url_env: None,
            user: None,
            password_env: None,
            catalog: None,
            schema: None,
            max_connections: default_max_connections(),
            timeout_secs: None,
            pre_statements: Vec::new(),
        };
        config.parsed_url()?;
        Ok(config)
    }

    /// Returns the configured URL, reading `url_env` if `url` is unset.
    fn raw_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let var = self.url_env.as_deref().ok_or_else(|| {
            TallyError::config(format!(
                "{} backend needs either 'url' or 'url_env'",
                self.engine.as_str()
            ))
        })?;
        std::env::var(var)
            .map_err(|_| TallyError::config(format!("Environment variable {var} is not set")))
    }

    fn parsed_url(&self) -> Result<Url> {
        let raw = self.raw_url()?;
        let url = Url::parse(&raw)
            .map_err(|e| TallyError::config(format!("Invalid connection URL: {e}")))?;

        let schemes = self.engine.url_schemes();
        if !schemes.contains(&url.scheme()) {
            return Err(TallyError::config(format!(
                "Invalid scheme '{}' for {}. Expected one of: {}",
                url.scheme(),
                self.engine.as_str(),
                schemes.join(", ")
            )));
        }
        Ok(url)
    }

    /// Returns the password from `password_env`, if configured.
    pub fn password(&self) -> Result<Option<String>> {
        match &self.password_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                TallyError::config(format!("Environment variable {var} is not set"))
            }),
            None => Ok(None),
        }
    }

    /// Returns the URL to connect with, password included for sqlx engines.
    pub fn connection_url(&self) -> Result<String> {
        let mut url = self.parsed_url()?;
        if self.engine == Engine::Postgres {
            if let Some(password) = self.password()? {
                url.set_password(Some(&password))
                    .map_err(|_| TallyError::config("Cannot set a password on this URL"))?;
            }
        }
        Ok(url.to_string())
    }

    /// Statement timeout, defaulting per backend kind.
    pub fn timeout(&self, kind: BackendKind) -> Duration {
        let secs = self.timeout_secs.unwrap_or(match kind {
            BackendKind::RowStore => ROW_STORE_TIMEOUT_SECS,
            BackendKind::BatchStore => BATCH_STORE_TIMEOUT_SECS,
        });
        Duration::from_secs(secs)
    }

    /// Returns a display-safe string (no credentials) for logs.
    pub fn display_string(&self) -> String {
        let Ok(url) = self.parsed_url() else {
            return format!("{} (unresolved url)", self.engine.as_str());
        };
        match url.host_str() {
            Some(host) => {
                let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
                format!("{}://{host}{port}{}", url.scheme(), url.path())
            }
            None => url.as_str().to_string(),
        }
    }
}

impl BackendsConfig {
    /// Returns the settings for `kind`, if configured.
    pub fn get(&self, kind: BackendKind) -> Option<&BackendConfig> {
        match kind {
            BackendKind::RowStore => self.row_store.as_ref(),
            BackendKind::BatchStore => self.batch_store.as_ref(),
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("db-tally")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TallyError::config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| TallyError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    pub fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            TallyError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Builds a runner with every configured template registered.
    pub fn build_runner(&self) -> Result<QueryTemplateRunner> {
        let mut runner = QueryTemplateRunner::new();
        for entry in &self.templates {
            let mut template = QueryTemplate::new(&entry.name, &entry.text, entry.backend)?;
            if let Some(description) = &entry.description {
                template = template.with_description(description);
            }
            runner.register(template)?;
        }
        debug!("Registered {} templates", self.templates.len());
        Ok(runner)
    }

    /// Connects only the backend for `kind`.
    ///
    /// The other backend is left alone, so a run is not held up by a store
    /// it never queries. An unconfigured `kind` yields empty `Backends`;
    /// the run then reports it as unavailable.
    pub async fn connect_backend(&self, kind: BackendKind) -> Result<Backends> {
        let mut backends = Backends::new();
        if let Some(config) = self.backends.get(kind) {
            backends.insert(db::connect(kind, config).await?);
        }
        Ok(backends)
    }

    /// Session directives configured for `kind`.
    pub fn pre_statements(&self, kind: BackendKind) -> &[String] {
        self.backends
            .get(kind)
            .map(|c| c.pre_statements.as_slice())
            .unwrap_or(&[])
    }
}

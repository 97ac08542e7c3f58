use std::{env, fmt, fs, io, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse configuration: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("neither XDG_CONFIG_HOME nor a home directory is available")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queues: Queues,
    pub channel: ChannelConfig,
    pub consumer: ConsumerDefaults,
    pub scheduler: SchedulerConfig,
    pub caller: CallerConfig,
    pub catalog: CatalogConfig,
    pub telemetry: TelemetryConfig,
    pub registry: RegistryConfig,
}

/// Queue names, one per pipeline hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Queues {
    pub poll: String,
    pub telemetry: String,
    pub response: String,
    pub registry: String,
}

impl Default for Queues {
    fn default() -> Self {
        Self {
            poll: "eservice-poll".into(),
            telemetry: "eservice-telemetry".into(),
            response: "eservice-response-received".into(),
            registry: "eservice-registry".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub database_path: String,
    /// Receives before a message is dead-lettered. Unset means redeliver forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_receive_count: Option<u32>,
    pub poll_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { database_path: "probing-channel.db".into(), max_receive_count: None, poll_interval_ms: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerDefaults {
    pub max_messages: usize,
    pub wait_seconds: u64,
    pub visibility_timeout_seconds: u64,
    /// Pause after a failed invocation before the driver polls again.
    pub failure_backoff_seconds: u64,
}

impl Default for ConsumerDefaults {
    fn default() -> Self {
        Self { max_messages: 1, wait_seconds: 20, visibility_timeout_seconds: 30, failure_backoff_seconds: 5 }
    }
}

impl ConsumerDefaults {
    pub fn consumer_config(&self, queue: &str) -> pipeline::ConsumerConfig {
        pipeline::ConsumerConfig {
            queue: queue.to_string(),
            max_messages: self.max_messages,
            wait: Duration::from_secs(self.wait_seconds),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub page_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_seconds: 60, page_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    pub timeout_seconds: u64,
    /// Base for relative `basePath` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub key_path: String,
    pub issuer: String,
    pub token_ttl_seconds: u64,
    pub soap_action: String,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            base_url: None,
            key_path: "probing_signing.key".into(),
            issuer: "eservice-probing".into(),
            token_ttl_seconds: 300,
            soap_action: "status".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CatalogConfig {
    /// Remote catalog service reached over its HTTP API.
    Http { base_url: String, timeout_seconds: u64 },
    /// Embedded catalog in a local database file.
    Local { database_path: String },
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig::Local { database_path: "probing-catalog.db".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub database_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { database_path: "probing-telemetry.db".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub bucket: String,
    pub key: String,
    /// How often the reader re-reads the snapshot when not run with `--once`.
    pub interval_seconds: u64,
    pub store: ObjectStoreConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bucket: "registry".into(),
            key: "eservices.json".into(),
            interval_seconds: 3600,
            store: ObjectStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    Filesystem { root: String },
    Http { endpoint: String, timeout_seconds: u64 },
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        ObjectStoreConfig::Filesystem { root: "objects".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/eservice-probing/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("eservice-probing/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let unset = "(unset)".to_string();

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Queues")?;
        write_1(f, "Poll", &self.queues.poll)?;
        write_1(f, "Telemetry", &self.queues.telemetry)?;
        write_1(f, "Response Received", &self.queues.response)?;
        write_1(f, "Registry", &self.queues.registry)?;

        write_title_1(f, "Channel")?;
        write_1(f, "Database", &self.channel.database_path)?;
        let max_receive = self.channel.max_receive_count.map(|n| n.to_string());
        write_1(f, "Max Receive Count", max_receive.as_ref().unwrap_or(&unset))?;
        write_1(f, "Poll Interval (ms)", &self.channel.poll_interval_ms)?;

        write_title_1(f, "Consumers")?;
        write_1(f, "Max Messages", &self.consumer.max_messages)?;
        write_1(f, "Wait (s)", &self.consumer.wait_seconds)?;
        write_1(f, "Visibility Timeout (s)", &self.consumer.visibility_timeout_seconds)?;
        write_1(f, "Failure Backoff (s)", &self.consumer.failure_backoff_seconds)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Interval (s)", &self.scheduler.interval_seconds)?;
        write_1(f, "Page Size", &self.scheduler.page_size)?;

        write_title_1(f, "Caller")?;
        write_1(f, "Timeout (s)", &self.caller.timeout_seconds)?;
        write_1(f, "Base URL", self.caller.base_url.as_ref().unwrap_or(&unset))?;
        write_1(f, "Signing Key", &self.caller.key_path)?;
        write_1(f, "Issuer", &self.caller.issuer)?;
        write_1(f, "SOAPAction", &self.caller.soap_action)?;

        write_title_1(f, "Catalog")?;
        match &self.catalog {
            CatalogConfig::Http { base_url, .. } => write_1(f, "HTTP", base_url)?,
            CatalogConfig::Local { database_path } => write_1(f, "Local", database_path)?,
        }

        write_title_1(f, "Telemetry")?;
        write_1(f, "Database", &self.telemetry.database_path)?;

        write_title_1(f, "Registry")?;
        write_1(f, "Object", &format!("{}/{}", self.registry.bucket, self.registry.key))?;
        write_1(f, "Interval (s)", &self.registry.interval_seconds)?;
        match &self.registry.store {
            ObjectStoreConfig::Filesystem { root } => write_1(f, "Filesystem", root)?,
            ObjectStoreConfig::Http { endpoint, .. } => write_1(f, "HTTP", endpoint)?,
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/eservice-probing/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}

use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    WriteFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub monitor: MonitorConfig,
    pub auditor: AuditorConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Kafka,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub partitions: i32,
    pub replication: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_topic: Option<String>,
    #[serde(with = "humantime_serde")]
    pub message_timeout: Duration,
    /// Queue bound of the in-process broker
    pub memory_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Client certificate authentication against the brokers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub certificate: path::PathBuf,
    pub key: path::PathBuf,
    pub ca: path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    /// Sites resumed from the store at startup
    pub resume_limit: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// Consumer group members on Kafka; the in-process broker always uses one
    pub readers: usize,
    pub persist_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    #[serde(with = "humantime_serde")]
    pub api_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub task_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: "0.0.0.0:8080".into() }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "beacon.db".into(), pool_size: 8 }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Kafka,
            brokers: vec!["localhost:9092".into()],
            topic: "metrics".into(),
            group_id: "message-reader-group".into(),
            partitions: 4,
            replication: 2,
            dead_letter_topic: Some("metrics.dead-letter".into()),
            message_timeout: Duration::from_secs(5),
            memory_capacity: 1024,
            tls: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_bytes: 1024 * 1024,
            resume_limit: 20,
            user_agent: concat!("beacon/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self { readers: 2, persist_attempts: 3, retry_backoff: Duration::from_millis(200) }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { api_grace: Duration::from_secs(5), task_deadline: Duration::from_secs(10) }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kafka => f.write_str("kafka"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().is_none_or(|ext| ext != "toml") {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/beacon/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("beacon/config.toml"))
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
        let human = |d: Duration| humantime_serde::re::humantime::format_duration(d);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Server")?;
        write_1(f, "Address", &self.server.addr)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Broker")?;
        write_1(f, "Kind", &self.broker.kind)?;
        write_1(f, "Brokers", &self.broker.brokers.join(","))?;
        write_1(f, "Topic", &self.broker.topic)?;
        write_1(f, "Group", &self.broker.group_id)?;
        write_1(
            f,
            "Dead Letters",
            &self.broker.dead_letter_topic.as_deref().unwrap_or("log only"),
        )?;
        write_1(f, "TLS", &self.broker.tls.is_some())?;

        write_title_1(f, "Monitor")?;
        write_1(f, "Request Timeout", &human(self.monitor.request_timeout))?;
        write_1(f, "Body Cap (bytes)", &self.monitor.max_body_bytes)?;
        write_1(f, "Resume Limit", &self.monitor.resume_limit)?;

        write_title_1(f, "Auditor")?;
        write_1(f, "Readers", &self.auditor.readers)?;
        write_1(f, "Persist Attempts", &self.auditor.persist_attempts)?;

        write_title_1(f, "Shutdown")?;
        write_1(f, "API Grace", &human(self.shutdown.api_grace))?;
        write_1(f, "Task Deadline", &human(self.shutdown.task_deadline))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/beacon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// use beacon::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
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
        let write_failed = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }
}

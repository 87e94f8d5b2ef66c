//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known bus name of the Secret Service.
pub const DEFAULT_BUS_NAME: &str = "org.freedesktop.secrets";

/// Object path of the Secret Service root object.
pub const DEFAULT_OBJECT_PATH: &str = "/org/freedesktop/secrets";

/// Main Sesame configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Which service to talk to.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Session negotiation.
    #[serde(default)]
    pub session: SessionConfig,

    /// Prompt settings.
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Well-known bus name owning the service.
    #[serde(default = "default_bus_name")]
    pub bus_name: String,

    /// Object path of the service object.
    #[serde(default = "default_object_path")]
    pub object_path: String,

    /// Standard bus the service lives on.
    #[serde(default)]
    pub bus: BusKind,

    /// D-Bus address to connect to. Takes precedence over `bus`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus_name: default_bus_name(),
            object_path: default_object_path(),
            bus: BusKind::default(),
            address: None,
        }
    }
}

fn default_bus_name() -> String {
    DEFAULT_BUS_NAME.to_string()
}

fn default_object_path() -> String {
    DEFAULT_OBJECT_PATH.to_string()
}

/// A standard message bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::System => f.write_str("system"),
        }
    }
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("Unknown bus '{}', expected session or system", other)),
        }
    }
}

/// Session configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transfer algorithm preference.
    #[serde(default)]
    pub algorithm: AlgorithmPreference,
}

/// Which transfer algorithm to negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmPreference {
    /// Try the encrypted algorithm, fall back to plain if unsupported.
    #[default]
    Auto,
    /// Always use the unencrypted algorithm.
    Plain,
    /// Require the encrypted algorithm.
    DhAes,
}

impl fmt::Display for AlgorithmPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Plain => "plain",
            Self::DhAes => "dh-aes",
        };
        f.write_str(s)
    }
}

impl FromStr for AlgorithmPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "plain" => Ok(Self::Plain),
            "dh-aes" => Ok(Self::DhAes),
            other => Err(format!(
                "Unknown session algorithm '{}', expected auto, plain or dh-aes",
                other
            )),
        }
    }
}

/// Prompt configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Parent window handle passed to the service when prompting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("Unknown log level '{}'", other)),
        }
    }
}

use config::{Config, ConfigError, Environment, File, FileFormat};
use engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit one JSON object per log line instead of text.
    pub json: bool,
    pub format: LoggingFormatConfig,
    pub levels: LoggingLevelsConfig,
    pub redaction: RedactionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingFormatConfig {
    pub show_time: bool,
    pub location: LoggingLocationConfig,
}

impl Default for LoggingFormatConfig {
    fn default() -> Self {
        Self {
            show_time: true,
            location: LoggingLocationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LoggingLocationConfig {
    pub show_file: bool,
    pub show_line: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingLevelsConfig {
    pub debug: bool,
    pub info: bool,
    pub warning: bool,
    pub error: bool,
}

impl Default for LoggingLevelsConfig {
    fn default() -> Self {
        Self {
            debug: false,
            info: false,
            warning: true,
            error: true,
        }
    }
}

impl LoggingLevelsConfig {
    /// The most verbose level enabled, as an `EnvFilter` directive.
    pub fn directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.info {
            "info"
        } else if self.warning {
            "warn"
        } else if self.error {
            "error"
        } else {
            "off"
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RedactionConfig {
    pub enabled: bool,
    /// Also apply the built-in credential patterns.
    pub use_default_patterns: bool,
    pub patterns: Vec<RedactionPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_default_patterns: true,
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionPattern {
    pub name: String,
    pub regex: String,
    pub placeholder: String,
}

/// Layer, lowest precedence first: `datawise.yaml`, `.datawise.yaml`, the
/// explicit `--config` file, then `DATAWISE__SECTION__KEY` environment variables.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::new("datawise.yaml", FileFormat::Yaml).required(false))
        .add_source(File::new(".datawise.yaml", FileFormat::Yaml).required(false));

    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
    }

    // Map nested env vars like DATAWISE__ENGINE__CHUNK_ROWS=500
    builder = builder.add_source(Environment::with_prefix("DATAWISE").separator("__"));

    let config: CliConfig = builder.build()?.try_deserialize()?;
    config
        .engine
        .validate()
        .map_err(|e| ConfigError::Message(format!("engine: {}", e)))?;
    Ok(config)
}

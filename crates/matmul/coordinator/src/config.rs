use config::{Config, Environment};
use eyre::{eyre, Result};
use maskmul_core::SessionConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{parse_config_file, util::prepend_file_path, CliFields};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorProperties {
    pub host: String,
    pub port: u16,
    /// The maximum number of workers registered at the same time
    pub concurrency: usize,
    /// Setting for the aggregation run
    pub aggregation: AggregationProperties,
    /// Setting for the operand matrices
    pub operands: OperandsProperties,
    /// Setting for logging
    pub log: LogProperties,
}

impl CoordinatorProperties {
    pub fn new(cli_fields: &CliFields) -> Result<Self> {
        // Uses config file if given.
        let mut config = if let Some(config_path) = &cli_fields.config {
            let mut config: CoordinatorProperties = parse_config_file(config_path)?;

            // Relative paths in the config file are resolved against the config
            // file's parent directory, so that the binary can be run from anywhere.
            let parent_dir = Path::new(config_path)
                .parent()
                .ok_or(eyre!("Failed to get parent directory of config file"))?
                .to_str()
                .ok_or_else(|| eyre!("Failed to convert path to str"))?
                .to_string();

            if let Some(path) = &config.operands.path {
                config.operands.path = Some(prepend_file_path(path, &parent_dir)?);
            }

            config
        } else {
            let default_config = Config::try_from(&CoordinatorProperties::default())?;

            Config::builder()
                .add_source(default_config)
                // Add in settings from environment variables (with a prefix of MM and '_' as
                // separator).
                .add_source(
                    Environment::with_prefix("MM")
                        .try_parsing(true)
                        .prefix_separator("_")
                        .separator("__"),
                )
                .build()?
                .try_deserialize()?
        };

        cli_fields.apply(&mut config);

        Ok(config)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregationProperties {
    /// Flag to split every cell into a pair of masked shares
    pub privacy: bool,
    /// Number of mask vectors drawn per side when privacy is on
    pub mask_set_size: usize,
    /// Number of seconds the whole aggregation phase may take
    pub timeout: u64,
}

impl AggregationProperties {
    pub fn session_config(&self) -> Result<SessionConfig> {
        SessionConfig::builder()
            .privacy(self.privacy)
            .mask_set_size(self.mask_set_size)
            .aggregation_timeout(Duration::from_secs(self.timeout))
            .build()
            .map_err(|err| eyre!("Invalid aggregation config: {err}"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct OperandsProperties {
    /// File path of the operand matrices (in YAML format, with keys `a` and
    /// `b`). The demo matrices are used when not set
    pub path: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogProperties {
    /// Log verbosity level of the default filtering logic, which is
    /// maskmul_coordinator=<level>,maskmul_core=<level>
    /// Must be either of <https://docs.rs/tracing/latest/tracing/struct.Level.html#implementations>
    pub level: String,
    /// Custom filtering logic, refer to the syntax here https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#example-syntax
    /// This will override the default filtering logic above
    pub filter: Option<String>,
    /// Log format. Available options are "COMPACT" and "JSON"
    pub format: LogFormat,
}

impl Default for CoordinatorProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            concurrency: 32,
            aggregation: Default::default(),
            operands: Default::default(),
            log: Default::default(),
        }
    }
}

impl Default for AggregationProperties {
    fn default() -> Self {
        Self {
            privacy: false,
            mask_set_size: 8,
            timeout: 60,
        }
    }
}

impl Default for LogProperties {
    fn default() -> Self {
        Self {
            level: "DEBUG".to_string(),
            filter: None,
            format: LogFormat::Compact,
        }
    }
}

impl std::fmt::Display for CoordinatorProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "host: {}", self.host)?;
        writeln!(f, "port: {}", self.port)?;
        writeln!(f, "concurrency: {}", self.concurrency)?;
        writeln!(f, "aggregation: \n{}", self.aggregation)?;
        writeln!(f, "operands: \n{}", self.operands)?;
        write!(f, "log: \n{}", self.log)
    }
}

impl std::fmt::Display for AggregationProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "   privacy: {}", self.privacy)?;
        writeln!(f, "   mask_set_size: {}", self.mask_set_size)?;
        write!(f, "   timeout: {}", self.timeout)
    }
}

impl std::fmt::Display for OperandsProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "   path: {:?}", self.path)
    }
}

impl std::fmt::Display for LogProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "   level: {}", self.level)?;
        writeln!(f, "   filter: {:?}", self.filter)?;
        write!(f, "   format: {:?}", self.format)
    }
}

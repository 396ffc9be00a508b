use clap::Parser;

use crate::CoordinatorProperties;

/// Fields loaded from the command line when launching the coordinator.
#[derive(Clone, Debug, Parser)]
#[command(name = "maskmul-coordinator", version, about)]
pub struct CliFields {
    /// Configuration file location
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Split every cell into a pair of masked shares
    #[arg(long)]
    pub privacy: bool,

    /// Number of mask vectors per side
    #[arg(long)]
    pub masks: Option<usize>,

    /// Aggregation timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Operand matrices file (YAML with keys `a` and `b`)
    #[arg(long)]
    pub operands: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliFields {
    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, config: &mut CoordinatorProperties) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.privacy {
            config.aggregation.privacy = true;
        }
        if let Some(masks) = self.masks {
            config.aggregation.mask_set_size = masks;
        }
        if let Some(timeout) = self.timeout {
            config.aggregation.timeout = timeout;
        }
        if let Some(operands) = &self.operands {
            config.operands.path = Some(operands.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

mod cli;
mod config;
mod error;
mod server;
mod server_tracing;
mod service;
mod types;
mod util;

pub use cli::CliFields;
pub use config::{
    AggregationProperties, CoordinatorProperties, LogFormat, LogProperties, OperandsProperties,
};
pub use error::CoordinatorError;
pub use server::{log_outcome, run_coordinator, Coordinator};
pub use server_tracing::init_tracing;
pub use types::{InfoResponse, WorkerRegistry};
pub use util::{demo_operands, load_operands, parse_config_file};

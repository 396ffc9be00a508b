use eyre::Result;
use std::str::FromStr;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::config::{LogFormat, LogProperties};

fn format_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let f = fmt::layer().with_thread_ids(true).with_thread_names(true);
    match format {
        LogFormat::Compact => f.compact().boxed(),
        LogFormat::Json => f.json().boxed(),
    }
}

/// Builds the filter directives from the log config.
pub fn filter_directives(config: &LogProperties) -> Result<String> {
    Ok(match &config.filter {
        // Use custom filter that is provided by user
        Some(filter) => filter.clone(),
        // Use the default filter when only verbosity level is provided
        None => {
            let level = Level::from_str(&config.level)?;
            format!("maskmul_coordinator={level},maskmul_core={level}")
        }
    })
}

pub fn init_tracing(config: &LogProperties) -> Result<()> {
    let filter_layer = EnvFilter::builder().parse(filter_directives(config)?)?;

    Registry::default()
        .with(filter_layer)
        .with(format_layer(config.format))
        .try_init()?;

    Ok(())
}

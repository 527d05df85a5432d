//! Layered configuration: defaults, optional file, then `FIELDSYNC_*` environment

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use fieldsync_core::EngineConfig;

pub const ENV_PREFIX: &str = "FIELDSYNC";

/// Load the engine configuration.
///
/// A missing `path` is fine when it is the default file name; an explicit
/// file that does not exist is an error.
pub fn load(path: Option<&str>) -> Result<EngineConfig> {
    let defaults = Config::try_from(&EngineConfig::default()).context("Failed to encode default configuration")?;

    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name("fieldsync").required(false),
    };

    let merged = Config::builder()
        .add_source(defaults)
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to load configuration")?;

    merged
        .try_deserialize::<EngineConfig>()
        .context("Invalid configuration")
}

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use shared::config::server::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    const fn default_file(self) -> &'static str {
        match self {
            Self::Yaml => "config.yaml",
            Self::Json => "config.json",
        }
    }
}

/// Renders the default server configuration.
///
/// # Errors
/// Serialization failures.
pub fn render_config(format: ConfigFormat) -> Result<String> {
    let config = Config::with_defaults();
    let rendered = match format {
        ConfigFormat::Yaml => serde_yml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)? + "\n",
    };
    Ok(rendered)
}

/// Writes the default server configuration to `output`, stdout for `-`.
///
/// # Errors
/// Serialization or write failures.
pub fn generate_config(format: ConfigFormat, output: Option<&Path>) -> Result<()> {
    let rendered = render_config(format)?;
    let path = output.unwrap_or_else(|| Path::new(format.default_file()));

    if path == Path::new("-") {
        io::stdout().write_all(rendered.as_bytes())?;
        return Ok(());
    }

    fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    eprintln!("Configuration file '{}' generated.", path.display());
    Ok(())
}

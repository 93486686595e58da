//! Configuration loading

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit_path` (from the command line)
/// 2. `WATCHPARTY_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to environment variables only
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var("WATCHPARTY_CONFIG_PATH").ok())
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd).exists().then(|| cwd.to_string())
        });

    // Logging is not up yet, so progress goes to stderr
    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        match Config::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                eprintln!("Falling back to environment variables");
                Config::from_env().unwrap_or_default()
            }
        }
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("HTTP address: {}", config.http_address());

    Ok(config)
}

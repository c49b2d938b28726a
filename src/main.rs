mod config;

use gateway_discovery::{DiscoveryStatus, NetworkInfo};
use tracing_subscriber::EnvFilter;

use config::Config;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging; RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Discovery options: {:?}", config.options);

    let info = NetworkInfo::init_with(config.options);

    if let DiscoveryStatus::Partial { stage, hint, .. } = &info.status {
        tracing::warn!("Incomplete discovery at {}. {}", stage, hint);
    }

    if config.json {
        match serde_json::to_string_pretty(info) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!("Failed to serialize network info: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        println!("{}", info);
    }
}

//! Nodewatch agent
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - NODEWATCH_CONFIG: Path to the JSON configuration (default: conf.json)
//! - NODEWATCH_HOST: Status API bind address (default: 127.0.0.1)
//! - NODEWATCH_PORT: Status API port (default: 8080)
//! - NODEWATCH_TOKEN: Telegram bot token, overrides the config file
//! - RUST_LOG: Log level (default: info)

use nodewatch::config::MonitorConfig;
use nodewatch::engine::{resolve_hostname, Engine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nodewatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("NODEWATCH_CONFIG").unwrap_or_else(|_| "conf.json".to_string());
    let mut config = MonitorConfig::load(&config_path)?;
    config.apply_env();
    let hostname = resolve_hostname(&config);

    tracing::info!("Nodewatch configuration:");
    tracing::info!("  Config file: {}", config_path);
    tracing::info!("  Hostname: {}", hostname);
    tracing::info!("  Checks: {}", config.checks.iter().filter(|c| c.enabled()).count());
    tracing::info!(
        "  Log files: {}",
        config.log_files.iter().filter(|f| f.enabled).count()
    );
    tracing::info!("  Tick interval: {} seconds", config.tick_interval_secs);
    tracing::info!("  Subscribers file: {}", config.subscribers_file.display());
    tracing::info!("  Authorized users: {}", config.authorized.len());
    if config.api.enabled {
        tracing::info!("  Status API: {}:{}", config.api.host, config.api.port);
    } else {
        tracing::info!("  Status API: DISABLED");
    }
    if config.token.is_none() {
        tracing::info!("  Notifier: log (no bot token)");
    }

    println!(
        r#"
                  _                        _       _
  _ __   ___   __| | _____      ____ _| |_ ___| |__
 | '_ \ / _ \ / _` |/ _ \ \ /\ / / _` | __/ __| '_ \
 | | | | (_) | (_| |  __/\ V  V / (_| | || (__| | | |
 |_| |_|\___/ \__,_|\___| \_/\_/ \__,_|\__\___|_| |_|

 Host Monitoring Agent
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    Engine::build(config, hostname).await?.run().await?;
    Ok(())
}

//! Uptime Server binary

use uptime_server::{Config, UptimeServer, setup_tracing_with_otel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Can't use tracing yet - not initialized
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    // Dropping the guard flushes pending spans
    let _telemetry_guard = setup_tracing_with_otel(
        &config.telemetry.service_name,
        &config.telemetry.otlp_endpoint,
        config.telemetry.enabled,
        config.log_level(),
        config.logging.log_format(),
    )?;

    tracing::info!("Uptime Server starting");

    let server = UptimeServer::new(config.to_server_config());
    server.run().await?;

    Ok(())
}

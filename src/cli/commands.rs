// CLI Command Implementations
// Wires configuration, the HTTP server and the shutdown coordinator together

use super::{error, info, success, Commands};
use crate::config::GracefulConfig;
use crate::network::{HealthHandler, HttpServer};
use crate::{observability, shutdown};
use colored::*;
use std::sync::Arc;
use tracing::info as log_info;

/// Execute a CLI command
pub async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { config, verbose } => serve_command(config, verbose).await,
        Commands::Validate { file } => validate_command(file).await,
    }
}

/// Serve until a termination signal arrives and the server has drained
async fn serve_command(config_path: String, verbose: bool) -> anyhow::Result<()> {
    observability::init(verbose)?;

    let config = GracefulConfig::load(&config_path)?;
    let server = Arc::new(HttpServer::serve(&config, Arc::new(HealthHandler::new())).await?);

    // Subscribe only once the server is accepting
    let completion = shutdown::graceful(server.clone())?;

    info(&format!(
        "Listening on {}",
        format!("http://{}", server.local_addr()).cyan().underline()
    ));
    info("Press Ctrl+C for graceful shutdown");

    completion.await?;

    log_info!("Graceful shutdown complete");
    success("Server stopped");
    Ok(())
}

/// Validate configuration
async fn validate_command(file: String) -> anyhow::Result<()> {
    info(&format!("Validating {}", file.bright_white()));

    match GracefulConfig::load(&file) {
        Ok(config) => {
            success("Configuration is valid");
            println!();
            println!("  {} {}", "Listen:".bright_white(), config.server.socket_addr()?);
            match config.shutdown.drain_timeout() {
                Some(timeout) => println!("  {} {:?}", "Drain timeout:".bright_white(), timeout),
                None => println!("  {} {}", "Drain timeout:".bright_white(), "none".dimmed()),
            }
            Ok(())
        }
        Err(e) => {
            error(&format!("Validation failed: {:#}", e));
            Err(e)
        }
    }
}

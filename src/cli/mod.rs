// Command Line Interface Module
// clap-based entry points for serving and validating configuration

pub mod commands;

use clap::{Parser, Subcommand};
use colored::*;

/// HTTP server with signal-driven graceful shutdown
#[derive(Parser)]
#[command(name = "graceful")]
#[command(version)]
#[command(about = "HTTP server that drains in-flight requests on SIGTERM/SIGINT", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve HTTP until SIGTERM or SIGINT, then drain and exit
    Serve {
        /// Configuration file path
        #[arg(short, long, default_value = "graceful.toml")]
        config: String,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long, default_value = "graceful.toml")]
        file: String,
    },
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

//! Mermaid validator entry point

use clap::Parser;
use mermaid_validator::cli::{self, Cli, Commands};
use mermaid_validator::logging;
use mermaid_validator_common::config::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loader = ConfigLoader::from_env();
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Serve(cli::serve::ServeArgs::default()));

    // config only prints; keep its stdout free of log lines.
    if let Commands::Config(args) = &command {
        if let Err(e) = cli::config::execute(args, &config) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let log_dir = logging::log_dir_from_env();
    let _guard = match logging::init(config.log_level, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    match command {
        Commands::Serve(args) => {
            if let Err(e) = cli::serve::execute(&args, config).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Check(args) => match cli::check::execute(&args, config).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Config(_) => {}
    }
}

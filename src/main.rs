//! Auth Kernel - RSA-signed session tokens for multi-tenant clients

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use auth_kernel::{
    auth::clients::hash_secret,
    cli::{Cli, Command},
    config::Config,
    server::{Server, load_keys},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::HashSecret { ref secret }) => {
            println!("{}", hash_secret(secret));
            ExitCode::SUCCESS
        }
        Some(Command::PublicKey { jwk }) => run_public_key(&cli, jwk).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Print the public key, generating the signing key if needed
async fn run_public_key(cli: &Cli, jwk: bool) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let keys = match load_keys(&config).await {
        Ok(keys) => keys,
        Err(e) => {
            error!("Failed to load signing key: {e}");
            return ExitCode::FAILURE;
        }
    };

    if jwk {
        let set = serde_json::json!({ "keys": [keys.public_jwk()] });
        match serde_json::to_string_pretty(&set) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize JWK set: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", keys.public_key_pem());
    }
    ExitCode::SUCCESS
}

async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        clients = config.clients.len(),
        "Starting auth kernel"
    );

    let server = match Server::new(config).await {
        Ok(s) => s,
        Err(e) if e.is_fatal() => {
            error!("Startup aborted: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to start auth kernel: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Auth kernel shutdown complete");
    ExitCode::SUCCESS
}

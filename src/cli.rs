//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Auth Kernel - RSA-signed session tokens for multi-tenant clients
#[derive(Parser, Debug)]
#[command(name = "auth-kernel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_KERNEL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTH_KERNEL_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTH_KERNEL_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTH_KERNEL_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_KERNEL_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Hash a client secret for the `secret_hash` config field
    HashSecret {
        /// Plaintext secret
        #[arg(required = true)]
        secret: String,
    },

    /// Print the public signing key (PEM), generating the key if absent
    PublicKey {
        /// Print the JWK set instead of PEM
        #[arg(long)]
        jwk: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["auth-kernel", "--port", "4000"]).unwrap();

        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(4000));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn hash_secret_takes_positional() {
        let cli = Cli::try_parse_from(["auth-kernel", "hash-secret", "s1"]).unwrap();

        assert!(matches!(cli.command, Some(Command::HashSecret { ref secret }) if secret == "s1"));
    }

    #[test]
    fn public_key_jwk_flag() {
        let cli =
            Cli::try_parse_from(["auth-kernel", "--config", "x.yaml", "public-key", "--jwk"]).unwrap();

        assert!(matches!(cli.command, Some(Command::PublicKey { jwk: true })));
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }

    #[test]
    fn hash_secret_requires_argument() {
        assert!(Cli::try_parse_from(["auth-kernel", "hash-secret"]).is_err());
    }
}

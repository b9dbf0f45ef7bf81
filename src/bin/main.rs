use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use personallog_gateway::auth::{IdentityResolver, PermissionResolver};
use personallog_gateway::config::{self, GatewayConfig};
use personallog_gateway::{TokenCodec, serve};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "personallog-gateway")]
#[command(about = "Tenant-scoped authentication and authorization gateway")]
struct Cli {
    /// Env files to load before reading configuration (defaults to main.env, plus prod.env when APP_ENV=prod)
    #[arg(long = "env-file", global = true)]
    env_files: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (overrides the configured port)
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,
    },
    /// Validate a token with the configured secret and show the resolved identity
    InspectToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("personallog_gateway=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    load_env(&cli.env_files)?;

    match cli.command {
        Commands::Serve { port, host } => {
            let mut config = GatewayConfig::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }

            info!(
                "Starting gateway ({})",
                if config.production { "production" } else { "development" }
            );
            serve(&config, SocketAddr::new(host, config.port)).await?;
        }
        Commands::InspectToken { token } => {
            let config = GatewayConfig::from_env()?;

            let mut codec = TokenCodec::hs256(&config.auth.signing_secret);
            if let Some(audience) = &config.auth.audience {
                codec = codec.with_audience(audience);
            }
            let token = codec.parse(&token)?;
            let mut identity = IdentityResolver::from_claims().resolve_from_token(&token).await?;

            let permissions = PermissionResolver::from_config(&config.auth);
            let record = permissions.resolve_active(&mut identity);

            println!("Token is valid ({:?})", token.signing_method());
            println!();
            println!("  Subject:  {}", identity.id);
            println!("  Email:    {} (verified: {})", identity.email, identity.email_verified);
            if let Some(exp) = token.expires_at().and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
                println!("  Expires:  {}", exp.format("%Y-%m-%d %H:%M:%S UTC"));
            } else {
                println!("  Expires:  Never");
            }
            println!("  Tenant:   {}", permissions.tenant());
            println!("  Role:     {}", record.role);
            if !record.groups.is_empty() {
                println!("  Groups:   {}", record.groups.join(", "));
            }
        }
    }

    Ok(())
}

/// Load explicit env files, or the defaults for `APP_ENV` that exist.
fn load_env(explicit: &[PathBuf]) -> Result<()> {
    if !explicit.is_empty() {
        return config::load_env_files(explicit);
    }

    let present: Vec<&Path> = config::default_env_files()
        .into_iter()
        .map(Path::new)
        .filter(|p| {
            let exists = p.exists();
            if !exists {
                debug!("Env file {} not found, skipping", p.display());
            }
            exists
        })
        .collect();
    config::load_env_files(&present)
}

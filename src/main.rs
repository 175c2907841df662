//! webhook-relay command line
//!
//! # Commands
//!
//! - `webhook-relay serve` - Run the relay server
//! - `webhook-relay check --store FILE` - Validate a store file
//! - `webhook-relay sign --secret B64 --body FILE` - Compute a signature header

use clap::{Args, Parser, Subcommand};
use relay::{Error, InMemoryStore, Pipeline, RelayServer, RelaySettings, Result, SignatureVerifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Verify, reshape and forward inbound webhooks
#[derive(Parser)]
#[command(name = "webhook-relay")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    #[command(alias = "s")]
    Serve(ServeArgs),

    /// Validate a store file and list its inbound URLs
    Check(CheckArgs),

    /// Print a signature header value for a JSON body
    Sign(SignArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Settings file (.toml, .json or .env)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON store file with endpoints and mappings
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    /// JSON store file with endpoints and mappings
    #[arg(long)]
    store: PathBuf,

    /// Settings file, used for the public domain name
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct SignArgs {
    /// Base64 signing secret
    #[arg(long, env = "RELAY_SIGNING_SECRET")]
    secret: String,

    /// Unix timestamp to sign; defaults to now
    #[arg(long)]
    timestamp: Option<String>,

    /// File holding the JSON body
    #[arg(long)]
    body: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    relay_log::init_from_env();

    let result = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Check(args) => check(args),
        Commands::Sign(args) => sign(args),
    };

    if let Err(e) = result {
        error!(error = %e, "webhook-relay failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = RelaySettings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(store) = args.store {
        settings.store_path = Some(store.display().to_string());
    }

    let store = match settings.store_path.as_deref() {
        Some(path) => relay::load_store(Path::new(path))?,
        None => {
            info!("No store file configured, starting with an empty store");
            InMemoryStore::new()
        }
    };
    for endpoint in store.endpoints() {
        info!(
            endpoint = %endpoint.id,
            name = %endpoint.name,
            url = %settings.public_url(&endpoint.inbound_path()),
            "Serving endpoint"
        );
    }

    let pipeline = Pipeline::from_settings(&settings, Arc::new(store))?;
    RelayServer::bind(settings.bind_addr(), pipeline)
        .await?
        .with_max_body_bytes(settings.max_body_bytes)
        .serve()
        .await?;
    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let settings = RelaySettings::load(args.config.as_deref())?;
    let store = relay::load_store(&args.store)?;

    let mut endpoints = store.endpoints();
    endpoints.sort_by(|a, b| a.id.cmp(&b.id));
    for endpoint in &endpoints {
        println!(
            "{}  {}  -> {}",
            settings.public_url(&endpoint.inbound_path()),
            endpoint.name,
            endpoint.destination
        );
    }
    for endpoint in store.dangling_endpoints() {
        println!("warning: endpoint {} references a missing mapping", endpoint.id);
    }
    println!(
        "{} endpoint(s), {} mapping(s) OK",
        store.endpoint_count(),
        store.mapping_count()
    );
    Ok(())
}

fn sign(args: SignArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.body)?;
    let body: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| Error::InvalidArgument(format!("{} is not JSON: {e}", args.body.display())))?;
    let timestamp = args
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp().to_string());

    let header = SignatureVerifier::new(args.secret, "X-Signature").sign(&timestamp, &body)?;
    println!("{header}");
    Ok(())
}

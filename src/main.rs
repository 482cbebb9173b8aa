//! region-cache: inspect and maintain a region cache backend.
//!
//! Connects to the backend named in the configuration file and runs one
//! diagnostic or maintenance command against it.

use clap::Parser;
use tracing::info;

use region_cache::config::{Cli, CliCommand, Config};
use region_cache::metrics::CacheMetrics;
use region_cache::serializer::Codec;
use region_cache::store::{now_millis, StoreClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "region_cache=debug"
    } else {
        "region_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("region-cache v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!(
        backend = ?config.backend.kind,
        host = %config.backend.host,
        port = config.backend.port,
        database = config.backend.database,
        "Configuration loaded"
    );

    let client = StoreClient::connect(&config, CacheMetrics::standalone()).await?;

    match cli.command {
        CliCommand::Ping => {
            println!("{}", client.ping().await?);
        }
        CliCommand::Info => {
            println!("keys: {}", client.size_info().await);
        }
        CliCommand::Keys { region } => {
            for (key, _) in client.raw_entries(&region).await? {
                println!("{}", render_key(client.key_codec(), &key));
            }
        }
        CliCommand::Dump { region } => {
            let entries = client.raw_entries(&region).await?;
            for (key, value) in &entries {
                println!("{}\t{} bytes", render_key(client.key_codec(), key), value.len());
            }
            println!("{} entries", entries.len());
        }
        CliCommand::Expire { region } => {
            let removed = client.expire_region(&region, now_millis()).await?;
            println!("expired {removed} entries from {region}");
        }
        CliCommand::EvictRegion { region } => {
            client.delete_region(&region).await?;
            println!("evicted region {region}");
        }
    }

    Ok(())
}

/// Keys that decode as text print as text, anything else as hex.
fn render_key(codec: Codec, raw: &[u8]) -> String {
    if let Ok(Some(text)) = codec.try_decode::<String>(raw) {
        return text;
    }
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

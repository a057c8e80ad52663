//! entity-query - JSON-lines front end for the query engine
//!
//! Reads one request envelope per line from stdin and writes one response per
//! line to stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use entity_query::config::{Config, LogFormat, StoreConfig};
use entity_query::schema::SchemaRegistry;
use entity_query::service::Engine;
use entity_query::store::{MemoryStore, StoreClient};
use entity_query::wire;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "entity_query=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    tracing::info!("Starting entity-query");

    let schema = SchemaRegistry::load(&config.schema_path)?;
    tracing::info!(
        path = %config.schema_path.display(),
        entities = schema.len(),
        "Schema loaded"
    );

    let store: Arc<dyn StoreClient> = match &config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite(url) => Arc::new(
            entity_query::store::SqliteStore::connect(
                url,
                config.max_connections,
                config.connect_timeout,
            )
            .await?,
        ),
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite(url) => {
            anyhow::bail!("DATABASE_URL {url} needs the `sqlite` feature")
        }
    };
    tracing::info!(store = ?config.store, "Store connected");

    let engine = Engine::new(schema, store);
    engine.sync().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = wire::dispatch_line(&engine, &line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("Input closed, shutting down");
    Ok(())
}

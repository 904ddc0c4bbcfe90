//! Index bridge administration.
//!
//! Inspects the search backend and manages secondary indices outside of the
//! primary storage engine.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use helios_index_bridge::config::{IndexOptions, SearchAuth, SearchClientConfig};
use helios_index_bridge::marshal::{IndexSchema, SchemaDefinition};
use helios_index_bridge::search::{SearchRequest, build_search_body};
use helios_index_bridge::{IndexDescriptor, IndexLifecycleManager, SearchClient};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "index-bridge-admin", version, about = "Manage search-backed secondary indices")]
struct Cli {
    /// Search backend node URLs.
    #[arg(
        long,
        env = "INDEX_BRIDGE_NODES",
        default_value = "http://localhost:9200",
        value_delimiter = ','
    )]
    nodes: Vec<String>,

    /// Username for basic authentication.
    #[arg(long, env = "INDEX_BRIDGE_USERNAME")]
    username: Option<String>,

    /// Password for basic authentication.
    #[arg(long, env = "INDEX_BRIDGE_PASSWORD", requires = "username")]
    password: Option<String>,

    /// Response budget in milliseconds.
    #[arg(long, env = "INDEX_BRIDGE_REQUEST_TIMEOUT_MS", default_value = "30000")]
    request_timeout_ms: u64,

    /// Log level.
    #[arg(long, env = "INDEX_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Shows cluster health and the backend major version.
    Health,
    /// Creates the index of a table if it does not exist.
    EnsureIndex {
        keyspace: String,
        table: String,
        /// JSON schema definition file.
        #[arg(long)]
        schema: PathBuf,
        /// JSON index options file.
        #[arg(long)]
        options: Option<PathBuf>,
        /// Create an auto-rolling index family.
        #[arg(long)]
        rollover: bool,
    },
    /// Deletes the index (or rollover family) of a table.
    DropIndex {
        keyspace: String,
        table: String,
        #[arg(long)]
        rollover: bool,
    },
    /// Runs a filter expression and prints the raw hits.
    Search {
        index: String,
        /// Filter expression as JSON.
        filter: String,
        /// Refresh the index first.
        #[arg(long)]
        refresh: bool,
    },
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_index_bridge={},index_bridge_admin={}", level, level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn client_config(cli: &Cli) -> SearchClientConfig {
    let auth = match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Some(SearchAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };
    SearchClientConfig {
        nodes: cli.nodes.clone(),
        auth,
        request_timeout_ms: cli.request_timeout_ms,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let client = SearchClient::new(client_config(&cli))?;

    match cli.command {
        Command::Health => {
            let health = client.cluster_health().await?;
            let version = client.major_version().await;
            println!(
                "status={} nodes={} data_nodes={} major_version={}",
                health.status, health.number_of_nodes, health.number_of_data_nodes, version
            );
        }
        Command::EnsureIndex {
            keyspace,
            table,
            schema,
            options,
            rollover,
        } => {
            let definition: SchemaDefinition = read_json(&schema)?;
            let schema = IndexSchema::from_definition(&definition)?;
            let mut options: IndexOptions = match options {
                Some(path) => read_json(&path)?,
                None => IndexOptions::default(),
            };
            options.rollover |= rollover;

            let descriptor = IndexDescriptor::new(keyspace, table, options);
            let manager = IndexLifecycleManager::new(client);
            manager.ensure_index(&descriptor, &schema).await?;
            info!(index = %descriptor.name(), "Index ready");
        }
        Command::DropIndex {
            keyspace,
            table,
            rollover,
        } => {
            let options = if rollover {
                IndexOptions::rolling()
            } else {
                IndexOptions::default()
            };
            let descriptor = IndexDescriptor::new(keyspace, table, options);
            IndexLifecycleManager::new(client)
                .drop_index(&descriptor)
                .await?;
            info!(index = %descriptor.name(), "Index dropped");
        }
        Command::Search {
            index,
            filter,
            refresh,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&filter).context("filter is not valid JSON")?;
            let request = SearchRequest::from_json(&value)?;
            if refresh {
                client.refresh_index(&index).await?;
            }
            let response = client.search(&index, &build_search_body(&request), None).await?;
            println!("total={}", response.total);
            for hit in response.hits {
                println!("{} {}", hit.id, serde_json::Value::Object(hit.source));
            }
            if let Some(aggregations) = response.aggregations {
                println!("{}", aggregations);
            }
        }
    }

    Ok(())
}

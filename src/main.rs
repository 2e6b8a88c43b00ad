use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neuromap::{
    cache::ResponseCache,
    config::Config,
    database::Database,
    images::ImageStore,
    ingest,
    locations::LocationService,
    tasks::TaskService,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "neuromap")]
#[command(version = "0.1.0")]
#[command(about = "A neuroimaging meta-analysis web service")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web service (default)
    Serve,
    /// Load a corpus dump into the database
    Ingest {
        /// JSON dump of studies with their peaks
        #[arg(long, value_name = "FILE")]
        studies: PathBuf,

        /// Feature matrix (header of feature names, rows of pmid + frequencies)
        #[arg(long, value_name = "FILE")]
        features: PathBuf,

        /// Optional JSON list of genes with expression images
        #[arg(long, value_name = "FILE")]
        genes: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("neuromap={},tower_http=trace", cli.log_level)
    } else {
        format!("neuromap={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting neuromap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from specified file
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    if let Some(Commands::Ingest {
        studies,
        features,
        genes,
    }) = cli.command
    {
        let summary = ingest::load_corpus(&database, &studies, &features).await?;
        if let Some(genes) = genes {
            ingest::load_genes(&database, &genes).await?;
        }
        info!(
            "Ingest finished: {} studies, {} peaks, {} features",
            summary.studies, summary.peaks, summary.features
        );
        return Ok(());
    }

    // Services are built once here and handed to the web layer
    let store = ImageStore::new(&config.storage);
    store.ensure_storage_dirs().await?;
    info!("Image store ready");

    let cache = ResponseCache::new(&config.cache);

    let (tasks, worker) = TaskService::new(&config.tasks, store.clone());
    tokio::spawn(worker.run());
    info!("Task worker started");

    let locations = LocationService::new(database.clone(), store.clone(), tasks.clone());

    let web_server = WebServer::new(config, database, cache, locations, tasks, store)?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}

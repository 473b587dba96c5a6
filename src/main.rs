use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use visual_product_search::api::ProductSearchApi;
use visual_product_search::config::{Config, EmbedderKind};
use visual_product_search::error::{Result, SearchError};
use visual_product_search::index::SqliteVecIndex;
use visual_product_search::mcp::McpServer;
use visual_product_search::search::{SearchRequest, SearchResponse};

#[derive(Parser)]
#[command(name = "visual-product-search")]
#[command(about = "Reverse image search over a product catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file path (overrides the configuration)
    #[arg(short, long, global = true)]
    db: Option<PathBuf>,

    /// Embedding backend (overrides the configuration)
    #[arg(short, long, global = true, value_enum)]
    embedder: Option<EmbedderKind>,

    /// Model directory (overrides the configuration)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "search.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Embed and index a product catalog (CSV)
    Ingest {
        /// Catalog file path
        file: PathBuf,

        /// Field delimiter
        #[arg(long)]
        delimiter: Option<char>,

        /// Images per embedding batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Find products that look like an image
    Search {
        /// Image URL or local path
        image: String,

        /// Minimum price (inclusive)
        #[arg(long)]
        min_price: Option<f64>,

        /// Maximum price (inclusive)
        #[arg(long)]
        max_price: Option<f64>,

        /// Brand name (case-insensitive exact match)
        #[arg(short, long)]
        brand: Option<String>,

        /// Number of results to return
        #[arg(short = 'n', long)]
        top_k: Option<i64>,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run MCP (Model Context Protocol) server on stdin/stdout
    Serve,

    /// Show index statistics
    Stats,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(embedder) = cli.embedder {
        config.embedder = embedder;
    }
    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }
    Ok(config)
}

fn print_response(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No matching products.");
        return;
    }

    println!("\nSimilar products ({} matched):\n", response.total_found);
    for hit in &response.results {
        let product = &hit.product;
        println!("{}", "-".repeat(50));
        println!("Similarity Score: {:.4}", hit.score);
        println!("Brand: {}", product.brand);
        println!("Price: {:.2}", product.price);
        if !product.review.is_empty() {
            println!("Review: {}", product.review);
        }
        println!("Image URL: {}", product.image_url);
        println!("Product URL: {}", product.product_url);
    }
    println!("{}", "-".repeat(50));
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // MCP server mode: logs MUST go to stderr since stdout is the JSON-RPC transport
    let is_mcp_mode = matches!(cli.command, Commands::Serve);
    let default_level = if is_mcp_mode { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::InitConfig { output, force } => {
            let _span = tracing::info_span!("init_config", output = %output.display()).entered();
            if output.exists() && !force {
                return Err(SearchError::Config(format!(
                    "{} already exists; use --force to overwrite",
                    output.display()
                )));
            }
            Config::example().to_file(&output)?;
            info!("Wrote example configuration");
            println!("Configuration written to {}", output.display());
        }

        Commands::Ingest {
            file,
            delimiter,
            batch_size,
        } => {
            let _span = tracing::info_span!("ingest", file = %file.display()).entered();
            if let Some(delimiter) = delimiter {
                config.csv_delimiter = delimiter;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }

            let api = ProductSearchApi::open(config)?;
            let report = api.ingest_file(&file)?;
            info!(
                rows = report.rows,
                upserted = report.upserted,
                skipped = report.skipped,
                "Ingestion finished"
            );
            println!(
                "Indexed {} of {} rows ({} skipped)",
                report.upserted, report.rows, report.skipped
            );
        }

        Commands::Search {
            image,
            min_price,
            max_price,
            brand,
            top_k,
            json,
        } => {
            let _span = tracing::info_span!("search",
                image = %image,
                ?min_price,
                ?max_price,
                ?brand,
                ?top_k
            )
            .entered();

            let api = ProductSearchApi::open(config)?;
            let request = SearchRequest {
                image_url: image,
                min_price,
                max_price,
                brand,
                top_k,
            };
            let response = api.search(&request)?;
            info!(
                count = response.results.len(),
                total_found = response.total_found,
                "Search completed"
            );

            // Results go to stdout, logs to stderr
            if json {
                let text = serde_json::to_string_pretty(&response)
                    .map_err(|e| SearchError::Internal(e.to_string()))?;
                println!("{}", text);
            } else {
                print_response(&response);
            }
        }

        Commands::Serve => {
            let _span = tracing::info_span!("serve").entered();

            // The blocking HTTP client must be created and dropped outside the runtime
            let api = ProductSearchApi::open(config)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            info!("Starting MCP server on stdio");
            let server = McpServer::new(api.orchestrator());
            let result = runtime.block_on(server.run());
            drop(server);
            drop(runtime);
            drop(api);
            result?;
        }

        Commands::Stats => {
            let _span = tracing::info_span!("stats").entered();
            let index = SqliteVecIndex::open_existing(&config.db_path)?;
            let stats = index.stats()?;
            info!(entries = stats.entries, "Retrieved statistics");

            println!("Index Statistics:");
            println!("  Products:       {}", stats.entries);
            println!("  Model:          {}", stats.model);
            println!("  Dimension:      {}", stats.dimension);
            println!("  Metric:         {}", stats.metric.as_db_str());
            println!("  Schema version: {}", stats.schema_version);
            if let Some(updated) = &stats.last_updated {
                println!("  Last updated:   {}", updated);
            }
        }
    }

    Ok(())
}

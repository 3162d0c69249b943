mod ingest;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trendcast_engine::{
    Accumulator, AccumulatorSettings, PublisherSettings, TrendPublisher, WindowAggregator,
};

#[derive(Debug, Parser)]
#[command(name = "trendcast-cli")]
#[command(about = "Trendcast command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge JSON-lines observation messages into the stats store
    Ingest {
        /// Read messages from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Run one window aggregation pass
    Aggregate {
        /// Evaluate the window at this unix time instead of now
        #[arg(long)]
        now: Option<i64>,
    },
    /// Print the current ranked view as JSON
    Trends,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("trendcast-cli: no command given; try --help");
        return Ok(());
    };

    let config = trendcast_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let store = trendcast_store::open_store(&config).await?;

    match command {
        Commands::Ingest { file } => {
            let accumulator = Accumulator::new(store, AccumulatorSettings::from_config(&config));
            let summary = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(&path).await?;
                    ingest::ingest_lines(&accumulator, tokio::io::BufReader::new(file)).await?
                }
                None => {
                    ingest::ingest_lines(&accumulator, tokio::io::BufReader::new(tokio::io::stdin()))
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Aggregate { now } => {
            let aggregator = WindowAggregator::new(store, config.window);
            let now = now.unwrap_or_else(trendcast_engine::unix_now);
            let result = aggregator.run_pass(now).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Trends => {
            let publisher = TrendPublisher::new(store, PublisherSettings::from_config(&config));
            let view = publisher.current_view().await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}

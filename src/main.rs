pub mod color;
pub mod config;
pub mod data;
pub mod interaction;
pub mod map;
pub mod projection;
pub mod render;
pub mod server;
pub mod types;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one selection to an SVG file
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// "all" or a state name, e.g. "new york"
        #[arg(short, long, default_value = "all")]
        selection: String,
        #[arg(short, long, value_name = "FILE", default_value = "map.svg")]
        output: PathBuf,
    },
    /// Serve the interactive map
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// List the accepted selections
    Regions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render {
            config,
            selection,
            output,
        } => {
            info!("Rendering map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let selection: types::Selection = selection.parse()?;

            // 1. Load statistics (an unusable file leaves every region uncolored)
            let table =
                data::OwnershipTable::load_or_empty(&app_config.input.data_csv, &app_config.input);

            // 2. Fetch shapes and draw
            let source = data::source_from_config(&app_config.input)?;
            let mut renderer = map::MapRenderer::new(&app_config, Arc::new(table))?;
            renderer
                .select(source.as_ref(), selection, &app_config.input.join_property_shape)
                .await;

            // 3. Write SVG
            std::fs::write(output, renderer.to_svg())
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!("Wrote {:?}", output);
        }
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            let table =
                data::OwnershipTable::load_or_empty(&app_config.input.data_csv, &app_config.input);
            let source = data::source_from_config(&app_config.input)?;
            let renderer = map::MapRenderer::new(&app_config, Arc::new(table))?;

            server::start_server(app_config, renderer, source).await?;
        }
        Commands::Regions => {
            for option in types::Selection::options() {
                println!("{}", option);
            }
        }
    }

    Ok(())
}

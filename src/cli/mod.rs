pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "campus")]
#[command(about = "Campus data CLI - inspect tenant storage targets and run advanced queries")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, help = "Output in YAML format")]
    pub yaml: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Print the physical collection an entity type resolves to")]
    Target(commands::target::TargetArgs),

    #[command(about = "List registered entity types and their base collections")]
    Entities,

    #[command(about = "Run an advanced query against PostgreSQL (DATABASE_URL)")]
    Find(commands::find::FindArgs),

    #[command(about = "Check connectivity to the database in DATABASE_URL")]
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else if cli.yaml {
            OutputFormat::Yaml
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Target(args) => commands::target::handle(args, output_format).await,
        Commands::Entities => commands::entities::handle(output_format).await,
        Commands::Find(args) => commands::find::handle(args, output_format).await,
        Commands::Health => commands::health::handle(output_format).await,
    }
}

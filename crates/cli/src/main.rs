use clap::{Parser, Subcommand};

mod commands;

use commands::{PaperArgs, ParseArgs, SizeArgs, ValidateArgs};

#[derive(Parser)]
#[command(name = "perp-guard")]
#[command(about = "Governance pipeline for LLM-driven futures trading decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a raw model response into reasoning and ordered decisions
    Parse(ParseArgs),
    /// Parse and validate a model response against account equity and leverage caps
    Validate(ValidateArgs),
    /// Compute the adjusted size for an opening decision
    Size(SizeArgs),
    /// Run decision cycles against the paper exchange with scripted responses
    Paper(PaperArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Parse(args) => commands::run_parse(&args)?,
        Commands::Validate(args) => commands::run_validate(&args)?,
        Commands::Size(args) => commands::run_size(&args),
        Commands::Paper(args) => commands::run_paper(args).await?,
    }

    Ok(())
}

//! Operator CLI for explore-llm.
//!
//! Runs one operation against the configured completion service and prints the
//! JSON result, or prints the rendered prompt with --dry-run.
//!
//! Usage:
//!   cargo run --bin explore -- decompose "Plan a wedding" --user-context "small budget" --option rustic
//!   cargo run --bin explore -- options "Choose a venue" --context "Plan a wedding"
//!   cargo run --bin explore -- summary "Plan a wedding" --dry-run

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use explore_llm::prompts::PromptRegistry;
use explore_llm::{
    Config, DecomposeRequest, Operation, Operations, OptionsRequest, SummaryRequest, init_tracing,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "explore")]
#[command(about = "Run explore-llm operations from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Goal (or sub-problem) text
    text: String,
    /// Free-form description of the user
    #[arg(long, default_value = "")]
    user_context: String,
    /// Previously selected option; repeat for several
    #[arg(long = "option")]
    selected_options: Vec<String>,
    /// Print the rendered prompt instead of calling the completion service
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Break a goal into sub-problems
    Decompose(Common),
    /// Recommend a choice and list options for a sub-problem
    Options {
        #[command(flatten)]
        common: Common,
        /// The overall goal the sub-problem belongs to
        #[arg(long)]
        context: Option<String>,
    },
    /// Produce the final personalised answer
    Summary(Common),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("explore_llm=warn");
    let cli = Cli::parse();

    match cli.command {
        Commands::Decompose(c) => {
            let request = DecomposeRequest {
                text: c.text,
                user_context: c.user_context,
                selected_options: c.selected_options,
            };
            execute(request, c.dry_run).await
        }
        Commands::Options { common: c, context } => {
            let request = OptionsRequest {
                text: c.text,
                context,
                user_context: c.user_context,
                selected_options: c.selected_options,
            };
            execute(request, c.dry_run).await
        }
        Commands::Summary(c) => {
            let request = SummaryRequest {
                text: c.text,
                user_context: c.user_context,
                selected_options: c.selected_options,
            };
            execute(request, c.dry_run).await
        }
    }
}

async fn execute<O>(request: O, dry_run: bool) -> Result<()>
where
    O: Operation + Sync,
    O::Output: Serialize,
{
    if dry_run {
        let doc = request.render(&PromptRegistry::new())?;
        eprintln!("# {} v{} sha1:{}", doc.prompt_id, doc.version, doc.checksum);
        println!("{}", doc.text);
        return Ok(());
    }

    let config = Config::load()?;
    let operations = Operations::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let output = operations.run(&request, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

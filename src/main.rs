use clap::Parser;
use crm_agent_gateway::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cli::serve::run().await,
        Command::GenerateKey(args) => cli::generate_key::run(args).await,
    }
}

//! CLI module for the agent gateway
//!
//! - `serve`: run the HTTP server
//! - `generate-key`: print a fresh agent API key and its stored hash

pub mod generate_key;
pub mod serve;

use clap::{Parser, Subcommand};

/// CRM Agent Gateway - API key authentication for AI agents
#[derive(Parser)]
#[command(name = "crm-agent-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway HTTP server
    Serve,

    /// Generate an API key for seeding a key store out of band
    GenerateKey(generate_key::GenerateKeyArgs),
}

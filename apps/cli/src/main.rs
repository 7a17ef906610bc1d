//! cardsync CLI: imports vCards mailed to a Mandrill inbound address into the CRM.
//!
//! Runs the webhook server, imports local `.vcf` files, and manages the
//! config file and the CRM store.

mod commands;
mod server;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

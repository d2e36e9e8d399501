mod cli;
mod ls;
mod token;
mod util;

use clap::Parser;
use cli::{Cli, Commands};
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Ls(args) => ls::run_ls(args).await,
        Commands::Token(args) => token::run_token(args),
    }
}

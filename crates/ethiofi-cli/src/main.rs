use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = ethiofi_cli::Cli::parse();
    ethiofi_cli::run_cli(cli)
}

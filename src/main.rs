//! Atomforge CLI - commit/reveal operation builder entry point

use anyhow::Result;
use clap::Parser;

use atomforge::commands::*;

#[derive(Parser, Debug)]
#[command(
    name = "atomforge",
    about = "Atomicals commit/reveal builder: mint, deploy, bitwork mining"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Mint a non-fungible atomical (realm/subrealm/container/item claims)
    MintNft(MintNftOpts),
    /// Deploy a direct fixed-supply fungible token
    MintFt(MintFtOpts),
    /// Deploy a decentralized fungible token and its mint terms
    DeployDft(DeployDftOpts),
    /// Mint against a deployed dft ticker
    MintDft(MintDftOpts),
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::MintNft(o) => run_mint_nft(o),
        Commands::MintFt(o) => run_mint_ft(o),
        Commands::DeployDft(o) => run_deploy_dft(o),
        Commands::MintDft(o) => run_mint_dft(o),
    }
}

//! Decentralized mint (dmt) against a deployed dft ticker. The deploy's
//! mint terms (amount, bitwork) are supplied by the caller; resolving them
//! from an indexer happens outside this tool.

use anyhow::{ensure, Result};
use secp256k1::Secp256k1;

use crate::bitcoin_utils::keys::KeyInfo;
use crate::builder::{AtomicalOperationBuilder, OperationKind};
use crate::client::{EsploraClient, StdinConfirm};
use crate::types::OutputRequest;

use super::*;

#[derive(clap::Parser, Debug)]
pub struct MintDftOpts {
    #[command(flatten)]
    pub node: NodeOpts,

    /// Deployed ticker to mint against
    #[arg(long)]
    pub ticker: String,

    /// Units minted by this operation (the deploy's mint_amount)
    #[arg(long)]
    pub mint_amount: u64,

    /// Receiver address; defaults to the funding address
    #[arg(long)]
    pub destination: Option<String>,
}

pub fn run_mint_dft(o: MintDftOpts) -> Result<()> {
    ensure!(o.mint_amount > 0, "--mint-amount must be positive");
    let network = parse_network(&o.node.network)?;
    let secp = Secp256k1::new();
    let funding = KeyInfo::from_key_str(&secp, &o.node.funding_wif, network)?;
    let client = EsploraClient::new(&o.node.esplora);
    let confirm = StdinConfirm;

    let ticker = o.ticker.strip_prefix('$').unwrap_or(&o.ticker).to_string();
    let mut builder = AtomicalOperationBuilder::new(
        builder_options(&o.node, OperationKind::Dmt { mint_ticker: ticker })?,
        &client,
        &confirm,
    );
    apply_bitwork(&mut builder, &o.node)?;

    let destination = match &o.destination {
        Some(addr) => parse_address(addr, network)?,
        None => funding.address.clone(),
    };
    builder.add_output(OutputRequest::to_address(destination, o.mint_amount));

    let result = builder.start(&funding)?;
    print_result(&result)
}

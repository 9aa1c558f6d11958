//! Direct fixed-supply fungible token deploy

use anyhow::{ensure, Result};
use secp256k1::Secp256k1;

use crate::bitcoin_utils::keys::KeyInfo;
use crate::builder::{AtomicalOperationBuilder, OperationKind};
use crate::client::{EsploraClient, StdinConfirm};
use crate::types::OutputRequest;

use super::*;

#[derive(clap::Parser, Debug)]
pub struct MintFtOpts {
    #[command(flatten)]
    pub node: NodeOpts,

    /// Ticker to claim (leading '$' optional)
    #[arg(long)]
    pub ticker: String,

    /// Fixed supply in satoshi-denominated units, colored on the output
    #[arg(long)]
    pub supply: u64,

    /// Token owner address; defaults to the funding address
    #[arg(long)]
    pub destination: Option<String>,

    /// Inline JSON object of payload data fields
    #[arg(long)]
    pub data: Option<String>,
}

pub fn run_mint_ft(o: MintFtOpts) -> Result<()> {
    ensure!(o.supply > 0, "--supply must be positive");
    let network = parse_network(&o.node.network)?;
    let secp = Secp256k1::new();
    let funding = KeyInfo::from_key_str(&secp, &o.node.funding_wif, network)?;
    let client = EsploraClient::new(&o.node.esplora);
    let confirm = StdinConfirm;

    let mut builder = AtomicalOperationBuilder::new(
        builder_options(&o.node, OperationKind::Ft)?,
        &client,
        &confirm,
    );
    apply_bitwork(&mut builder, &o.node)?;
    builder.set_request_ticker(&o.ticker)?;
    if let Some(data) = &o.data {
        builder.set_user_data(payload_from_json(data)?)?;
    }

    let destination = match &o.destination {
        Some(addr) => parse_address(addr, network)?,
        None => funding.address.clone(),
    };
    builder.add_output(OutputRequest::to_address(destination, o.supply));

    let result = builder.start(&funding)?;
    print_result(&result)
}

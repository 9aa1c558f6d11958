//! Decentralized fungible token deploy: publishes the mint terms that later
//! dmt mints must satisfy.

use anyhow::{ensure, Result};
use ciborium::value::Value;
use secp256k1::Secp256k1;

use crate::bitcoin_utils::keys::KeyInfo;
use crate::bitwork::Bitwork;
use crate::builder::{AtomicalOperationBuilder, OperationKind};
use crate::client::{EsploraClient, StdinConfirm};
use crate::types::{OutputRequest, DEFAULT_SATS_ATOMICAL_UTXO};

use super::*;

#[derive(clap::Parser, Debug)]
pub struct DeployDftOpts {
    #[command(flatten)]
    pub node: NodeOpts,

    /// Ticker to claim (leading '$' optional)
    #[arg(long)]
    pub ticker: String,

    /// Maximum number of decentralized mints
    #[arg(long)]
    pub max_mints: u64,

    /// Units minted per dmt operation
    #[arg(long)]
    pub mint_amount: u64,

    /// First block height at which mints are allowed
    #[arg(long, default_value_t = 0)]
    pub mint_height: u32,

    /// Commit bitwork each mint must satisfy ("any" defers to miners)
    #[arg(long)]
    pub mint_bitworkc: Option<String>,

    /// Reveal bitwork each mint must satisfy
    #[arg(long)]
    pub mint_bitworkr: Option<String>,

    /// Value of the deploy output in satoshis
    #[arg(long, default_value_t = DEFAULT_SATS_ATOMICAL_UTXO)]
    pub satsoutput: u64,

    /// Receiver address; defaults to the funding address
    #[arg(long)]
    pub destination: Option<String>,
}

pub fn run_deploy_dft(o: DeployDftOpts) -> Result<()> {
    ensure!(o.max_mints > 0, "--max-mints must be positive");
    ensure!(o.mint_amount > 0, "--mint-amount must be positive");
    let network = parse_network(&o.node.network)?;
    let secp = Secp256k1::new();
    let funding = KeyInfo::from_key_str(&secp, &o.node.funding_wif, network)?;
    let client = EsploraClient::new(&o.node.esplora);
    let confirm = StdinConfirm;

    let mut builder = AtomicalOperationBuilder::new(
        builder_options(&o.node, OperationKind::Dft)?,
        &client,
        &confirm,
    );
    apply_bitwork(&mut builder, &o.node)?;
    builder.set_request_ticker(&o.ticker)?;

    // Mint terms ride in args; "any" is accepted here as a recorded
    // pass-through, it only refuses to be a minable target itself.
    let mut args: Vec<(String, Value)> = vec![
        ("mint_amount".into(), Value::from(o.mint_amount)),
        ("mint_height".into(), Value::from(o.mint_height as u64)),
        ("max_mints".into(), Value::from(o.max_mints)),
    ];
    if let Some(raw) = &o.mint_bitworkc {
        let bitwork = Bitwork::parse(raw)?;
        args.push(("mint_bitworkc".into(), Value::Text(bitwork.to_string())));
    }
    if let Some(raw) = &o.mint_bitworkr {
        let bitwork = Bitwork::parse(raw)?;
        args.push(("mint_bitworkr".into(), Value::Text(bitwork.to_string())));
    }
    builder.set_args(args);

    let destination = match &o.destination {
        Some(addr) => parse_address(addr, network)?,
        None => funding.address.clone(),
    };
    builder.add_output(OutputRequest::to_address(destination, o.satsoutput));

    let result = builder.start(&funding)?;
    print_result(&result)
}

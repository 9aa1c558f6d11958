//! Command handlers for each subcommand

pub mod deploy_dft;
pub mod mint_dft;
pub mod mint_ft;
pub mod mint_nft;

pub use deploy_dft::*;
pub use mint_dft::*;
pub use mint_ft::*;
pub use mint_nft::*;

use anyhow::{bail, Context, Result};
use bitcoin::{address::NetworkUnchecked, Address, Network};

use crate::bitwork::Bitwork;
use crate::builder::{
    AtomicalOperationBuilder, BuilderOptions, FeeRate, OperationKind, OperationResult,
};
use crate::payload::{json_to_cbor, Payload};

/// Options shared by every operation command.
#[derive(clap::Args, Debug)]
pub struct NodeOpts {
    /// Network: mainnet|testnet|signet|regtest
    #[arg(long, default_value = "mainnet")]
    pub network: String,

    /// Esplora API base URL
    #[arg(long, default_value = "https://blockstream.info/api")]
    pub esplora: String,

    /// Fee rate in sat/vB; a negative value auto-detects from the ledger
    #[arg(long, default_value_t = -1)]
    pub satsbyte: i64,

    /// Funding private key (WIF or raw hex)
    #[arg(long)]
    pub funding_wif: String,

    /// Opt in to replace-by-fee input sequences
    #[arg(long, default_value_t = false)]
    pub rbf: bool,

    /// Mining worker count (default: available cores minus one)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempt ceiling for bitwork searches; 0 searches forever
    #[arg(long, default_value_t = 0)]
    pub max_attempts: u64,

    /// Commit bitwork target, e.g. "0000" or "ab.8"
    #[arg(long)]
    pub bitworkc: Option<String>,

    /// Reveal bitwork target
    #[arg(long)]
    pub bitworkr: Option<String>,
}

pub(crate) fn parse_network(s: &str) -> Result<Network> {
    Ok(match s {
        "mainnet" => Network::Bitcoin,
        "testnet" => Network::Testnet,
        "signet" => Network::Signet,
        "regtest" => Network::Regtest,
        _ => bail!("--network must be mainnet|testnet|signet|regtest"),
    })
}

pub(crate) fn parse_address(s: &str, network: Network) -> Result<Address> {
    Ok(s.parse::<Address<NetworkUnchecked>>()
        .with_context(|| format!("invalid address '{s}'"))?
        .require_network(network)?)
}

pub(crate) fn builder_options(node: &NodeOpts, op: OperationKind) -> Result<BuilderOptions> {
    let network = parse_network(&node.network)?;
    let mut options = BuilderOptions::new(network, op);
    options.satsbyte = FeeRate::from_arg(node.satsbyte)?;
    options.rbf = node.rbf;
    options.workers = node.workers;
    options.max_mining_attempts = (node.max_attempts > 0).then_some(node.max_attempts);
    Ok(options)
}

pub(crate) fn apply_bitwork(
    builder: &mut AtomicalOperationBuilder<'_>,
    node: &NodeOpts,
) -> Result<()> {
    if let Some(raw) = &node.bitworkc {
        builder.set_bitwork_commit(Bitwork::parse(raw)?)?;
    }
    if let Some(raw) = &node.bitworkr {
        builder.set_bitwork_reveal(Bitwork::parse(raw)?)?;
    }
    Ok(())
}

/// Parse an inline JSON object into caller payload data.
pub(crate) fn payload_from_json(raw: &str) -> Result<Payload> {
    let json: serde_json::Value =
        serde_json::from_str(raw).context("payload data is not valid JSON")?;
    let serde_json::Value::Object(map) = json else {
        bail!("payload data must be a JSON object");
    };
    let mut payload = Payload::new();
    for (key, value) in &map {
        payload.insert_user(key.clone(), json_to_cbor(value))?;
    }
    Ok(payload)
}

pub(crate) fn print_result(result: &OperationResult) -> Result<()> {
    let mut doc = serde_json::json!({
        "success": true,
        "data": {
            "commitTxid": result.commit_txid.to_string(),
            "revealTxid": result.reveal_txid.to_string(),
        }
    });
    let data = doc["data"].as_object_mut().expect("data object");
    if let Some(id) = &result.atomical_id {
        data.insert("atomicalId".into(), id.clone().into());
    }
    if let Some(id) = &result.data_id {
        data.insert("dataId".into(), id.clone().into());
    }
    if let Some(urn) = &result.urn {
        data.insert("urn".into(), urn.clone().into());
    }
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

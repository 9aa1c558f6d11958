//! NFT mint command: optional realm/subrealm/container/item claims

use anyhow::{bail, Result};
use secp256k1::Secp256k1;

use crate::builder::{AtomicalOperationBuilder, OperationKind, RealmClaimType};
use crate::client::{EsploraClient, StdinConfirm};
use crate::bitcoin_utils::keys::KeyInfo;
use crate::types::{OutputRequest, DEFAULT_SATS_ATOMICAL_UTXO};

use super::*;

#[derive(clap::Parser, Debug)]
pub struct MintNftOpts {
    #[command(flatten)]
    pub node: NodeOpts,

    /// Value of the minted output in satoshis
    #[arg(long, default_value_t = DEFAULT_SATS_ATOMICAL_UTXO)]
    pub satsoutput: u64,

    /// Receiver address; defaults to the funding address
    #[arg(long)]
    pub destination: Option<String>,

    /// Claim a top-level realm name (leading '+' optional)
    #[arg(long)]
    pub request_realm: Option<String>,

    /// Claim a subrealm, e.g. "parent.child" (requires --parent-realm)
    #[arg(long)]
    pub request_subrealm: Option<String>,

    /// Parent realm atomical id for a subrealm claim
    #[arg(long)]
    pub parent_realm: Option<String>,

    /// Subrealm claim type: direct|rule
    #[arg(long, default_value = "direct")]
    pub claim_type: String,

    /// Claim a container name (leading '#' optional)
    #[arg(long)]
    pub request_container: Option<String>,

    /// Claim an item inside a container (requires --parent-container)
    #[arg(long)]
    pub request_item: Option<String>,

    /// Parent container atomical id for an item claim
    #[arg(long)]
    pub parent_container: Option<String>,

    /// Declare membership in a container (leading '#' optional)
    #[arg(long)]
    pub container: Option<String>,

    /// Inline JSON object of payload data fields
    #[arg(long)]
    pub data: Option<String>,
}

pub fn run_mint_nft(o: MintNftOpts) -> Result<()> {
    let network = parse_network(&o.node.network)?;
    let secp = Secp256k1::new();
    let funding = KeyInfo::from_key_str(&secp, &o.node.funding_wif, network)?;
    let client = EsploraClient::new(&o.node.esplora);
    let confirm = StdinConfirm;

    let mut builder = AtomicalOperationBuilder::new(
        builder_options(&o.node, OperationKind::Nft)?,
        &client,
        &confirm,
    );
    apply_bitwork(&mut builder, &o.node)?;

    if let Some(data) = &o.data {
        builder.set_user_data(payload_from_json(data)?)?;
    }
    if let Some(name) = &o.request_realm {
        builder.set_request_realm(name)?;
    }
    if let Some(name) = &o.request_subrealm {
        let Some(parent) = &o.parent_realm else {
            bail!("--request-subrealm needs --parent-realm");
        };
        let claim = match o.claim_type.as_str() {
            "direct" => RealmClaimType::Direct,
            "rule" => RealmClaimType::Rule,
            other => bail!("--claim-type must be direct|rule, got '{other}'"),
        };
        builder.set_request_subrealm(name, parent, claim)?;
    }
    if let Some(name) = &o.request_container {
        builder.set_request_container(name)?;
    }
    if let Some(item) = &o.request_item {
        let Some(parent) = &o.parent_container else {
            bail!("--request-item needs --parent-container");
        };
        builder.set_request_item(item, parent)?;
    }
    if let Some(name) = &o.container {
        builder.set_container_membership(name)?;
    }

    let destination = match &o.destination {
        Some(addr) => parse_address(addr, network)?,
        None => funding.address.clone(),
    };
    builder.add_output(OutputRequest::to_address(destination, o.satsoutput));

    let result = builder.start(&funding)?;
    print_result(&result)
}

//! Atomforge: commit/reveal operation builder and bitwork miner for the
//! Atomicals protocol on a Bitcoin-style ledger.

pub mod bitcoin_utils;
pub mod bitwork;
pub mod builder;
pub mod client;
pub mod commands;
pub mod fees;
pub mod miner;
pub mod payload;
pub mod types;

pub use bitwork::{has_valid_bitwork, Bitwork};
pub use builder::{
    AtomicalOperationBuilder, BuilderError, BuilderOptions, FeeRate, OperationKind,
    OperationResult, ParentInput, RealmClaimType,
};
pub use client::{Confirm, DenyAll, EsploraClient, LedgerClient, LedgerError, StdinConfirm};
pub use payload::Payload;

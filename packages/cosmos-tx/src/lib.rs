//! Signer management and sequence-safe transaction broadcasting for CosmWasm
//! chains over gRPC.

pub use address::{
    convert_address, is_valid_address, parse_raw_address, Address, AddressHrp, HasAddress,
    RawAddress,
};
pub use batch::chunk_messages;
pub use broadcast::{BroadcastConfig, Broadcaster};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use client::{BlockInfo, Cosmos};
pub use cosmos_builder::CosmosBuilder;
pub use cosmos_network::CosmosNetwork;
pub use cosmos_sdk_proto as proto;
pub use cosmos_sdk_proto::cosmos::base::v1beta1::Coin;
pub use error::{
    Action, AddressError, BuilderError, Error, FailureKind, QueryError, ValidationError,
    WalletError,
};
pub use ext::TxResponseExt;
pub use factory::{BroadcastResponse, TxFactory, TxMeta};
pub use gas_price::GasPrice;
pub use sequence::{AccountState, ResyncOutcome};
pub use signer::Signer;
pub use txbuilder::{TxBuilder, TxMessage};
pub use wallet::{RawWallet, SeedPhrase, Wallet};

#[cfg(feature = "clap")]
pub use crate::clap::CosmosOpt;

mod address;
mod batch;
mod broadcast;
mod cancel;
#[cfg(feature = "clap")]
mod clap;
mod client;
mod cosmos_builder;
mod cosmos_network;
mod error;
mod ext;
mod factory;
mod gas_price;
mod sequence;
mod signer;
mod txbuilder;
mod wallet;

//! Client-side ERC-4337 toolkit: assemble a UserOperation, coordinate gas
//! estimation and paymaster sponsorship, compute the version-correct hash,
//! sign, submit through a bundler and poll for the receipt.
//!
//! The center of the crate is [`builder::UserOpBuilder`], a single-use state
//! machine driving one operation from empty to confirmed. It delegates to
//! three capability seams: [`bundler::BundlerClient`] for the `eth_*`
//! namespace, [`paymaster::PaymasterProvider`] for sponsorship (ERC-7677
//! services or local strategies) and [`signer::UserOpSigner`] for signatures.
//! All of them run over the [`rpc::JsonRpcTransport`] trait, so tests inject
//! canned transports and production uses [`rpc::HttpTransport`].
//!
//! Entry point versions v0.6, v0.7 and v0.8 are supported with their
//! respective wire layouts, packed encodings and signing schemes; see
//! [`types::EntryPointVersion`].

pub mod account;
pub mod builder;
pub mod bundler;
pub mod config;
pub mod encoding;
pub mod error;
pub mod paymaster;
pub mod rpc;
pub mod signer;
pub mod types;

pub use builder::{BuilderState, UserOpBuilder};
pub use bundler::BundlerClient;
pub use config::ChainProfile;
pub use error::{Error, Result, RpcError};
pub use paymaster::{Erc7677Client, PaymasterProvider, PublicPaymaster, TokenPermitPaymaster};
pub use rpc::{HttpTransport, JsonRpcTransport};
pub use signer::{EcdsaSigner, UserOpSigner};
pub use types::{
    EntryPointVersion, GasEstimates, GasPrice, GasPriceTiers, UserOperation, UserOperationReceipt,
};

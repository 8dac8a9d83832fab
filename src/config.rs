use std::{env, fs, path::Path};

use ethers::types::Address;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    types::EntryPointVersion,
};

/// Canonical entry point deployments (same address on every chain).
pub const ENTRY_POINT_V0_6: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
pub const ENTRY_POINT_V0_7: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";
pub const ENTRY_POINT_V0_8: &str = "0x4337084D9E255Ff0702461CF8895CE9E3b5Ff108";

/// The canonical entry point address for a version.
pub fn canonical_entry_point(version: EntryPointVersion) -> Address {
    let addr = match version {
        EntryPointVersion::V0_6 => ENTRY_POINT_V0_6,
        EntryPointVersion::V0_7 => ENTRY_POINT_V0_7,
        EntryPointVersion::V0_8 => ENTRY_POINT_V0_8,
    };
    // the constants above are valid hex by construction
    addr.parse().unwrap()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainProfileRaw {
    chain_id: u64,
    rpc: String,
    #[serde(default)]
    rpc_env_var: Option<String>,
    bundler: String,
    #[serde(default)]
    paymaster: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
    entry_point_version: EntryPointVersion,
    #[serde(default)]
    factory: Option<String>,
}

/// Per-chain wiring loaded from a JSON profile: endpoints, entry point and
/// optional factory/paymaster addresses.
#[derive(Debug, Clone)]
pub struct ChainProfile {
    pub chain_id: u64,
    pub rpc_url: String,
    pub bundler_url: String,
    pub paymaster_url: Option<String>,
    pub entry_point: Address,
    pub entry_point_version: EntryPointVersion,
    pub factory: Option<Address>,
}

impl ChainProfile {
    /// Loads a profile from disk. `rpc_override` wins over everything; the
    /// profile's `rpcEnvVar` (when set and present in the environment) wins
    /// over the baked-in `rpc` value, so keys stay out of committed profiles.
    pub fn load(path: &Path, rpc_override: Option<String>) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read chain profile {}: {e}", path.display()))
        })?;
        Self::from_json(&raw, rpc_override)
    }

    pub fn from_json(raw: &str, rpc_override: Option<String>) -> Result<Self> {
        let raw: ChainProfileRaw = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid chain profile: {e}")))?;

        let rpc_url = if let Some(rpc) = rpc_override {
            rpc
        } else if let Some(env_var) = &raw.rpc_env_var {
            env::var(env_var).unwrap_or_else(|_| raw.rpc.clone())
        } else {
            raw.rpc.clone()
        };

        let entry_point = match &raw.entry_point {
            Some(s) => parse_addr("entryPoint", s)?,
            None => canonical_entry_point(raw.entry_point_version),
        };
        let factory = raw
            .factory
            .as_deref()
            .map(|s| parse_addr("factory", s))
            .transpose()?;

        Ok(Self {
            chain_id: raw.chain_id,
            rpc_url,
            bundler_url: raw.bundler.clone(),
            paymaster_url: raw.paymaster.clone(),
            entry_point,
            entry_point_version: raw.entry_point_version,
            factory,
        })
    }
}

fn parse_addr(field: &str, s: &str) -> Result<Address> {
    s.parse::<Address>()
        .map_err(|e| Error::Config(format!("invalid {field} address {s:?}: {e}")))
}

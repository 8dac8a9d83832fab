use ethers::{
    abi::{self, AbiParser, ParamType, Token},
    types::{Address, Bytes, H256, U256},
};
use rand::{rngs::OsRng, RngCore};

use crate::{
    encoding::fmt_address,
    error::{Error, Result},
    rpc::{eth_call, JsonRpcTransport},
};

/// Inputs for deploying a modular smart account through its factory.
#[derive(Debug, Clone)]
pub struct DeploymentParams {
    /// Validation module installed at deployment.
    pub validator: Address,
    /// Module-specific install data, e.g. the owner address for an ECDSA
    /// validator.
    pub validator_init_data: Bytes,
    /// CREATE2 salt; a fresh random value when not pinned.
    pub salt: Option<H256>,
}

/// Resolved counterfactual deployment: everything the first user operation
/// needs to carry, plus the address the account will land on.
#[derive(Debug, Clone)]
pub struct AccountDeployment {
    pub account_address: Address,
    pub factory: Address,
    pub factory_data: Bytes,
    pub salt: H256,
}

fn encode_call(signature: &str, args: &[Token]) -> Result<Vec<u8>> {
    let parsed = AbiParser::default()
        .parse(&[signature])
        .map_err(|e| Error::Contract(e.to_string()))?;
    let function = parsed
        .functions()
        .next()
        .ok_or_else(|| Error::Contract(format!("no function parsed from {signature:?}")))?;
    function.encode_input(args).map_err(|e| Error::Contract(e.to_string()))
}

/// Computes the CREATE2 address an account will deploy to, without deploying
/// it, by asking the factory's `getAddress` view. The returned `factory_data`
/// is the `createAccount` calldata the first user operation carries.
pub async fn precompute_account(
    transport: &dyn JsonRpcTransport,
    factory: Address,
    params: &DeploymentParams,
) -> Result<AccountDeployment> {
    let salt = params.salt.unwrap_or_else(|| {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        H256::from(bytes)
    });

    let init_data = encode_call(
        "function initialize(address validator, bytes data)",
        &[
            Token::Address(params.validator),
            Token::Bytes(params.validator_init_data.to_vec()),
        ],
    )?;

    let factory_data = encode_call(
        "function createAccount(bytes initData, bytes32 salt) returns (address)",
        &[
            Token::Bytes(init_data.clone()),
            Token::FixedBytes(salt.as_bytes().to_vec()),
        ],
    )?;

    let get_address = encode_call(
        "function getAddress(bytes initData, bytes32 salt) view returns (address)",
        &[Token::Bytes(init_data), Token::FixedBytes(salt.as_bytes().to_vec())],
    )?;
    let raw = eth_call(transport, factory, get_address).await?;
    let decoded = abi::decode(&[ParamType::Address], &raw)
        .map_err(|e| Error::Contract(e.to_string()))?;
    let Some(Token::Address(account_address)) = decoded.into_iter().next() else {
        return Err(Error::Contract("factory.getAddress returned no address".into()));
    };

    Ok(AccountDeployment {
        account_address,
        factory,
        factory_data: Bytes::from(factory_data),
        salt,
    })
}

/// Whether the account already has code on chain. A deployed account must not
/// carry factory fields again.
pub async fn is_deployed(transport: &dyn JsonRpcTransport, account: Address) -> Result<bool> {
    let params = serde_json::json!([fmt_address(account), "latest"]);
    let res = transport.request("eth_getCode", params).await?;
    let code = res.as_str().unwrap_or("0x");
    Ok(code != "0x" && !code.is_empty())
}

/// Reads the account's next nonce for the given key from the entry point's
/// nonce manager.
pub async fn entry_point_nonce(
    transport: &dyn JsonRpcTransport,
    entry_point: Address,
    sender: Address,
    key: U256,
) -> Result<U256> {
    let data = encode_call(
        "function getNonce(address sender, uint192 key) view returns (uint256)",
        &[Token::Address(sender), Token::Uint(key)],
    )?;
    let raw = eth_call(transport, entry_point, data).await?;
    let decoded = abi::decode(&[ParamType::Uint(256)], &raw)
        .map_err(|e| Error::Contract(e.to_string()))?;
    match decoded.into_iter().next() {
        Some(Token::Uint(nonce)) => Ok(nonce),
        _ => Err(Error::Contract("entryPoint.getNonce returned no uint".into())),
    }
}

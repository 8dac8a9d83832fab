use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::{self, AbiParser, ParamType, Token},
    types::{Address, Bytes, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    encoding::{fmt_address, fmt_u256},
    error::{Error, Result},
    rpc::{eth_call, JsonRpcTransport},
    signer::UserOpSigner,
    types::{EntryPointVersion, TypedData, UserOperation},
};

/// First-round paymaster answer: a placeholder good enough for gas
/// estimation. `is_final` short-circuits the second round when the service
/// already produced a real signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterStubData {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default)]
    pub is_final: bool,
}

/// Second-round answer, produced against the fully estimated operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterData {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
}

/// Sponsorship capability. Implementations range from remote web services to
/// purely local data construction; the builder only sees this trait.
#[async_trait]
pub trait PaymasterProvider: Send + Sync {
    async fn get_paymaster_stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
        context: &Value,
    ) -> Result<PaymasterStubData>;

    async fn get_paymaster_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
        context: &Value,
    ) -> Result<PaymasterData>;
}

/// ERC-7677 paymaster web service client (`pm_*` namespace). The context
/// object is free-form and forwarded verbatim; sponsorship policy ids and
/// webhook payloads go in there.
pub struct Erc7677Client {
    transport: Arc<dyn JsonRpcTransport>,
}

impl Erc7677Client {
    pub fn new(transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self { transport }
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let res = self.transport.request("pm_supportedEntryPoints", json!([])).await?;
        serde_json::from_value(res)
            .map_err(|e| Error::MalformedField { field: "entryPoints", reason: e.to_string() })
    }
}

fn build_params(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
    version: EntryPointVersion,
    context: &Value,
) -> Result<Value> {
    Ok(json!([
        op.to_wire_json(version)?,
        fmt_address(entry_point),
        fmt_u256(U256::from(chain_id)),
        context,
    ]))
}

#[async_trait]
impl PaymasterProvider for Erc7677Client {
    async fn get_paymaster_stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
        context: &Value,
    ) -> Result<PaymasterStubData> {
        let params = build_params(op, entry_point, chain_id, version, context)?;
        let res = self.transport.request("pm_getPaymasterStubData", params).await?;
        serde_json::from_value(res).map_err(|e| Error::MalformedField {
            field: "paymasterStubData",
            reason: e.to_string(),
        })
    }

    async fn get_paymaster_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
        context: &Value,
    ) -> Result<PaymasterData> {
        let params = build_params(op, entry_point, chain_id, version, context)?;
        let res = self.transport.request("pm_getPaymasterData", params).await?;
        serde_json::from_value(res).map_err(|e| Error::MalformedField {
            field: "paymasterData",
            reason: e.to_string(),
        })
    }
}

/// Open sponsorship paymaster: a fixed contract that pays for anyone, no
/// per-operation signature. One round is all it takes.
pub struct PublicPaymaster {
    paymaster: Address,
    verification_gas_limit: U256,
    post_op_gas_limit: U256,
}

impl PublicPaymaster {
    pub fn new(paymaster: Address) -> Self {
        Self {
            paymaster,
            verification_gas_limit: U256::from(50_000),
            post_op_gas_limit: U256::from(20_000),
        }
    }
}

#[async_trait]
impl PaymasterProvider for PublicPaymaster {
    async fn get_paymaster_stub_data(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
        _chain_id: u64,
        _version: EntryPointVersion,
        _context: &Value,
    ) -> Result<PaymasterStubData> {
        Ok(PaymasterStubData {
            paymaster: self.paymaster,
            paymaster_data: Bytes::default(),
            paymaster_verification_gas_limit: Some(self.verification_gas_limit),
            paymaster_post_op_gas_limit: Some(self.post_op_gas_limit),
            is_final: true,
        })
    }

    async fn get_paymaster_data(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
        _chain_id: u64,
        _version: EntryPointVersion,
        _context: &Value,
    ) -> Result<PaymasterData> {
        Ok(PaymasterData { paymaster: self.paymaster, paymaster_data: Bytes::default() })
    }
}

/// ERC-20 fee paymaster with EIP-2612 permit support.
///
/// When the sender's token allowance for the paymaster falls short of
/// `max_token_cost`, the final data round embeds a signed permit so the
/// paymaster can pull its fee in the same transaction. The stub round always
/// returns a permit-sized payload so estimation covers the worst case.
pub struct TokenPermitPaymaster {
    paymaster: Address,
    token: Address,
    max_token_cost: U256,
    transport: Arc<dyn JsonRpcTransport>,
    signer: Arc<dyn UserOpSigner>,
}

impl TokenPermitPaymaster {
    pub fn new(
        paymaster: Address,
        token: Address,
        max_token_cost: U256,
        transport: Arc<dyn JsonRpcTransport>,
        signer: Arc<dyn UserOpSigner>,
    ) -> Self {
        Self { paymaster, token, max_token_cost, transport, signer }
    }

    async fn view(&self, call: &str, args: &[Token], outputs: &[ParamType]) -> Result<Vec<Token>> {
        let parsed = AbiParser::default()
            .parse(&[call])
            .map_err(|e| Error::Contract(e.to_string()))?;
        let function = parsed
            .functions()
            .next()
            .ok_or_else(|| Error::Contract(format!("no function parsed from {call:?}")))?;
        let data = function
            .encode_input(args)
            .map_err(|e| Error::Contract(e.to_string()))?;
        let raw = eth_call(self.transport.as_ref(), self.token, data).await?;
        abi::decode(outputs, &raw).map_err(|e| Error::Contract(e.to_string()))
    }

    async fn allowance(&self, owner: Address) -> Result<U256> {
        let out = self
            .view(
                "function allowance(address owner, address spender) view returns (uint256)",
                &[Token::Address(owner), Token::Address(self.paymaster)],
                &[ParamType::Uint(256)],
            )
            .await?;
        match out.first() {
            Some(Token::Uint(v)) => Ok(*v),
            _ => Err(Error::Contract("allowance() returned no uint".into())),
        }
    }

    async fn permit_signature(&self, owner: Address, chain_id: u64) -> Result<Bytes> {
        let name_out = self
            .view(
                "function name() view returns (string)",
                &[],
                &[ParamType::String],
            )
            .await?;
        let Some(Token::String(name)) = name_out.into_iter().next() else {
            return Err(Error::Contract("name() returned no string".into()));
        };
        let nonce_out = self
            .view(
                "function nonces(address owner) view returns (uint256)",
                &[Token::Address(owner)],
                &[ParamType::Uint(256)],
            )
            .await?;
        let Some(Token::Uint(nonce)) = nonce_out.into_iter().next() else {
            return Err(Error::Contract("nonces() returned no uint".into()));
        };

        let domain_separator = keccak256(abi::encode(&[
            Token::FixedBytes(
                keccak256("EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)")
                    .to_vec(),
            ),
            Token::FixedBytes(keccak256(name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256("1").to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(self.token),
        ]));
        let struct_hash = keccak256(abi::encode(&[
            Token::FixedBytes(
                keccak256("Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)")
                    .to_vec(),
            ),
            Token::Address(owner),
            Token::Address(self.paymaster),
            Token::Uint(self.max_token_cost),
            Token::Uint(nonce),
            Token::Uint(U256::MAX),
        ]));

        self.signer
            .sign_typed_data(&TypedData {
                domain_separator: domain_separator.into(),
                struct_hash: struct_hash.into(),
            })
            .await
    }

    /// `token (20B) ‖ maxTokenCost (32B) ‖ permitSignature`.
    fn pack_data(&self, permit_signature: &[u8]) -> Bytes {
        let mut data = self.token.as_bytes().to_vec();
        let mut amount = [0u8; 32];
        self.max_token_cost.to_big_endian(&mut amount);
        data.extend_from_slice(&amount);
        data.extend_from_slice(permit_signature);
        Bytes::from(data)
    }
}

#[async_trait]
impl PaymasterProvider for TokenPermitPaymaster {
    async fn get_paymaster_stub_data(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
        _chain_id: u64,
        _version: EntryPointVersion,
        _context: &Value,
    ) -> Result<PaymasterStubData> {
        Ok(PaymasterStubData {
            paymaster: self.paymaster,
            paymaster_data: self.pack_data(&self.signer.dummy_signature()),
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            is_final: false,
        })
    }

    async fn get_paymaster_data(
        &self,
        op: &UserOperation,
        _entry_point: Address,
        chain_id: u64,
        _version: EntryPointVersion,
        _context: &Value,
    ) -> Result<PaymasterData> {
        let allowance = self.allowance(op.sender).await?;
        let paymaster_data = if allowance >= self.max_token_cost {
            self.pack_data(&[])
        } else {
            let sig = self.permit_signature(op.sender, chain_id).await?;
            self.pack_data(&sig)
        };
        Ok(PaymasterData { paymaster: self.paymaster, paymaster_data })
    }
}

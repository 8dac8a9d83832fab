use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U256, U64},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    encoding::{concat_u128, u256_to_u128_be},
    error::{Error, Result},
};

/// Entry point protocol version, fixed at builder construction.
///
/// The version decides the packed encoding, the hash computation and the
/// signing scheme; nothing else in the crate branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPointVersion {
    #[serde(rename = "v0.6")]
    V0_6,
    #[serde(rename = "v0.7")]
    V0_7,
    #[serde(rename = "v0.8")]
    V0_8,
}

impl EntryPointVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0_6 => "v0.6",
            Self::V0_7 => "v0.7",
            Self::V0_8 => "v0.8",
        }
    }
}

impl std::fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EIP-7702 delegation authorization, attached when the sender is an EOA being
/// temporarily upgraded to contract code for this operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip7702Auth {
    pub chain_id: U256,
    pub address: Address,
    pub nonce: U256,
    pub y_parity: U64,
    pub r: H256,
    pub s: H256,
}

/// ERC-4337 UserOperation, version-agnostic in-memory form.
///
/// The wire form (JSON-RPC) and the packed form (hashing, `handleOps`) are
/// both derived from this record; see [`UserOperation::to_wire_json`] and
/// [`UserOperation::hash`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
    pub eip7702_auth: Option<Eip7702Auth>,
}

/// v0.6 wire form: `initCode`, six discrete gas fields, no paymaster fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WireUserOperationV0_6 {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// v0.7+ wire form: separate factory fields, structured paymaster fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WireUserOperationV0_7 {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip7702_auth: Option<Eip7702Auth>,
}

impl UserOperation {
    /// `factory ‖ factoryData`, or empty when no deployment is needed.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut v = factory.as_bytes().to_vec();
                v.extend_from_slice(&self.factory_data);
                Bytes::from(v)
            }
            None => Bytes::default(),
        }
    }

    /// True when any field of the paymaster group is populated.
    pub fn has_paymaster(&self) -> bool {
        self.paymaster.is_some()
            || !self.paymaster_data.is_empty()
            || !self.paymaster_verification_gas_limit.is_zero()
            || !self.paymaster_post_op_gas_limit.is_zero()
    }

    /// v0.7 `paymasterAndData` blob:
    /// `paymaster (20B) ‖ verificationGasLimit (16B) ‖ postOpGasLimit (16B) ‖ data`.
    /// Absent paymaster packs as zero-length, never as a zero-filled block.
    pub fn paymaster_and_data(&self) -> Result<Bytes> {
        let Some(paymaster) = self.paymaster else {
            return Ok(Bytes::default());
        };
        let mut v = paymaster.as_bytes().to_vec();
        v.extend_from_slice(&u256_to_u128_be(
            "paymasterVerificationGasLimit",
            self.paymaster_verification_gas_limit,
        )?);
        v.extend_from_slice(&u256_to_u128_be(
            "paymasterPostOpGasLimit",
            self.paymaster_post_op_gas_limit,
        )?);
        v.extend_from_slice(&self.paymaster_data);
        Ok(Bytes::from(v))
    }

    /// `verificationGasLimit ‖ callGasLimit` as 16-byte halves of one word.
    fn account_gas_limits(&self) -> Result<[u8; 32]> {
        Ok(concat_u128(
            u256_to_u128_be("verificationGasLimit", self.verification_gas_limit)?,
            u256_to_u128_be("callGasLimit", self.call_gas_limit)?,
        ))
    }

    /// `maxPriorityFeePerGas ‖ maxFeePerGas` as 16-byte halves of one word.
    fn gas_fees(&self) -> Result<[u8; 32]> {
        Ok(concat_u128(
            u256_to_u128_be("maxPriorityFeePerGas", self.max_priority_fee_per_gas)?,
            u256_to_u128_be("maxFeePerGas", self.max_fee_per_gas)?,
        ))
    }

    fn reject_v0_6_unsupported(&self) -> Result<()> {
        if self.has_paymaster() {
            return Err(Error::UnsupportedField(
                "paymaster fields are not supported by entry point v0.6".into(),
            ));
        }
        if self.eip7702_auth.is_some() {
            return Err(Error::UnsupportedField(
                "eip7702Auth is not supported by entry point v0.6".into(),
            ));
        }
        Ok(())
    }

    /// Full ABI tuple encoding of the operation (signature included), as used
    /// for `handleOps` array elements.
    pub fn pack(&self, version: EntryPointVersion) -> Result<Bytes> {
        Ok(encode(&self.pack_tokens(version)?).into())
    }

    fn pack_tokens(&self, version: EntryPointVersion) -> Result<Vec<Token>> {
        match version {
            EntryPointVersion::V0_6 => {
                self.reject_v0_6_unsupported()?;
                Ok(vec![
                    Token::Address(self.sender),
                    Token::Uint(self.nonce),
                    Token::Bytes(self.init_code().to_vec()),
                    Token::Bytes(self.call_data.to_vec()),
                    Token::Uint(self.call_gas_limit),
                    Token::Uint(self.verification_gas_limit),
                    Token::Uint(self.pre_verification_gas),
                    Token::Uint(self.max_fee_per_gas),
                    Token::Uint(self.max_priority_fee_per_gas),
                    Token::Bytes(Vec::new()),
                    Token::Bytes(self.signature.to_vec()),
                ])
            }
            EntryPointVersion::V0_7 | EntryPointVersion::V0_8 => Ok(vec![
                Token::Address(self.sender),
                Token::Uint(self.nonce),
                Token::Bytes(self.init_code().to_vec()),
                Token::Bytes(self.call_data.to_vec()),
                Token::FixedBytes(self.account_gas_limits()?.to_vec()),
                Token::Uint(self.pre_verification_gas),
                Token::FixedBytes(self.gas_fees()?.to_vec()),
                Token::Bytes(self.paymaster_and_data()?.to_vec()),
                Token::Bytes(self.signature.to_vec()),
            ]),
        }
    }

    /// Hash-side packing: dynamic bytes fields collapse to their keccak256,
    /// and the signature is excluded entirely.
    pub fn pack_for_hash(&self, version: EntryPointVersion) -> Result<Bytes> {
        let tokens = match version {
            EntryPointVersion::V0_6 => {
                self.reject_v0_6_unsupported()?;
                vec![
                    Token::Address(self.sender),
                    Token::Uint(self.nonce),
                    Token::FixedBytes(keccak256(self.init_code()).to_vec()),
                    Token::FixedBytes(keccak256(&self.call_data).to_vec()),
                    Token::Uint(self.call_gas_limit),
                    Token::Uint(self.verification_gas_limit),
                    Token::Uint(self.pre_verification_gas),
                    Token::Uint(self.max_fee_per_gas),
                    Token::Uint(self.max_priority_fee_per_gas),
                    Token::FixedBytes(keccak256([]).to_vec()),
                ]
            }
            EntryPointVersion::V0_7 | EntryPointVersion::V0_8 => vec![
                Token::Address(self.sender),
                Token::Uint(self.nonce),
                Token::FixedBytes(keccak256(self.init_code()).to_vec()),
                Token::FixedBytes(keccak256(&self.call_data).to_vec()),
                Token::FixedBytes(self.account_gas_limits()?.to_vec()),
                Token::Uint(self.pre_verification_gas),
                Token::FixedBytes(self.gas_fees()?.to_vec()),
                Token::FixedBytes(keccak256(self.paymaster_and_data()?).to_vec()),
            ],
        };
        Ok(encode(&tokens).into())
    }

    /// Canonical operation hash, bit-exact with the reference entry point for
    /// the given version. The signature is over this hash, so the hash never
    /// covers the signature field.
    ///
    /// v0.6/v0.7: `keccak256(abi.encode(keccak256(packForHash), entryPoint, chainId))`.
    /// v0.8: EIP-712 digest (domain name "ERC4337", version "1").
    pub fn hash(
        &self,
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
    ) -> Result<H256> {
        match version {
            EntryPointVersion::V0_6 | EntryPointVersion::V0_7 => {
                let inner = keccak256(self.pack_for_hash(version)?);
                let outer = encode(&[
                    Token::FixedBytes(inner.to_vec()),
                    Token::Address(entry_point),
                    Token::Uint(U256::from(chain_id)),
                ]);
                Ok(H256::from(keccak256(outer)))
            }
            EntryPointVersion::V0_8 => Ok(self.typed_data(entry_point, chain_id)?.digest()),
        }
    }

    /// EIP-712 envelope for the v0.8 signing scheme.
    pub fn typed_data(&self, entry_point: Address, chain_id: u64) -> Result<TypedData> {
        let domain_separator = H256::from(keccak256(encode(&[
            Token::FixedBytes(
                keccak256("EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)")
                    .to_vec(),
            ),
            Token::FixedBytes(keccak256("ERC4337").to_vec()),
            Token::FixedBytes(keccak256("1").to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(entry_point),
        ])));

        let type_hash = keccak256(
            "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,\
             bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,\
             bytes paymasterAndData)",
        );
        let struct_hash = H256::from(keccak256(encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(self.init_code()).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.account_gas_limits()?.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees()?.to_vec()),
            Token::FixedBytes(keccak256(self.paymaster_and_data()?).to_vec()),
        ])));

        Ok(TypedData { domain_separator, struct_hash })
    }

    /// Wire form for JSON-RPC transport. Lossless inverse of the
    /// `from_wire_*` constructors.
    pub fn to_wire_json(&self, version: EntryPointVersion) -> Result<Value> {
        let value = match version {
            EntryPointVersion::V0_6 => serde_json::to_value(self.wire_v0_6()?),
            EntryPointVersion::V0_7 | EntryPointVersion::V0_8 => {
                serde_json::to_value(self.wire_v0_7())
            }
        };
        value.map_err(|e| Error::MalformedField { field: "userOperation", reason: e.to_string() })
    }

    pub fn wire_v0_6(&self) -> Result<WireUserOperationV0_6> {
        self.reject_v0_6_unsupported()?;
        Ok(WireUserOperationV0_6 {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.init_code(),
            call_data: self.call_data.clone(),
            call_gas_limit: self.call_gas_limit,
            verification_gas_limit: self.verification_gas_limit,
            pre_verification_gas: self.pre_verification_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            paymaster_and_data: Bytes::default(),
            signature: self.signature.clone(),
        })
    }

    pub fn wire_v0_7(&self) -> WireUserOperationV0_7 {
        WireUserOperationV0_7 {
            sender: self.sender,
            nonce: self.nonce,
            factory: self.factory,
            factory_data: self.factory.map(|_| self.factory_data.clone()),
            call_data: self.call_data.clone(),
            call_gas_limit: self.call_gas_limit,
            verification_gas_limit: self.verification_gas_limit,
            pre_verification_gas: self.pre_verification_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            paymaster: self.paymaster,
            paymaster_verification_gas_limit: self
                .paymaster
                .map(|_| self.paymaster_verification_gas_limit),
            paymaster_post_op_gas_limit: self.paymaster.map(|_| self.paymaster_post_op_gas_limit),
            paymaster_data: self.paymaster.map(|_| self.paymaster_data.clone()),
            signature: self.signature.clone(),
            eip7702_auth: self.eip7702_auth.clone(),
        }
    }

    pub fn from_wire_v0_6(value: Value) -> Result<Self> {
        let wire: WireUserOperationV0_6 = serde_json::from_value(value)
            .map_err(|e| Error::MalformedField { field: "userOperation", reason: e.to_string() })?;
        if !wire.paymaster_and_data.is_empty() {
            return Err(Error::UnsupportedField(
                "paymasterAndData is not representable; paymaster flows need entry point v0.7+"
                    .into(),
            ));
        }
        let (factory, factory_data) = split_init_code(&wire.init_code);
        Ok(Self {
            sender: wire.sender,
            nonce: wire.nonce,
            factory,
            factory_data,
            call_data: wire.call_data,
            call_gas_limit: wire.call_gas_limit,
            verification_gas_limit: wire.verification_gas_limit,
            pre_verification_gas: wire.pre_verification_gas,
            max_fee_per_gas: wire.max_fee_per_gas,
            max_priority_fee_per_gas: wire.max_priority_fee_per_gas,
            signature: wire.signature,
            ..Self::default()
        })
    }

    pub fn from_wire_v0_7(value: Value) -> Result<Self> {
        let wire: WireUserOperationV0_7 = serde_json::from_value(value)
            .map_err(|e| Error::MalformedField { field: "userOperation", reason: e.to_string() })?;
        Ok(Self {
            sender: wire.sender,
            nonce: wire.nonce,
            factory: wire.factory,
            factory_data: wire.factory_data.unwrap_or_default(),
            call_data: wire.call_data,
            call_gas_limit: wire.call_gas_limit,
            verification_gas_limit: wire.verification_gas_limit,
            pre_verification_gas: wire.pre_verification_gas,
            max_fee_per_gas: wire.max_fee_per_gas,
            max_priority_fee_per_gas: wire.max_priority_fee_per_gas,
            paymaster: wire.paymaster,
            paymaster_verification_gas_limit: wire
                .paymaster_verification_gas_limit
                .unwrap_or_default(),
            paymaster_post_op_gas_limit: wire.paymaster_post_op_gas_limit.unwrap_or_default(),
            paymaster_data: wire.paymaster_data.unwrap_or_default(),
            signature: wire.signature,
            eip7702_auth: wire.eip7702_auth,
        })
    }
}

fn split_init_code(init_code: &Bytes) -> (Option<Address>, Bytes) {
    if init_code.len() >= 20 {
        (
            Some(Address::from_slice(&init_code[..20])),
            Bytes::from(init_code[20..].to_vec()),
        )
    } else {
        (None, Bytes::default())
    }
}

/// ABI-encodes a direct `EntryPoint.handleOps(ops, beneficiary)` call, for
/// out-of-band submission or testing against a local node.
pub fn encode_handle_ops_call(
    ops: &[UserOperation],
    beneficiary: Address,
    version: EntryPointVersion,
) -> Result<Bytes> {
    let signature = match version {
        EntryPointVersion::V0_6 => {
            "handleOps((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes)[],address)"
        }
        EntryPointVersion::V0_7 | EntryPointVersion::V0_8 => {
            "handleOps((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)[],address)"
        }
    };
    let tuples = ops
        .iter()
        .map(|op| op.pack_tokens(version).map(Token::Tuple))
        .collect::<Result<Vec<_>>>()?;

    let mut data = ethers::utils::id(signature).to_vec();
    data.extend_from_slice(&encode(&[Token::Array(tuples), Token::Address(beneficiary)]));
    Ok(Bytes::from(data))
}

/// EIP-712 payload handed to typed-data signing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedData {
    pub domain_separator: H256,
    pub struct_hash: H256,
}

impl TypedData {
    /// `keccak256(0x1901 ‖ domainSeparator ‖ structHash)`.
    pub fn digest(&self) -> H256 {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(self.domain_separator.as_bytes());
        buf.extend_from_slice(self.struct_hash.as_bytes());
        H256::from(keccak256(buf))
    }
}

/// Result of `eth_estimateUserOperationGas`. Older v0.7 paymasters omit one or
/// both paymaster gas fields; absent values default to zero downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// One fee tier from the bundler's gas price endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceTiers {
    pub slow: GasPrice,
    pub standard: GasPrice,
    pub fast: GasPrice,
}

/// `eth_getUserOperationReceipt` result. `success: false` is a normal terminal
/// state (the account's execution reverted), not a transport failure. The
/// inner transaction receipt is kept as raw JSON; providers disagree on its
/// exact field set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    #[serde(rename = "userOpHash")]
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Value>,
    #[serde(default)]
    pub receipt: Value,
}

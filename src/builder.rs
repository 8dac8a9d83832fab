use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256};
use serde_json::Value;

use crate::{
    bundler::BundlerClient,
    error::{Error, Result},
    paymaster::PaymasterProvider,
    signer::UserOpSigner,
    types::{EntryPointVersion, GasPrice, UserOperation, UserOperationReceipt},
};

/// Lifecycle tag of a [`UserOpBuilder`]. Transitions only move forward, with
/// two exceptions: re-estimation from `GasEstimated` overwrites the previous
/// estimates, and re-sending from `Sent` resubmits the same payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Empty,
    FieldsSet,
    GasEstimated,
    Hashed,
    Signed,
    Sent,
    Confirmed,
}

impl BuilderState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::FieldsSet => "FieldsSet",
            Self::GasEstimated => "GasEstimated",
            Self::Hashed => "Hashed",
            Self::Signed => "Signed",
            Self::Sent => "Sent",
            Self::Confirmed => "Confirmed",
        }
    }
}

/// Single-use orchestrator for one user operation: field assembly, paymaster
/// rounds, gas estimation, hashing, signing, submission and receipt polling.
///
/// Mutating a signed operation would silently invalidate its signature, so
/// every setter fails with `InvalidState` once signing is possible.
pub struct UserOpBuilder {
    entry_point: Address,
    chain_id: u64,
    version: EntryPointVersion,
    bundler: Arc<BundlerClient>,
    paymaster: Option<(Arc<dyn PaymasterProvider>, Value)>,
    op: UserOperation,
    state: BuilderState,
    user_op_hash: Option<H256>,
}

impl UserOpBuilder {
    pub fn new(
        entry_point: Address,
        chain_id: u64,
        version: EntryPointVersion,
        bundler: Arc<BundlerClient>,
    ) -> Self {
        Self {
            entry_point,
            chain_id,
            version,
            bundler,
            paymaster: None,
            op: UserOperation::default(),
            state: BuilderState::Empty,
            user_op_hash: None,
        }
    }

    pub fn with_paymaster(mut self, provider: Arc<dyn PaymasterProvider>, context: Value) -> Self {
        self.paymaster = Some((provider, context));
        self
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// The hash the operation was signed over (and, once sent, the hash the
    /// bundler acknowledged).
    pub fn user_op_hash(&self) -> Option<H256> {
        self.user_op_hash
    }

    /// Gate for the setters: the operation must not be mutated once a
    /// signature could exist over it, so the state is checked before any
    /// field is touched.
    fn apply(&mut self, f: impl FnOnce(&mut UserOperation)) -> Result<&mut Self> {
        match self.state {
            BuilderState::Empty | BuilderState::FieldsSet => {
                f(&mut self.op);
                self.state = BuilderState::FieldsSet;
                Ok(self)
            }
            other => Err(Error::InvalidState {
                expected: "Empty or FieldsSet",
                actual: other.as_str(),
            }),
        }
    }

    pub fn set_sender(&mut self, sender: Address) -> Result<&mut Self> {
        self.apply(|op| op.sender = sender)
    }

    pub fn set_nonce(&mut self, nonce: ethers::types::U256) -> Result<&mut Self> {
        self.apply(|op| op.nonce = nonce)
    }

    pub fn set_call_data(&mut self, call_data: Bytes) -> Result<&mut Self> {
        self.apply(|op| op.call_data = call_data)
    }

    pub fn set_factory(&mut self, factory: Address, factory_data: Bytes) -> Result<&mut Self> {
        self.apply(|op| {
            op.factory = Some(factory);
            op.factory_data = factory_data;
        })
    }

    /// Direct paymaster assignment for flows that skip the provider rounds.
    pub fn set_paymaster(&mut self, paymaster: Address, data: Bytes) -> Result<&mut Self> {
        self.apply(|op| {
            op.paymaster = Some(paymaster);
            op.paymaster_data = data;
        })
    }

    pub fn set_gas_price(&mut self, price: &GasPrice) -> Result<&mut Self> {
        self.apply(|op| {
            op.max_fee_per_gas = price.max_fee_per_gas;
            op.max_priority_fee_per_gas = price.max_priority_fee_per_gas;
        })
    }

    pub fn set_eip7702_auth(&mut self, auth: crate::types::Eip7702Auth) -> Result<&mut Self> {
        self.apply(|op| op.eip7702_auth = Some(auth))
    }

    /// Pre-signed flows (hardware wallets, remote signers) attach the
    /// signature directly instead of going through [`Self::sign_user_op_hash`].
    pub fn set_signature(&mut self, signature: Bytes) -> Result<&mut Self> {
        self.apply(|op| op.signature = signature)
    }

    /// Runs the estimation pipeline: dummy signature, paymaster stub round,
    /// `eth_estimateUserOperationGas`, paymaster final round. Gas prices must
    /// already be set; the bundler simulates against them.
    pub async fn estimate_gas(&mut self, signer: &dyn UserOpSigner) -> Result<&mut Self> {
        match self.state {
            BuilderState::FieldsSet | BuilderState::GasEstimated => {}
            other => {
                return Err(Error::InvalidState {
                    expected: "FieldsSet or GasEstimated",
                    actual: other.as_str(),
                })
            }
        }
        // the bundler simulates against the fee the operation carries
        if self.op.max_fee_per_gas.is_zero() {
            return Err(Error::MissingField("maxFeePerGas"));
        }

        self.op.signature = signer.dummy_signature();

        let mut stub_is_final = false;
        if let Some((provider, context)) = &self.paymaster {
            let stub = provider
                .get_paymaster_stub_data(
                    &self.op,
                    self.entry_point,
                    self.chain_id,
                    self.version,
                    context,
                )
                .await
                .map_err(|e| Error::Estimation(Box::new(e)))?;
            self.op.paymaster = Some(stub.paymaster);
            self.op.paymaster_data = stub.paymaster_data;
            self.op.paymaster_verification_gas_limit =
                stub.paymaster_verification_gas_limit.unwrap_or_default();
            self.op.paymaster_post_op_gas_limit =
                stub.paymaster_post_op_gas_limit.unwrap_or_default();
            stub_is_final = stub.is_final;
        }

        let estimates = self
            .bundler
            .estimate_user_operation_gas(&self.op, self.entry_point, self.version)
            .await
            .map_err(|e| Error::Estimation(Box::new(e)))?;
        self.op.call_gas_limit = estimates.call_gas_limit;
        self.op.verification_gas_limit = estimates.verification_gas_limit;
        self.op.pre_verification_gas = estimates.pre_verification_gas;
        if self.op.paymaster.is_some() {
            // absent values mean the bundler saw no paymaster work to meter
            if let Some(v) = estimates.paymaster_verification_gas_limit {
                self.op.paymaster_verification_gas_limit = v;
            }
            if let Some(v) = estimates.paymaster_post_op_gas_limit {
                self.op.paymaster_post_op_gas_limit = v;
            }
        }

        if let Some((provider, context)) = &self.paymaster {
            if !stub_is_final {
                let data = provider
                    .get_paymaster_data(
                        &self.op,
                        self.entry_point,
                        self.chain_id,
                        self.version,
                        context,
                    )
                    .await
                    .map_err(|e| Error::Estimation(Box::new(e)))?;
                self.op.paymaster = Some(data.paymaster);
                self.op.paymaster_data = data.paymaster_data;
            }
        }

        self.state = BuilderState::GasEstimated;
        Ok(self)
    }

    /// Canonical hash of the operation as currently assembled. Pure; calling
    /// it again after further re-estimation recomputes.
    pub fn compute_user_op_hash(&mut self) -> Result<H256> {
        match self.state {
            BuilderState::GasEstimated | BuilderState::Hashed => {}
            other => {
                return Err(Error::InvalidState {
                    expected: "GasEstimated or Hashed",
                    actual: other.as_str(),
                })
            }
        }
        let hash = self.op.hash(self.entry_point, self.chain_id, self.version)?;
        self.user_op_hash = Some(hash);
        self.state = BuilderState::Hashed;
        Ok(hash)
    }

    /// Message-hash signing scheme (v0.6/v0.7 accounts).
    pub async fn sign_user_op_hash(&mut self, signer: &dyn UserOpSigner) -> Result<&mut Self> {
        if self.version == EntryPointVersion::V0_8 {
            return Err(Error::UnsupportedSigningScheme {
                version: "v0.8",
                scheme: "userOpHash",
            });
        }
        let hash = self.compute_user_op_hash()?;
        self.op.signature = signer.sign_user_op_hash(hash).await?;
        self.state = BuilderState::Signed;
        Ok(self)
    }

    /// EIP-712 signing scheme (v0.8 accounts).
    pub async fn sign_user_op_typed_data(&mut self, signer: &dyn UserOpSigner) -> Result<&mut Self> {
        if self.version != EntryPointVersion::V0_8 {
            return Err(Error::UnsupportedSigningScheme {
                version: self.version.as_str(),
                scheme: "typedData",
            });
        }
        let hash = self.compute_user_op_hash()?;
        let typed = self.op.typed_data(self.entry_point, self.chain_id)?;
        self.op.signature = signer.sign_typed_data(&typed).await?;
        self.user_op_hash = Some(hash);
        self.state = BuilderState::Signed;
        Ok(self)
    }

    /// Submits to the bundler. Not idempotent: calling it again resubmits the
    /// same payload, and whatever the provider answers (typically an
    /// "already known" RPC error) is surfaced to the caller.
    pub async fn send(&mut self) -> Result<H256> {
        match self.state {
            BuilderState::Signed | BuilderState::Sent => {}
            other => {
                return Err(Error::InvalidState {
                    expected: "Signed or Sent",
                    actual: other.as_str(),
                })
            }
        }
        let hash = self
            .bundler
            .send_user_operation(&self.op, self.entry_point, self.version)
            .await?;
        self.user_op_hash = Some(hash);
        self.state = BuilderState::Sent;
        Ok(hash)
    }

    /// Polls for the receipt. A receipt with `success: false` still resolves;
    /// on-chain revert of the account's execution is a terminal outcome, not a
    /// transport failure. Transient poll errors are logged and polling
    /// continues.
    pub async fn wait(
        &mut self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<UserOperationReceipt> {
        if self.state != BuilderState::Sent {
            return Err(Error::InvalidState { expected: "Sent", actual: self.state.as_str() });
        }
        let hash = self.user_op_hash.ok_or(Error::InvalidState {
            expected: "Sent",
            actual: "Sent without hash",
        })?;

        let start = std::time::Instant::now();
        loop {
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(Error::ReceiptTimeout { waited: start.elapsed() });
                }
            }
            match self.bundler.get_user_operation_receipt(hash).await {
                Ok(Some(receipt)) => {
                    self.state = BuilderState::Confirmed;
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => {
                    // free-tier bundlers drop requests routinely; keep polling
                    tracing::warn!(error = %e, user_op_hash = %hash, "receipt poll error");
                }
            }
            // clip the last sleep so the timeout error lands at the deadline
            // rather than up to one interval past it
            let sleep_for = match timeout {
                Some(timeout) => match timeout.checked_sub(start.elapsed()) {
                    Some(remaining) if !remaining.is_zero() => remaining.min(poll_interval),
                    _ => return Err(Error::ReceiptTimeout { waited: start.elapsed() }),
                },
                None => poll_interval,
            };
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Wire-form snapshot of the operation as assembled so far. Read-only,
    /// allowed in any state.
    pub fn preview(&self) -> Result<Value> {
        self.op.to_wire_json(self.version)
    }
}

impl std::fmt::Debug for UserOpBuilder {
    // the capability handles are trait objects, so derive is unavailable
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserOpBuilder")
            .field("entry_point", &self.entry_point)
            .field("chain_id", &self.chain_id)
            .field("version", &self.version)
            .field("state", &self.state.as_str())
            .field("user_op_hash", &self.user_op_hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::paymaster::PublicPaymaster;
    use crate::rpc::{JsonRpcTransport, RpcCall};
    use crate::signer::EcdsaSigner;
    use async_trait::async_trait;
    use ethers::types::U256;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const HASH: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    struct MockTransport {
        responses: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn methods(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl JsonRpcTransport for MockTransport {
        async fn request(&self, method: &str, params: Value) -> Result<Value> {
            self.calls.lock().unwrap().push((method.to_string(), params));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("mock transport ran out of responses")
        }

        async fn request_batch(&self, _calls: &[RpcCall]) -> Result<Vec<Result<Value, RpcError>>> {
            unimplemented!("not used by these tests")
        }
    }

    fn estimate_response() -> Value {
        json!({
            "callGasLimit": "0x9bb8",
            "verificationGasLimit": "0x2098f",
            "preVerificationGas": "0xb718",
        })
    }

    fn receipt_response() -> Value {
        json!({
            "userOpHash": HASH,
            "sender": "0x1111111111111111111111111111111111111111",
            "nonce": "0x0",
            "actualGasCost": "0x5208",
            "actualGasUsed": "0x5208",
            "success": true,
            "logs": [],
            "receipt": {}
        })
    }

    fn builder_with(transport: Arc<MockTransport>) -> UserOpBuilder {
        UserOpBuilder::new(
            Address::repeat_byte(0x07),
            11_155_111,
            EntryPointVersion::V0_7,
            Arc::new(BundlerClient::new(transport)),
        )
    }

    fn set_fields(builder: &mut UserOpBuilder) {
        builder
            .set_sender(Address::repeat_byte(0x11))
            .unwrap()
            .set_nonce(U256::one())
            .unwrap()
            .set_call_data(Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]))
            .unwrap()
            .set_gas_price(&GasPrice {
                max_fee_per_gas: U256::from(2_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn full_pipeline_estimate_sign_send_wait() {
        let transport = MockTransport::new(vec![
            Ok(estimate_response()),
            Ok(json!(HASH)),
            Ok(Value::Null),
            Ok(Value::Null),
            Ok(receipt_response()),
        ]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport.clone());
        set_fields(&mut builder);

        builder.estimate_gas(&signer).await.unwrap();
        assert_eq!(builder.state(), BuilderState::GasEstimated);
        let preview = builder.preview().unwrap();
        assert_eq!(preview["callGasLimit"], json!("0x9bb8"));
        assert_eq!(preview["verificationGasLimit"], json!("0x2098f"));
        assert_eq!(preview["preVerificationGas"], json!("0xb718"));
        // estimation writes exactly the gas fields; the rest is untouched
        assert_eq!(preview["sender"], json!("0x1111111111111111111111111111111111111111"));
        assert_eq!(preview["nonce"], json!("0x1"));
        assert_eq!(preview["maxFeePerGas"], json!("0x77359400"));

        builder.sign_user_op_hash(&signer).await.unwrap();
        assert_eq!(builder.state(), BuilderState::Signed);

        let sent = builder.send().await.unwrap();
        assert_eq!(sent, HASH.parse().unwrap());

        let start = std::time::Instant::now();
        let receipt = builder
            .wait(Duration::from_millis(10), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(builder.state(), BuilderState::Confirmed);
        // two null polls before the receipt, so at least two suspensions
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(
            transport.methods(),
            vec![
                "eth_estimateUserOperationGas",
                "eth_sendUserOperation",
                "eth_getUserOperationReceipt",
                "eth_getUserOperationReceipt",
                "eth_getUserOperationReceipt",
            ]
        );
    }

    #[tokio::test]
    async fn send_before_sign_is_a_state_error() {
        let transport = MockTransport::new(vec![]);
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        match builder.send().await.unwrap_err() {
            Error::InvalidState { expected, actual } => {
                assert_eq!(expected, "Signed or Sent");
                assert_eq!(actual, "FieldsSet");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_send_resubmits_and_surfaces_provider_error() {
        let transport = MockTransport::new(vec![
            Ok(estimate_response()),
            Ok(json!(HASH)),
            Err(Error::Rpc(RpcError {
                code: Some(-32000),
                message: "already known".into(),
                data: None,
            })),
        ]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport.clone());
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.sign_user_op_hash(&signer).await.unwrap();
        builder.send().await.unwrap();

        // the second call goes back to the wire; the provider decides
        match builder.send().await.unwrap_err() {
            Error::Rpc(e) => assert_eq!(e.message, "already known"),
            other => panic!("expected Rpc, got {other:?}"),
        }
        assert_eq!(
            transport.methods(),
            vec![
                "eth_estimateUserOperationGas",
                "eth_sendUserOperation",
                "eth_sendUserOperation",
            ]
        );
    }

    #[tokio::test]
    async fn setters_rejected_after_signing() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.sign_user_op_hash(&signer).await.unwrap();
        assert!(matches!(
            builder.set_sender(Address::repeat_byte(0x22)),
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_setter_leaves_signed_op_untouched() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.sign_user_op_hash(&signer).await.unwrap();

        let before = builder.preview().unwrap();
        assert!(builder.set_sender(Address::repeat_byte(0x99)).is_err());
        assert!(builder
            .set_gas_price(&GasPrice {
                max_fee_per_gas: U256::from(1),
                max_priority_fee_per_gas: U256::from(1),
            })
            .is_err());
        // a rejected setter must not alter the operation the signature covers
        assert_eq!(builder.preview().unwrap(), before);
        assert_eq!(builder.state(), BuilderState::Signed);
    }

    #[tokio::test]
    async fn double_estimate_overwrites() {
        let transport = MockTransport::new(vec![
            Ok(estimate_response()),
            Ok(json!({
                "callGasLimit": "0x1",
                "verificationGasLimit": "0x2",
                "preVerificationGas": "0x3",
            })),
        ]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.estimate_gas(&signer).await.unwrap();
        let preview = builder.preview().unwrap();
        assert_eq!(preview["callGasLimit"], json!("0x1"));
    }

    #[tokio::test]
    async fn estimate_without_gas_price_fails() {
        let transport = MockTransport::new(vec![]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        builder.set_sender(Address::repeat_byte(0x11)).unwrap();
        assert!(matches!(
            builder.estimate_gas(&signer).await.unwrap_err(),
            Error::MissingField("maxFeePerGas")
        ));
    }

    #[tokio::test]
    async fn estimate_rpc_rejection_wrapped_as_estimation_error() {
        let transport = MockTransport::new(vec![Err(Error::Rpc(RpcError {
            code: Some(-32500),
            message: "AA13 initCode failed or OOG".into(),
            data: None,
        }))]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        match builder.estimate_gas(&signer).await.unwrap_err() {
            Error::Estimation(inner) => match *inner {
                Error::Rpc(e) => assert_eq!(e.code, Some(-32500)),
                other => panic!("expected wrapped rpc error, got {other:?}"),
            },
            other => panic!("expected Estimation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn final_paymaster_stub_skips_second_round() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport.clone())
            .with_paymaster(Arc::new(PublicPaymaster::new(Address::repeat_byte(0x99))), Value::Null);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();

        // single-round provider answers locally, only estimation hits the wire
        assert_eq!(transport.methods(), vec!["eth_estimateUserOperationGas"]);
        let preview = builder.preview().unwrap();
        assert_eq!(preview["paymaster"], json!("0x9999999999999999999999999999999999999999"));
        assert_eq!(preview["paymasterVerificationGasLimit"], json!("0xc350"));
    }

    #[tokio::test]
    async fn wait_times_out_with_receipt_timeout() {
        let responses = std::iter::repeat_with(|| Ok(Value::Null)).take(64).collect();
        let transport = MockTransport::new(responses);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(MockTransport::new(vec![
            Ok(estimate_response()),
            Ok(json!(HASH)),
        ]));
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.sign_user_op_hash(&signer).await.unwrap();
        builder.send().await.unwrap();

        // swap in a bundler that never produces a receipt
        builder.bundler = Arc::new(BundlerClient::new(transport));
        match builder
            .wait(Duration::from_millis(5), Some(Duration::from_millis(40)))
            .await
            .unwrap_err()
        {
            Error::ReceiptTimeout { waited } => assert!(waited >= Duration::from_millis(40)),
            other => panic!("expected ReceiptTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_timeout_lands_at_the_deadline() {
        let transport = MockTransport::new(vec![
            Ok(estimate_response()),
            Ok(json!(HASH)),
        ]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        builder.sign_user_op_hash(&signer).await.unwrap();
        builder.send().await.unwrap();

        let nulls = std::iter::repeat_with(|| Ok(Value::Null)).take(8).collect();
        builder.bundler = Arc::new(BundlerClient::new(MockTransport::new(nulls)));
        // timeout is not a whole number of intervals; the last sleep must be
        // clipped so the error lands at ~250ms, not at the 300ms poll boundary
        match builder
            .wait(Duration::from_millis(100), Some(Duration::from_millis(250)))
            .await
            .unwrap_err()
        {
            Error::ReceiptTimeout { waited } => {
                assert!(waited >= Duration::from_millis(250));
                assert!(waited < Duration::from_millis(300), "overshot: {waited:?}");
            }
            other => panic!("expected ReceiptTimeout, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_carries_the_state_tag() {
        let builder = builder_with(MockTransport::new(vec![]));
        let rendered = format!("{builder:?}");
        assert!(rendered.contains("UserOpBuilder"));
        assert!(rendered.contains("Empty"));
    }

    #[tokio::test]
    async fn typed_data_scheme_rejected_below_v0_8() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        assert!(matches!(
            builder.sign_user_op_typed_data(&signer).await.unwrap_err(),
            Error::UnsupportedSigningScheme { version: "v0.7", scheme: "typedData" }
        ));
    }

    #[tokio::test]
    async fn hash_scheme_rejected_on_v0_8() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = UserOpBuilder::new(
            Address::repeat_byte(0x07),
            1,
            EntryPointVersion::V0_8,
            Arc::new(BundlerClient::new(transport)),
        );
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        assert!(matches!(
            builder.sign_user_op_hash(&signer).await.unwrap_err(),
            Error::UnsupportedSigningScheme { version: "v0.8", scheme: "userOpHash" }
        ));
        // the typed-data scheme is the right one for this version
        builder.sign_user_op_typed_data(&signer).await.unwrap();
        assert_eq!(builder.state(), BuilderState::Signed);
    }

    #[tokio::test]
    async fn compute_hash_repeatable_while_unsigned() {
        let transport = MockTransport::new(vec![Ok(estimate_response())]);
        let signer = EcdsaSigner::random();
        let mut builder = builder_with(transport);
        set_fields(&mut builder);
        builder.estimate_gas(&signer).await.unwrap();
        let a = builder.compute_user_op_hash().unwrap();
        let b = builder.compute_user_op_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(builder.state(), BuilderState::Hashed);
    }
}

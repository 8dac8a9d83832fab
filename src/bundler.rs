use std::sync::Arc;

use ethers::types::{Address, H256};
use serde_json::{json, Value};

use crate::{
    encoding::{fmt_address, fmt_h256, parse_h256},
    error::{Error, Result},
    rpc::JsonRpcTransport,
    types::{EntryPointVersion, GasEstimates, GasPriceTiers, UserOperation, UserOperationReceipt},
};

/// Adjusts the operation sent to `eth_estimateUserOperationGas`, leaving the
/// caller's copy untouched.
pub type BeforeEstimateHook = Box<dyn Fn(&mut UserOperation) + Send + Sync>;

/// Adjusts the estimates the bundler returned, e.g. to add a safety margin.
pub type AfterEstimateHook = Box<dyn Fn(&mut GasEstimates) + Send + Sync>;

/// Client for the bundler's `eth_*` namespace. Stateless aside from
/// configuration, so one instance can serve any number of concurrent builders.
pub struct BundlerClient {
    transport: Arc<dyn JsonRpcTransport>,
    gas_price_method: String,
    before_estimate: Option<BeforeEstimateHook>,
    after_estimate: Option<AfterEstimateHook>,
}

impl BundlerClient {
    pub fn new(transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self {
            transport,
            gas_price_method: "pimlico_getUserOperationGasPrice".to_string(),
            before_estimate: None,
            after_estimate: None,
        }
    }

    /// Overrides the provider-specific gas price method name.
    pub fn with_gas_price_method(mut self, method: impl Into<String>) -> Self {
        self.gas_price_method = method.into();
        self
    }

    pub fn with_before_estimate(mut self, hook: BeforeEstimateHook) -> Self {
        self.before_estimate = Some(hook);
        self
    }

    pub fn with_after_estimate(mut self, hook: AfterEstimateHook) -> Self {
        self.after_estimate = Some(hook);
        self
    }

    pub async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
        version: EntryPointVersion,
    ) -> Result<GasEstimates> {
        let mut estimated = op.clone();
        if let Some(hook) = &self.before_estimate {
            hook(&mut estimated);
        }
        let params = json!([estimated.to_wire_json(version)?, fmt_address(entry_point)]);
        let res = self
            .transport
            .request("eth_estimateUserOperationGas", params)
            .await?;
        let mut estimates: GasEstimates = serde_json::from_value(res)
            .map_err(|e| Error::MalformedField { field: "gasEstimates", reason: e.to_string() })?;
        if let Some(hook) = &self.after_estimate {
            hook(&mut estimates);
        }
        Ok(estimates)
    }

    pub async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        version: EntryPointVersion,
    ) -> Result<H256> {
        let params = json!([op.to_wire_json(version)?, fmt_address(entry_point)]);
        let res = self.transport.request("eth_sendUserOperation", params).await?;
        parse_userop_hash(&res)
    }

    /// `None` while the operation is still pending inclusion.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        let params = json!([fmt_h256(user_op_hash)]);
        let res = self
            .transport
            .request("eth_getUserOperationReceipt", params)
            .await?;
        if res.is_null() {
            return Ok(None);
        }
        serde_json::from_value(res)
            .map(Some)
            .map_err(|e| Error::MalformedField { field: "receipt", reason: e.to_string() })
    }

    /// Fee tiers from the bundler's own gas price oracle.
    pub async fn get_user_operation_gas_price(&self) -> Result<GasPriceTiers> {
        let res = self.transport.request(&self.gas_price_method, json!([])).await?;
        serde_json::from_value(res)
            .map_err(|e| Error::MalformedField { field: "gasPrice", reason: e.to_string() })
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let res = self.transport.request("eth_supportedEntryPoints", json!([])).await?;
        serde_json::from_value(res)
            .map_err(|e| Error::MalformedField { field: "entryPoints", reason: e.to_string() })
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string; some
    // wrap it in an object under "result"/"userOpHash"/"userOperationHash".
    // Accept all four shapes.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(Error::MalformedField {
            field: "userOpHash",
            reason: format!("unexpected eth_sendUserOperation result shape: {res}"),
        });
    };
    parse_h256("userOpHash", hash_str)
}

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, H256},
};
use rand::rngs::OsRng;

use crate::{
    error::{Error, Result},
    types::TypedData,
};

/// Signing capability for user operations.
///
/// `dummy_signature` must return a placeholder with the exact length and
/// shape of the real signature the strategy will later produce: bundlers
/// charge per calldata byte, so a shorter dummy skews gas estimation.
#[async_trait]
pub trait UserOpSigner: Send + Sync {
    fn dummy_signature(&self) -> Bytes;

    /// Signs the canonical operation hash (v0.6/v0.7 scheme).
    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes>;

    /// Signs an EIP-712 payload (v0.8 operations, ERC-2612 permits).
    async fn sign_typed_data(&self, typed: &TypedData) -> Result<Bytes>;
}

/// Single-EOA ECDSA strategy over an in-memory key. Matches the validation
/// scheme of SimpleAccount-style contracts: the operation hash is signed as
/// an EIP-191 personal message, typed-data digests are signed raw.
pub struct EcdsaSigner {
    wallet: LocalWallet,
}

impl EcdsaSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Fresh throwaway key, useful for tests and counterfactual setups.
    pub fn random() -> Self {
        Self { wallet: LocalWallet::new(&mut OsRng) }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl UserOpSigner for EcdsaSigner {
    fn dummy_signature(&self) -> Bytes {
        // 65 bytes of mostly-high entropy; s stays in the low half of the
        // curve order so malleability checks in validation do not revert
        let mut sig = vec![0xffu8; 65];
        sig[32] = 0x7f;
        sig[64] = 0x1c;
        Bytes::from(sig)
    }

    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes> {
        let sig = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| Error::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }

    async fn sign_typed_data(&self, typed: &TypedData) -> Result<Bytes> {
        let sig = self
            .wallet
            .sign_hash(typed.digest())
            .map_err(|e| Error::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{RecoveryMessage, Signature};

    fn test_signer() -> EcdsaSigner {
        EcdsaSigner::new(
            "4242424242424242424242424242424242424242424242424242424242424242"
                .parse()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn dummy_matches_real_signature_length() {
        let signer = test_signer();
        let real = signer
            .sign_user_op_hash(H256::repeat_byte(0x11))
            .await
            .unwrap();
        assert_eq!(signer.dummy_signature().len(), real.len());
        assert_eq!(real.len(), 65);
    }

    #[tokio::test]
    async fn op_hash_signature_recovers_to_signer() {
        let signer = test_signer();
        let hash = H256::repeat_byte(0x33);
        let bytes = signer.sign_user_op_hash(hash).await.unwrap();
        let sig = Signature::try_from(bytes.as_ref()).unwrap();
        // EIP-191 message scheme: recovery runs over the prefixed hash bytes
        let recovered = sig
            .recover(RecoveryMessage::Data(hash.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn typed_data_signature_recovers_over_raw_digest() {
        let signer = test_signer();
        let typed = TypedData {
            domain_separator: H256::repeat_byte(0x0d),
            struct_hash: H256::repeat_byte(0x05),
        };
        let bytes = signer.sign_typed_data(&typed).await.unwrap();
        let sig = Signature::try_from(bytes.as_ref()).unwrap();
        let recovered = sig.recover(RecoveryMessage::Hash(typed.digest())).unwrap();
        assert_eq!(recovered, signer.address());
    }
}

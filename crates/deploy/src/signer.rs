//! Transaction signing and submission for a single deploying identity.

use std::str::FromStr;

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;

use crate::rpc::{EthRpc, TxRequest};

/// Margin applied on top of `eth_estimateGas`, in percent.
const GAS_ESTIMATE_MARGIN_PERCENT: u64 = 20;

/// The identity mutating transactions are sent from.
#[derive(Debug, Clone)]
pub enum Sender {
    /// A private key held by this process; transactions are signed locally.
    Local(PrivateKeySigner),
    /// An account unlocked on the node (anvil dev accounts).
    Unlocked(Address),
}

impl Sender {
    /// Parse a hex private key, with or without `0x` prefix.
    pub fn from_private_key(key: &str) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(key.trim())
            .context("Failed to parse private key")?;
        Ok(Self::Local(signer))
    }

    pub fn address(&self) -> Address {
        match self {
            Self::Local(signer) => signer.address(),
            Self::Unlocked(address) => *address,
        }
    }

    /// Submit a transaction and return its hash.
    ///
    /// Nonces are fetched fresh for every submission, so callers must not submit
    /// concurrently from the same sender.
    pub async fn submit(&self, rpc: &EthRpc, request: TxRequest) -> Result<B256> {
        let request = request.from(self.address());

        match self {
            Self::Unlocked(_) => rpc.send_transaction(&request).await,
            Self::Local(signer) => {
                let chain_id = rpc.chain_id().await?;
                let nonce = rpc.transaction_count(signer.address()).await?;
                let gas_price = rpc.gas_price().await?;
                let estimate = rpc
                    .estimate_gas(&request)
                    .await
                    .context("Failed to estimate gas")?;

                let tx = LegacyTx {
                    chain_id,
                    nonce,
                    gas_price,
                    gas_limit: estimate + estimate * GAS_ESTIMATE_MARGIN_PERCENT / 100,
                    to: request.to,
                    value: request.value.unwrap_or_default(),
                    input: request.data,
                };

                tracing::debug!(
                    nonce,
                    gas_price,
                    gas_limit = tx.gas_limit,
                    to = ?tx.to,
                    "Submitting signed transaction"
                );

                let raw = tx.sign(signer.credential())?;
                rpc.send_raw_transaction(&raw).await
            }
        }
    }
}

/// An EIP-155 replay-protected legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

impl LegacyTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match self.to {
            Some(to) => to.encode(out),
            None => out.push(EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.input.encode(out);
    }

    /// RLP payload hashed for signing: the fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        self.encode_fields(&mut fields);
        self.chain_id.encode(&mut fields);
        0u8.encode(&mut fields);
        0u8.encode(&mut fields);
        rlp_list(fields)
    }

    pub fn signature_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// Sign and return the raw transaction bytes for `eth_sendRawTransaction`.
    pub fn sign(&self, key: &SigningKey) -> Result<Bytes> {
        let hash = self.signature_hash();
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(hash.as_slice())
            .context("Failed to sign transaction")?;

        let bytes = signature.to_bytes();
        let r = U256::from_be_slice(&bytes[..32]);
        let s = U256::from_be_slice(&bytes[32..]);
        let v = u64::from(recovery_id.to_byte()) + self.chain_id * 2 + 35;

        let mut fields = Vec::new();
        self.encode_fields(&mut fields);
        v.encode(&mut fields);
        r.encode(&mut fields);
        s.encode(&mut fields);

        Ok(Bytes::from(rlp_list(fields)))
    }
}

fn rlp_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

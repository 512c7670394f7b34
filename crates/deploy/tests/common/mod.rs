//! In-process ledger and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tempdir::TempDir;
use vedrome_deploy::{
    ArtifactStore, ConfirmationPolicy, EthRpc, LedgerError, SourceVerifier, Transport,
    VerificationOutcome, VerificationRequest, abi::FunctionSig, harness::EPOCH_SECONDS,
};

pub const CHAIN_ID: u64 = 31337;

/// One hour into an epoch, so a single week never crosses two boundaries.
pub const GENESIS_TIMESTAMP: u64 = 2_810 * EPOCH_SECONDS + 3_600;

pub const OWNABLE_REVERT: &str = "execution reverted: Ownable: caller is not the owner";
pub const DISTRIBUTED_REVERT: &str = "execution reverted: already distributed this epoch";

/// Placeholder runtime code stored for every created contract.
const RUNTIME_CODE: [u8; 4] = [0x60, 0x80, 0x60, 0x40];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Short polling so timeouts resolve quickly.
pub fn fast_confirmation() -> ConfirmationPolicy {
    ConfirmationPolicy {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_millis(200),
    }
}

fn selector(signature: &str) -> [u8; 4] {
    *FunctionSig::parse(signature)
        .expect("valid signature")
        .selector()
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    TransferOwnership,
    /// Owner-only setter whose argument is read back by `getter`.
    Setter { getter: [u8; 4] },
    /// Creates a contract and exposes its address through `getter`.
    Factory { getter: [u8; 4] },
    /// Succeeds once per epoch.
    Distribute,
}

#[derive(Debug, Default)]
struct ContractState {
    owner: Address,
    words: HashMap<[u8; 4], B256>,
    last_epoch: Option<u64>,
    distributions: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxJson {
    from: Option<Address>,
    to: Option<Address>,
    #[serde(default)]
    data: Bytes,
}

/// A mutating call the ledger executed.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub from: Address,
    pub to: Address,
    pub selector: [u8; 4],
    pub data: Bytes,
}

/// A contract creation the ledger executed.
#[derive(Debug, Clone)]
pub struct Creation {
    pub from: Address,
    pub address: Address,
    pub init_code: Bytes,
}

struct PendingReceipt {
    receipt: Value,
    polls_left: usize,
}

struct State {
    accounts: Vec<Address>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    contracts: HashMap<Address, ContractState>,
    rules: HashMap<[u8; 4], Rule>,
    receipts: HashMap<B256, PendingReceipt>,
    block: u64,
    timestamp: u64,
    next_timestamp: Option<u64>,
    receipt_delay: usize,
    never_confirm: bool,
    reject_next: Option<String>,
    last_estimate: Option<TxJson>,
    created_by_factories: u64,
    calls: Vec<CallRecord>,
    creations: Vec<Creation>,
    sends: usize,
}

/// A single-node chain with just enough contract behavior for the pipeline and harness.
///
/// Contracts have an `owner()` set to their creator. Behavior is attached to selectors:
/// owner-only setters, factories and once-per-epoch distributions. Any other mutating
/// call succeeds without effect and any other view returns a zero word.
pub struct MockLedger {
    state: Mutex<State>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        let accounts = (0..10u8).map(|i| Address::repeat_byte(0x10 + i)).collect();
        let mut rules = HashMap::new();
        rules.insert(selector("transferOwnership(address)"), Rule::TransferOwnership);

        Self {
            state: Mutex::new(State {
                accounts,
                nonces: HashMap::new(),
                code: HashMap::new(),
                contracts: HashMap::new(),
                rules,
                receipts: HashMap::new(),
                block: 1,
                timestamp: GENESIS_TIMESTAMP,
                next_timestamp: None,
                receipt_delay: 1,
                never_confirm: false,
                reject_next: None,
                last_estimate: None,
                created_by_factories: 0,
                calls: Vec::new(),
                creations: Vec::new(),
                sends: 0,
            }),
        }
    }

    pub fn with_setter(self, setter: &str, getter: &str) -> Self {
        let rule = Rule::Setter {
            getter: selector(getter),
        };
        self.state.lock().unwrap().rules.insert(selector(setter), rule);
        self
    }

    pub fn with_factory(self, create: &str, getter: &str) -> Self {
        let rule = Rule::Factory {
            getter: selector(getter),
        };
        self.state.lock().unwrap().rules.insert(selector(create), rule);
        self
    }

    pub fn with_distribution(self, signature: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rules
            .insert(selector(signature), Rule::Distribute);
        self
    }

    pub fn rpc(self: &Arc<Self>) -> EthRpc {
        EthRpc::new(self.clone())
    }

    /// Rejects the next submitted transaction with `message`.
    pub fn reject_next_send(&self, message: &str) {
        self.state.lock().unwrap().reject_next = Some(message.to_string());
    }

    /// Accept transactions but never report their receipts.
    pub fn never_confirm(&self) {
        self.state.lock().unwrap().never_confirm = true;
    }

    /// Place a contract owned by `owner` without a transaction.
    pub fn install_contract(&self, owner: Address) -> Address {
        let mut state = self.state.lock().unwrap();
        state.created_by_factories += 1;
        let address = derive_address(Address::ZERO, state.created_by_factories + 1_000);
        state.code.insert(address, Bytes::from_static(&RUNTIME_CODE));
        state.contracts.insert(
            address,
            ContractState {
                owner,
                ..Default::default()
            },
        );
        address
    }

    /// Hand `contract` to `owner` out of band.
    pub fn set_owner(&self, contract: Address, owner: Address) {
        if let Some(state) = self.state.lock().unwrap().contracts.get_mut(&contract) {
            state.owner = owner;
        }
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.state.lock().unwrap().accounts.clone()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn creations(&self) -> Vec<Creation> {
        self.state.lock().unwrap().creations.clone()
    }

    /// Number of transactions submitted, accepted or not.
    pub fn sends(&self) -> usize {
        self.state.lock().unwrap().sends
    }

    pub fn owner_of(&self, contract: Address) -> Option<Address> {
        self.state
            .lock()
            .unwrap()
            .contracts
            .get(&contract)
            .map(|c| c.owner)
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state.lock().unwrap().code.contains_key(&address)
    }

    /// Value a registered getter would return.
    pub fn word(&self, contract: Address, getter: &str) -> B256 {
        self.state
            .lock()
            .unwrap()
            .contracts
            .get(&contract)
            .and_then(|c| c.words.get(&selector(getter)).copied())
            .unwrap_or_default()
    }

    pub fn distributions(&self, contract: Address) -> u64 {
        self.state
            .lock()
            .unwrap()
            .contracts
            .get(&contract)
            .map(|c| c.distributions)
            .unwrap_or_default()
    }

    pub fn timestamp(&self) -> u64 {
        self.state.lock().unwrap().timestamp
    }

    fn handle(&self, method: &str, params: &[Value]) -> anyhow::Result<Value> {
        let mut state = self.state.lock().unwrap();
        let rejected = |message: String| -> anyhow::Result<Value> {
            Err(LedgerError::Rejected {
                method: method.to_string(),
                message,
            }
            .into())
        };

        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", CHAIN_ID))),
            "eth_accounts" => Ok(json!(state.accounts)),
            "eth_getTransactionCount" => {
                let address: Address = param(params, 0)?;
                let nonce = state.nonces.get(&address).copied().unwrap_or_default();
                Ok(json!(format!("{:#x}", nonce)))
            }
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_estimateGas" => {
                let tx: TxJson = param(params, 0)?;
                let from = tx.from.unwrap_or_default();
                if let Err(reason) = state.check(from, &tx) {
                    return rejected(reason);
                }
                state.last_estimate = Some(tx);
                Ok(json!("0x186a0"))
            }
            "eth_sendTransaction" | "eth_sendRawTransaction" => {
                state.sends += 1;
                let tx = if method == "eth_sendTransaction" {
                    param(params, 0)?
                } else {
                    state
                        .last_estimate
                        .take()
                        .ok_or_else(|| anyhow::anyhow!("raw transaction without an estimate"))?
                };
                if let Some(message) = state.reject_next.take() {
                    return rejected(message);
                }
                let from = tx.from.unwrap_or_default();
                if let Err(reason) = state.check(from, &tx) {
                    return rejected(reason);
                }
                Ok(json!(state.apply(from, tx)))
            }
            "eth_getTransactionReceipt" => {
                let hash: B256 = param(params, 0)?;
                if state.never_confirm {
                    return Ok(Value::Null);
                }
                match state.receipts.get_mut(&hash) {
                    Some(pending) if pending.polls_left > 0 => {
                        pending.polls_left -= 1;
                        Ok(Value::Null)
                    }
                    Some(pending) => Ok(pending.receipt.clone()),
                    None => Ok(Value::Null),
                }
            }
            "eth_call" => {
                let tx: TxJson = param(params, 0)?;
                Ok(json!(state.view(&tx)))
            }
            "eth_getCode" => {
                let address: Address = param(params, 0)?;
                Ok(json!(state.code.get(&address).cloned().unwrap_or_default()))
            }
            "eth_getBlockByNumber" => Ok(json!({
                "number": format!("{:#x}", state.block),
                "timestamp": format!("{:#x}", state.timestamp),
            })),
            "evm_setNextBlockTimestamp" => {
                let timestamp: u64 = param(params, 0)?;
                if timestamp <= state.timestamp {
                    return rejected(format!(
                        "timestamp {} is not after the latest block ({})",
                        timestamp, state.timestamp
                    ));
                }
                state.next_timestamp = Some(timestamp);
                Ok(Value::Null)
            }
            "evm_mine" => {
                state.mine();
                Ok(json!("0x0"))
            }
            other => rejected(format!("method {} not supported", other)),
        }
    }
}

impl Transport for MockLedger {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Vec<Value>,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { self.handle(method, &params) })
    }
}

impl State {
    fn pending_timestamp(&self) -> u64 {
        self.next_timestamp.unwrap_or(self.timestamp + 1)
    }

    fn mine(&mut self) {
        self.block += 1;
        self.timestamp = self.next_timestamp.take().unwrap_or(self.timestamp + 1);
    }

    /// Revert reason for `tx`, if it would fail.
    fn check(&self, from: Address, tx: &TxJson) -> Result<(), String> {
        let Some(to) = tx.to else {
            return Ok(());
        };
        let Some(contract) = self.contracts.get(&to) else {
            return Err(format!("execution reverted: call to non-contract {}", to));
        };
        let Some(rule) = call_selector(&tx.data).and_then(|s| self.rules.get(&s)) else {
            return Ok(());
        };

        match rule {
            Rule::TransferOwnership | Rule::Setter { .. } if contract.owner != from => {
                Err(OWNABLE_REVERT.to_string())
            }
            Rule::Distribute
                if contract.last_epoch == Some(self.pending_timestamp() / EPOCH_SECONDS) =>
            {
                Err(DISTRIBUTED_REVERT.to_string())
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, from: Address, tx: TxJson) -> B256 {
        let nonce = self.nonces.entry(from).or_default();
        let tx_nonce = *nonce;
        *nonce += 1;

        let tx_hash = keccak256(
            [from.as_slice(), &tx_nonce.to_be_bytes(), tx.data.as_ref()].concat(),
        );

        self.mine();

        let mut created = None;
        match tx.to {
            None => {
                let address = derive_address(from, tx_nonce);
                self.code.insert(address, Bytes::from_static(&RUNTIME_CODE));
                self.contracts.insert(
                    address,
                    ContractState {
                        owner: from,
                        ..Default::default()
                    },
                );
                self.creations.push(Creation {
                    from,
                    address,
                    init_code: tx.data.clone(),
                });
                created = Some(address);
            }
            Some(to) => {
                let selector = call_selector(&tx.data).unwrap_or_default();
                let epoch = self.timestamp / EPOCH_SECONDS;
                let rule = self.rules.get(&selector).copied();

                let product = if let Some(Rule::Factory { .. }) = rule {
                    self.created_by_factories += 1;
                    let address = derive_address(to, self.created_by_factories);
                    self.code.insert(address, Bytes::from_static(&RUNTIME_CODE));
                    self.contracts.insert(
                        address,
                        ContractState {
                            owner: from,
                            ..Default::default()
                        },
                    );
                    Some(address)
                } else {
                    None
                };

                if let Some(contract) = self.contracts.get_mut(&to) {
                    match rule {
                        Some(Rule::TransferOwnership) => contract.owner = word_address(&tx.data),
                        Some(Rule::Setter { getter }) => {
                            contract.words.insert(getter, first_word(&tx.data));
                        }
                        Some(Rule::Factory { getter }) => {
                            if let Some(address) = product {
                                contract.words.insert(getter, address.into_word());
                            }
                        }
                        Some(Rule::Distribute) => {
                            contract.last_epoch = Some(epoch);
                            contract.distributions += 1;
                        }
                        None => {}
                    }
                }

                self.calls.push(CallRecord {
                    from,
                    to,
                    selector,
                    data: tx.data.clone(),
                });
            }
        }

        let receipt = json!({
            "transactionHash": tx_hash,
            "blockNumber": format!("{:#x}", self.block),
            "contractAddress": created,
            "status": "0x1",
            "gasUsed": "0x5208",
        });
        self.receipts.insert(
            tx_hash,
            PendingReceipt {
                receipt,
                polls_left: self.receipt_delay,
            },
        );

        tx_hash
    }

    fn view(&self, tx: &TxJson) -> Bytes {
        let word = match (tx.to.and_then(|to| self.contracts.get(&to)), call_selector(&tx.data)) {
            (Some(contract), Some(s)) if s == selector("owner()") => contract.owner.into_word(),
            (Some(contract), Some(s)) if s == selector("distributions()") => {
                B256::from(U256::from(contract.distributions).to_be_bytes::<32>())
            }
            (Some(contract), Some(s)) => contract.words.get(&s).copied().unwrap_or_default(),
            _ => B256::ZERO,
        };
        Bytes::copy_from_slice(word.as_slice())
    }
}

fn param<T: serde::de::DeserializeOwned>(params: &[Value], index: usize) -> anyhow::Result<T> {
    let value = params
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing parameter #{}", index))?;
    Ok(serde_json::from_value(value)?)
}

fn call_selector(data: &Bytes) -> Option<[u8; 4]> {
    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
}

fn first_word(data: &Bytes) -> B256 {
    data.get(4..36).map(B256::from_slice).unwrap_or_default()
}

fn word_address(data: &Bytes) -> Address {
    Address::from_word(first_word(data))
}

fn derive_address(creator: Address, nonce: u64) -> Address {
    Address::from_slice(&keccak256([creator.as_slice(), &nonce.to_be_bytes()].concat())[12..])
}

/// Records verification requests instead of calling an explorer.
#[derive(Default)]
pub struct RecordingVerifier {
    pub requests: Mutex<Vec<VerificationRequest>>,
    /// Contract names the explorer refuses to verify.
    pub failing: Vec<String>,
}

impl RecordingVerifier {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failing: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn requests(&self) -> Vec<VerificationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SourceVerifier for RecordingVerifier {
    fn verify<'a>(
        &'a self,
        request: &'a VerificationRequest,
    ) -> BoxFuture<'a, anyhow::Result<VerificationOutcome>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            if self
                .failing
                .iter()
                .any(|name| request.contract_name.ends_with(&format!(":{}", name)))
            {
                anyhow::bail!("Fail - Unable to verify {}", request.contract_name);
            }
            Ok(VerificationOutcome::Verified)
        })
    }
}

/// A Hardhat artifacts directory in a temporary location.
pub struct Artifacts {
    pub dir: TempDir,
}

impl Artifacts {
    pub fn new() -> Self {
        let dir = TempDir::new("vedrome-artifacts").unwrap();
        let build_info = dir.path().join("build-info");
        std::fs::create_dir_all(&build_info).unwrap();
        std::fs::write(
            build_info.join("test.json"),
            json!({
                "_format": "hh-sol-build-info-1",
                "solcVersion": "0.8.19",
                "solcLongVersion": "0.8.19+commit.7dd6d404",
                "input": {"language": "Solidity", "sources": {}},
            })
            .to_string(),
        )
        .unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path())
    }

    /// Write `contracts/<name>.sol/<name>.json` with a constructor taking `inputs`.
    pub fn add(&self, name: &str, inputs: &[&str]) -> &Self {
        let source = format!("contracts/{}.sol", name);
        let dir = self.dir.path().join(&source);
        std::fs::create_dir_all(&dir).unwrap();

        let inputs = inputs
            .iter()
            .enumerate()
            .map(|(i, ty)| json!({"name": format!("arg{}", i), "type": ty, "internalType": ty}))
            .collect::<Vec<_>>();

        std::fs::write(
            dir.join(format!("{}.json", name)),
            json!({
                "_format": "hh-sol-artifact-1",
                "contractName": name,
                "sourceName": source,
                "abi": [{"type": "constructor", "inputs": inputs, "stateMutability": "nonpayable"}],
                "bytecode": "0x6080604052348015600f57600080fd5b50",
                "deployedBytecode": "0x6080604052",
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join(format!("{}.dbg.json", name)),
            json!({"_format": "hh-sol-dbg-1", "buildInfo": "../../build-info/test.json"})
                .to_string(),
        )
        .unwrap();
        self
    }
}

/// Bytecode every test artifact carries, as written by [`Artifacts::add`].
pub fn artifact_bytecode() -> Vec<u8> {
    hex::decode("6080604052348015600f57600080fd5b50").unwrap()
}

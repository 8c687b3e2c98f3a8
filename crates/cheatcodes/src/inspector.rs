//! Cheatcode hooks.

use crate::{
    CheatsConfig, Error, Result,
    context::{Broadcast, CallContextStack, CallSite},
    evm::{
        DealRecord,
        mock::{MockCallDataContext, MockCallReturnData},
    },
    record::RecordAccess,
    script::{Authorization, BroadcastableTransaction, BroadcastableTransactions},
    state_diff::{AccountAccess, AccountAccessKind, ChainInfo, StateDiffRecorder, StorageAccess},
};
use alloy_primitives::{Address, B256, Bytes, U256, keccak256, map::AddressHashMap};
use derive_more::{Display, IsVariant};
use sandbox_common::{MappingSlots, SlotIdentifier, mapping_slots};
use sandbox_evm_core::{
    backend::{Backend, BackendError, RevertDiagnostic},
    constants::{CALLER, CHEATCODE_ADDRESS, DEFAULT_CREATE2_DEPLOYER, TEST_CONTRACT_ADDRESS},
};
use std::{collections::BTreeMap, sync::Arc};

/// The call scheme of a message call.
#[derive(Clone, Copy, Debug, Default, Display, IsVariant, PartialEq, Eq, Hash)]
pub enum CallKind {
    #[default]
    Call,
    StaticCall,
    CallCode,
    DelegateCall,
}

impl From<CallKind> for AccountAccessKind {
    fn from(kind: CallKind) -> Self {
        match kind {
            CallKind::Call => Self::Call,
            CallKind::StaticCall => Self::StaticCall,
            CallKind::CallCode => Self::CallCode,
            CallKind::DelegateCall => Self::DelegateCall,
        }
    }
}

/// Inputs of a message call, as seen by the interpreter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallInputs {
    /// The account making the call.
    pub caller: Address,
    /// The account whose storage the call runs against.
    pub target_address: Address,
    /// The account whose code runs.
    pub bytecode_address: Address,
    pub value: U256,
    pub input: Bytes,
    pub kind: CallKind,
    /// Depth of the calling frame.
    pub depth: u64,
}

impl CallInputs {
    /// A plain `CALL` of `target` made by `caller` from `depth`.
    pub fn call(caller: Address, target: Address, depth: u64) -> Self {
        Self { caller, target_address: target, bytecode_address: target, depth, ..Default::default() }
    }

    pub fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }
}

/// How a call runs once the cheatcodes have been applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    /// `msg.sender` of the call.
    pub caller: Address,
    /// `tx.origin` while the call runs.
    pub origin: Address,
    /// The account whose storage the call runs against.
    pub target_address: Address,
    /// The result of a mocked call. The callee's code must not run when set.
    pub mocked: Option<MockCallReturnData>,
}

/// How a frame ended.
#[derive(Clone, Copy, Debug, Default, Display, IsVariant, PartialEq, Eq)]
pub enum CallStatus {
    #[default]
    Return,
    Stop,
    Revert,
}

/// The address derivation scheme of a creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CreateScheme {
    #[default]
    Create,
    Create2 { salt: U256 },
}

/// Inputs of a contract creation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateInputs {
    pub caller: Address,
    pub value: U256,
    pub init_code: Bytes,
    pub scheme: CreateScheme,
    /// Depth of the creating frame.
    pub depth: u64,
}

/// How a creation runs once the cheatcodes have been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateOutcome {
    /// The account performing the creation.
    pub caller: Address,
    /// `tx.origin` while the creation runs.
    pub origin: Address,
    /// The address of the new contract.
    pub address: Address,
}

/// The cheatcode state and the hooks the interpreter calls into.
///
/// Every hook takes the depth of the frame it runs for: `call`, `call_end`, `create` and
/// `create_end` the depth of the calling frame, storage hooks the depth of the frame the
/// instruction executes in.
#[derive(Clone, Debug)]
pub struct Cheatcodes {
    /// Additional, user configurable context this Inspector has access to when inspecting a call
    pub config: Arc<CheatsConfig>,

    /// Address labels
    pub labels: AddressHashMap<String>,

    /// `tx.origin` of the transaction being executed
    pub tx_origin: Address,

    /// The contract under test. Reverting calls to other contracts are diagnosed in forking mode.
    pub test_contract: Address,

    /// Prank and broadcast frames
    pub context: CallContextStack,

    /// Additional diagnostic for reverts
    pub fork_revert_diagnostic: Option<RevertDiagnostic>,

    /// Recorded storage reads and writes
    pub accesses: Option<RecordAccess>,

    /// Recorded account accesses (calls, creates) by relative call depth
    pub recorded_account_diffs: Option<StateDiffRecorder>,

    /// Accesses of the most recently closed state diff window
    pub last_state_diff: Option<Vec<AccountAccess>>,

    /// Balances set with `deal`
    pub eth_deals: Vec<DealRecord>,

    /// Mocked calls
    // **Note**: inner must a BTreeMap because of special `Ord` impl for `MockCallDataContext`
    pub mocked_calls: AddressHashMap<BTreeMap<MockCallDataContext, MockCallReturnData>>,

    /// Mapping slots.
    pub mapping_slots: Option<AddressHashMap<MappingSlots>>,

    /// Storage layouts of known contracts.
    pub slot_identifiers: AddressHashMap<SlotIdentifier>,

    /// Scripting based transactions
    pub broadcastable_transactions: BroadcastableTransactions,

    /// Delegation attached to the next broadcast transaction.
    pub active_delegation: Option<Authorization>,

    /// Blob attached to the next broadcast transaction.
    pub active_blob: Option<Bytes>,
}

impl Default for Cheatcodes {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl Cheatcodes {
    /// Creates a new `Cheatcodes` with the given settings.
    pub fn new(config: Arc<CheatsConfig>) -> Self {
        let labels = config.labels.iter().map(|(address, label)| (*address, label.clone())).collect();
        Self {
            config,
            labels,
            tx_origin: CALLER,
            test_contract: TEST_CONTRACT_ADDRESS,
            context: Default::default(),
            fork_revert_diagnostic: None,
            accesses: None,
            recorded_account_diffs: None,
            last_state_diff: None,
            eth_deals: Vec::new(),
            mocked_calls: Default::default(),
            mapping_slots: None,
            slot_identifiers: Default::default(),
            broadcastable_transactions: Default::default(),
            active_delegation: None,
            active_blob: None,
        }
    }

    /// Returns the context cheatcodes run in when `caller`, executing at `depth`, invokes them.
    pub fn ctx<'a>(&'a mut self, backend: &'a mut Backend, caller: Address, depth: u64) -> CheatsCtxt<'a> {
        CheatsCtxt { state: self, backend, caller, depth }
    }

    fn chain_info(&self, backend: &Backend) -> ChainInfo {
        ChainInfo { fork_id: backend.active_fork_id().unwrap_or_default(), chain_id: self.config.chain_id }
    }

    /// Resolves the caller and origin of a message call and records it.
    ///
    /// Under a broadcast, non-static calls are queued as transactions of the signer.
    pub fn call(&mut self, backend: &mut Backend, call: &CallInputs) -> Result<CallOutcome> {
        let mut outcome = CallOutcome {
            caller: call.caller,
            origin: self.tx_origin,
            target_address: call.target_address,
            mocked: None,
        };
        if call.bytecode_address == CHEATCODE_ADDRESS {
            return Ok(outcome);
        }

        // Handle mocked calls
        if let Some(return_data) = self.mocked_result(call) {
            outcome.mocked = Some(return_data.clone());
            trace!(target: "cheatcodes", target = %call.bytecode_address, status = %return_data.status, "mocked call");
            self.record_call(backend, call, &outcome);
            return Ok(outcome);
        }

        let resolved = self.context.resolve_caller(call.depth, call.caller, self.tx_origin);
        outcome.caller = resolved.sender;
        outcome.origin = resolved.origin;
        self.tx_origin = resolved.origin;

        // Apply our prank
        if let Some(depth) = resolved.prank {
            self.context.mark_used(depth);
            if resolved.delegate_allowed && call.kind.is_delegate_call() {
                outcome.target_address = resolved.sender;
            }
        }

        // Apply our broadcast
        if resolved.broadcast {
            let Some(broadcast) = self.context.broadcast().cloned() else {
                return Ok(outcome);
            };
            if !call.kind.is_static_call() {
                let nonce = backend.read_nonce(broadcast.new_origin)?;
                let authorization = self.active_delegation.take();
                self.broadcastable_transactions.push_back(BroadcastableTransaction {
                    rpc: backend.active_fork_url(),
                    from: broadcast.new_origin,
                    to: Some(call.bytecode_address),
                    value: call.value,
                    input: call.input.clone(),
                    nonce,
                    authorization: authorization.clone(),
                    blob: self.active_blob.take(),
                });
                debug!(target: "cheatcodes", tx=?self.broadcastable_transactions.back(), "broadcastable call");

                bump_nonce(backend, broadcast.new_origin, nonce)?;
                if let Some(authorization) = authorization {
                    let next = next_nonce(authorization.authority, authorization.nonce)?;
                    backend.set_nonce(authorization.authority, next)?;
                }
            } else if broadcast.single_call {
                bail!("`staticcall`s are not allowed after `broadcast`; use `startBroadcast` instead");
            }
        }

        self.record_call(backend, call, &outcome);
        Ok(outcome)
    }

    /// Opens a state diff frame for `call` if `startStateDiffRecording` has been called.
    fn record_call(&mut self, backend: &Backend, call: &CallInputs, outcome: &CallOutcome) {
        if self.recorded_account_diffs.is_some() {
            let chain_info = self.chain_info(backend);
            let (initialized, old_balance) = match backend.basic(call.target_address) {
                Ok(info) => (info.exists(), info.balance),
                Err(_) => (false, U256::ZERO),
            };
            if let Some(recorder) = &mut self.recorded_account_diffs {
                recorder.start_frame(AccountAccess {
                    chain_info,
                    accessor: outcome.caller,
                    account: outcome.target_address,
                    kind: call.kind.into(),
                    initialized,
                    old_balance,
                    new_balance: old_balance,
                    deployed_code: Bytes::new(),
                    value: call.value,
                    data: call.input.clone(),
                    reverted: false,
                    storage_accesses: Vec::new(),
                    depth: call.depth,
                });
            }
        }
    }

    /// Unwinds the frames of a message call once it returns.
    ///
    /// A revert following a call that was diagnosed as a fork-related failure is reported with
    /// the diagnostic.
    pub fn call_end(&mut self, backend: &mut Backend, call: &CallInputs, status: CallStatus) -> Result {
        if call.bytecode_address == CHEATCODE_ADDRESS {
            return Ok(());
        }

        // Clean up pranks and broadcasts
        if let Some(origin) = self.context.call_end(call.depth) {
            self.tx_origin = origin;
        }

        // The root call cannot be recorded.
        if call.depth > 0
            && let Some(recorder) = &mut self.recorded_account_diffs
        {
            recorder.end_frame(call.depth, status.is_revert(), |access| {
                debug_assert!(access.kind.is_call());
                if let Ok(info) = backend.basic(access.account) {
                    access.new_balance = info.balance;
                }
            });
        }

        // this will ensure we don't have false positives when trying to diagnose reverts in fork
        // mode
        let diag = self.fork_revert_diagnostic.take();

        // if there's a revert and a previous call was diagnosed as fork related revert then we can
        // return a better error here
        if status.is_revert()
            && let Some(err) = diag
        {
            bail!(err.to_error_msg(&self.labels));
        }

        // if a call to a different contract than the original test contract returned with
        // `Stop` we check if the contract actually exists on the active fork
        if backend.is_forked_mode() && status.is_stop() && call.bytecode_address != self.test_contract {
            self.fork_revert_diagnostic = backend.diagnose_revert(call.bytecode_address);
        }

        Ok(())
    }

    /// Resolves the caller of a creation, queues it under a broadcast and records it.
    pub fn create(&mut self, backend: &mut Backend, create: &CreateInputs) -> Result<CreateOutcome> {
        let resolved = self.context.resolve_caller(create.depth, create.caller, self.tx_origin);
        let mut caller = create.caller;

        // Apply our prank
        if let Some(depth) = resolved.prank {
            self.context.mark_used(depth);
            caller = resolved.sender;
            self.tx_origin = resolved.origin;
        }

        // Apply our broadcast
        let broadcast = self
            .context
            .broadcast()
            .filter(|broadcast| {
                create.depth >= broadcast.depth && create.caller == broadcast.original_caller
            })
            .cloned();
        let mut creator_nonce = None;
        if let Some(broadcast) = broadcast {
            self.tx_origin = broadcast.new_origin;
            if queues_create(&broadcast, create.depth) {
                let (input, to, nonce) = process_create(backend, broadcast.new_origin, create)?;
                self.broadcastable_transactions.push_back(BroadcastableTransaction {
                    rpc: backend.active_fork_url(),
                    from: broadcast.new_origin,
                    to,
                    value: create.value,
                    input,
                    nonce,
                    authorization: None,
                    blob: None,
                });
                let kind = match create.scheme {
                    CreateScheme::Create => "create",
                    CreateScheme::Create2 { .. } => "create2",
                };
                debug!(target: "cheatcodes", tx=?self.broadcastable_transactions.back(), "broadcastable {kind}");

                match create.scheme {
                    CreateScheme::Create => {
                        caller = broadcast.new_origin;
                        creator_nonce = Some(nonce);
                    }
                    CreateScheme::Create2 { .. } => caller = DEFAULT_CREATE2_DEPLOYER,
                }
                bump_nonce(backend, broadcast.new_origin, nonce)?;
            }
        }

        let address = match create.scheme {
            CreateScheme::Create => {
                let nonce = match creator_nonce {
                    Some(nonce) => nonce,
                    None => backend.read_nonce(caller)?,
                };
                caller.create(nonce)
            }
            CreateScheme::Create2 { salt } => {
                caller.create2_from_code(salt.to_be_bytes::<32>(), &create.init_code)
            }
        };

        // If `startStateDiffRecording` has been called, record the create
        if self.recorded_account_diffs.is_some() {
            let chain_info = self.chain_info(backend);
            let old_balance = backend.basic(address).map(|info| info.balance).unwrap_or_default();
            if let Some(recorder) = &mut self.recorded_account_diffs {
                recorder.start_frame(AccountAccess {
                    chain_info,
                    accessor: caller,
                    account: address,
                    kind: AccountAccessKind::Create,
                    initialized: true,
                    old_balance,
                    new_balance: old_balance,
                    deployed_code: Bytes::new(),
                    value: create.value,
                    data: create.init_code.clone(),
                    reverted: false,
                    storage_accesses: Vec::new(),
                    depth: create.depth,
                });
            }
        }

        Ok(CreateOutcome { caller, origin: self.tx_origin, address })
    }

    /// Unwinds the frames of a creation and stamps its deployed code once it returns.
    pub fn create_end(
        &mut self,
        backend: &mut Backend,
        create: &CreateInputs,
        status: CallStatus,
        address: Option<Address>,
    ) -> Result {
        // Clean up pranks and broadcasts
        if let Some(origin) = self.context.call_end(create.depth) {
            self.tx_origin = origin;
        }

        if create.depth > 0
            && let Some(recorder) = &mut self.recorded_account_diffs
        {
            recorder.end_frame(create.depth, status.is_revert(), |access| {
                debug_assert_eq!(access.kind, AccountAccessKind::Create);
                if let Some(address) = address
                    && let Ok(info) = backend.basic(address)
                {
                    access.new_balance = info.balance;
                    access.deployed_code = info.code;
                }
            });
        }
        Ok(())
    }

    /// Reads a storage slot of `address` through the backend, recording the access.
    pub fn sload(&mut self, backend: &mut Backend, address: Address, slot: U256, depth: u64) -> Result<U256> {
        let value = backend.read_storage(address, slot)?;

        if let Some(accesses) = &mut self.accesses {
            accesses.record_read(address, slot);
        }
        if let Some(recorder) = &mut self.recorded_account_diffs {
            recorder.record_storage(
                StorageAccess {
                    account: address,
                    slot: slot.into(),
                    is_write: false,
                    previous_value: value.into(),
                    new_value: value.into(),
                    reverted: false,
                },
                depth,
            );
        }
        Ok(value)
    }

    /// Writes a storage slot of `address` through the backend, recording the access.
    pub fn sstore(
        &mut self,
        backend: &mut Backend,
        address: Address,
        slot: U256,
        value: U256,
        depth: u64,
    ) -> Result {
        let previous_value = backend.read_storage(address, slot)?;
        backend.write_storage(address, slot, value)?;

        if let Some(accesses) = &mut self.accesses {
            accesses.record_write(address, slot);
        }
        if let Some(recorder) = &mut self.recorded_account_diffs {
            recorder.record_storage(
                StorageAccess {
                    account: address,
                    slot: slot.into(),
                    is_write: true,
                    previous_value: previous_value.into(),
                    new_value: value.into(),
                    reverted: false,
                },
                depth,
            );
        }
        if let Some(mapping_slots) = &mut self.mapping_slots {
            mapping_slots::on_sstore(mapping_slots, address, slot.into());
        }
        Ok(())
    }

    /// Hashes `preimage` on behalf of `address`, remembering mapping lookups while mapping
    /// recording is on.
    pub fn keccak(&mut self, address: Address, preimage: &[u8]) -> B256 {
        if let Some(mapping_slots) = &mut self.mapping_slots {
            mapping_slots::on_keccak(mapping_slots, address, preimage);
        }
        keccak256(preimage)
    }

    /// Records an access of `account` that does not open a frame: balance and code reads, and
    /// selfdestructs.
    pub fn account_access(
        &mut self,
        backend: &Backend,
        accessor: Address,
        account: Address,
        kind: AccountAccessKind,
        depth: u64,
    ) {
        debug_assert!(!kind.is_call() && kind != AccountAccessKind::Create);
        if self.recorded_account_diffs.is_none() {
            return;
        }
        let chain_info = self.chain_info(backend);
        let (initialized, balance) = match backend.basic(account) {
            Ok(info) => (info.exists(), info.balance),
            Err(_) => (false, U256::ZERO),
        };
        let value = if kind == AccountAccessKind::SelfDestruct { balance } else { U256::ZERO };
        if let Some(recorder) = &mut self.recorded_account_diffs {
            recorder.record_access(AccountAccess {
                chain_info,
                accessor,
                account,
                kind,
                initialized,
                old_balance: balance,
                new_balance: balance,
                deployed_code: Bytes::new(),
                value,
                data: Bytes::new(),
                reverted: false,
                storage_accesses: Vec::new(),
                depth,
            });
        }
    }
}

/// The context a cheatcode runs in: the cheatcode state, the backend, and the frame that
/// invoked it.
#[derive(Debug)]
pub struct CheatsCtxt<'a> {
    /// The cheatcode inspector state.
    pub state: &'a mut Cheatcodes,
    /// The state the cheatcodes operate on.
    pub backend: &'a mut Backend,
    /// The contract that invoked the cheatcode.
    pub caller: Address,
    /// Depth of the invoking frame.
    pub depth: u64,
}

impl CheatsCtxt<'_> {
    pub(crate) fn site(&self) -> CallSite {
        CallSite { caller: self.caller, origin: self.state.tx_origin, depth: self.depth }
    }
}

/// Returns true if a creation made at `depth` is sent as its own transaction.
fn queues_create(broadcast: &Broadcast, depth: u64) -> bool {
    depth == broadcast.depth || (broadcast.deploy_from_code && depth == broadcast.depth + 1)
}

fn bump_nonce(backend: &mut Backend, address: Address, prev: u64) -> Result {
    let nonce = next_nonce(address, prev)?;
    backend.set_nonce(address, nonce)?;
    debug!(target: "cheatcodes", address=%address, nonce, prev, "incremented nonce");
    Ok(())
}

pub(crate) fn next_nonce(address: Address, nonce: u64) -> Result<u64> {
    nonce.checked_add(1).ok_or(Error::Backend(BackendError::NonceOverflow(address)))
}

/// Returns the input, recipient and nonce of the transaction deploying `create` from
/// `broadcast_sender`.
///
/// `CREATE2` goes through the deterministic deployer, which expects `salt ++ init_code`.
fn process_create(
    backend: &Backend,
    broadcast_sender: Address,
    create: &CreateInputs,
) -> Result<(Bytes, Option<Address>, u64)> {
    let nonce = backend.read_nonce(broadcast_sender)?;
    match create.scheme {
        CreateScheme::Create => Ok((create.init_code.clone(), None, nonce)),
        CreateScheme::Create2 { salt } => {
            // Sanity checks for our CREATE2 deployer
            if backend.code(DEFAULT_CREATE2_DEPLOYER)?.is_empty() {
                return Err(Error::display(format_args!(
                    "missing CREATE2 deployer: {DEFAULT_CREATE2_DEPLOYER}"
                )));
            }
            let calldata = [&salt.to_be_bytes::<32>()[..], &create.init_code[..]].concat();
            Ok((calldata.into(), Some(DEFAULT_CREATE2_DEPLOYER), nonce))
        }
    }
}

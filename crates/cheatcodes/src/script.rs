//! Broadcasting: recording calls of a signer as transactions.

use crate::{Cheatcodes, CheatsCtxt, Error, Result, context::Broadcast, inspector::next_nonce};
use alloy_primitives::{Address, Bytes, U256};
use serde::Serialize;
use std::collections::VecDeque;

/// An EIP-7702 authorization attached to a broadcast transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// The account delegating.
    pub authority: Address,
    /// The contract whose code the authority runs.
    pub implementation: Address,
    /// The authority's nonce the authorization is valid for.
    pub nonce: u64,
    pub chain_id: u64,
}

/// A call or creation recorded under a broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastableTransaction {
    /// The URL of the fork the transaction was recorded on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc: Option<String>,
    pub from: Address,
    /// The recipient, `None` for a creation.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<Bytes>,
}

/// List of transactions that can be broadcasted.
pub type BroadcastableTransactions = VecDeque<BroadcastableTransaction>;

impl CheatsCtxt<'_> {
    /// Records the next call made from the invoking frame as a transaction of `new_origin`,
    /// which defaults to the current `tx.origin`.
    pub fn broadcast(&mut self, new_origin: Option<Address>) -> Result {
        self.arm_broadcast(new_origin, true)
    }

    /// Records every call made from the invoking frame as a transaction of `new_origin` until
    /// [`stop_broadcast`](Self::stop_broadcast).
    pub fn start_broadcast(&mut self, new_origin: Option<Address>) -> Result {
        self.arm_broadcast(new_origin, false)
    }

    pub fn stop_broadcast(&mut self) -> Result {
        let broadcast = self.state.context.stop_broadcast()?;
        debug!(target: "cheatcodes", ?broadcast, "stopped");
        Ok(())
    }

    fn arm_broadcast(&mut self, new_origin: Option<Address>, single_call: bool) -> Result {
        let broadcast = Broadcast {
            new_origin: new_origin.unwrap_or(self.state.tx_origin),
            original_caller: self.caller,
            original_origin: self.state.tx_origin,
            depth: self.depth,
            single_call,
            deploy_from_code: false,
        };
        self.state.context.arm_broadcast(broadcast)
    }

    /// Delegates `authority` to `implementation` and attaches the authorization to the next
    /// broadcast transaction.
    ///
    /// If the authority is the broadcast signer, the authorization is valid for the nonce after
    /// the one the transaction itself uses.
    pub fn attach_delegation(
        &mut self,
        authority: Address,
        implementation: Address,
    ) -> Result<Authorization> {
        if self.state.active_blob.is_some() {
            return Err(Error::DelegationBlobConflict);
        }
        let mut nonce = self.backend.read_nonce(authority)?;
        if self.state.context.broadcast().is_some_and(|broadcast| broadcast.new_origin == authority)
        {
            nonce = next_nonce(authority, nonce)?;
        }
        let authorization =
            Authorization { authority, implementation, nonce, chain_id: self.state.config.chain_id };
        self.backend.set_delegation(authority, implementation)?;
        debug!(target: "cheatcodes", %authority, %implementation, nonce, "attached delegation");
        self.state.active_delegation = Some(authorization.clone());
        Ok(authorization)
    }
}

impl Cheatcodes {
    /// Attaches a blob to the next broadcast transaction.
    pub fn attach_blob(&mut self, blob: impl Into<Bytes>) -> Result {
        if self.active_delegation.is_some() {
            return Err(Error::DelegationBlobConflict);
        }
        self.active_blob = Some(blob.into());
        Ok(())
    }

    /// Lets creations made one frame below the broadcast depth be recorded too, as done by
    /// cheatcodes that deploy code on behalf of the broadcasting frame.
    pub fn set_deploy_from_code(&mut self, deploy_from_code: bool) {
        if let Some(broadcast) = self.context.broadcast_mut() {
            broadcast.deploy_from_code = deploy_from_code;
        }
    }

    /// Takes the recorded transactions.
    pub fn take_broadcastable_transactions(&mut self) -> BroadcastableTransactions {
        std::mem::take(&mut self.broadcastable_transactions)
    }
}

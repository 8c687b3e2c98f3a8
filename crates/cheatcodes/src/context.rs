//! Call-context frames.
//!
//! A frame overrides `msg.sender` and `tx.origin` for calls made from the frame that armed it.
//! Pranks may nest, one per depth; a broadcast excludes any prank and any other broadcast.

use crate::{Error, Result};
use alloy_primitives::Address;
use std::collections::BTreeMap;

/// Where a frame is armed from: the calling contract, the origin at that time and its depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub caller: Address,
    pub origin: Address,
    pub depth: u64,
}

/// Prank information.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prank {
    /// Address of the contract that initiated the prank
    pub prank_caller: Address,
    /// Address of `tx.origin` when the prank was initiated
    pub prank_origin: Address,
    /// The address to assign to `msg.sender`
    pub new_caller: Address,
    /// The address to assign to `tx.origin`
    pub new_origin: Option<Address>,
    /// The depth at which the prank was called
    pub depth: u64,
    /// Whether the prank stops by itself after the next call
    pub single_call: bool,
    /// Whether the prank should be applied to delegate calls
    pub delegate_call: bool,
    /// Whether the prank has been used yet (false if unused)
    pub used: bool,
}

impl Prank {
    /// Create a new prank.
    pub fn new(
        site: CallSite,
        new_caller: Address,
        new_origin: Option<Address>,
        single_call: bool,
        delegate_call: bool,
    ) -> Self {
        Self {
            prank_caller: site.caller,
            prank_origin: site.origin,
            new_caller,
            new_origin,
            depth: site.depth,
            single_call,
            delegate_call,
            used: false,
        }
    }

    /// Apply the prank by setting `used` to true iff it is false
    /// Only returns self in the case it is updated (first application)
    pub fn first_time_applied(&self) -> Option<Self> {
        if self.used { None } else { Some(Self { used: true, ..self.clone() }) }
    }
}

/// Represents which simulated transaction to record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Broadcast {
    /// Address of the transaction origin
    pub new_origin: Address,
    /// Original caller
    pub original_caller: Address,
    /// Original `tx.origin`
    pub original_origin: Address,
    /// Depth of the broadcast
    pub depth: u64,
    /// Whether the broadcast stops by itself after the next call
    pub single_call: bool,
    /// Whether creations issued one frame below the broadcast depth by a code-deploying
    /// cheatcode are recorded too
    pub deploy_from_code: bool,
}

/// A call-context frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Prank(Prank),
    Broadcast(Broadcast),
}

impl Frame {
    /// Whether the frame stops by itself after the next call.
    pub fn is_single_call(&self) -> bool {
        match self {
            Self::Prank(prank) => prank.single_call,
            Self::Broadcast(broadcast) => broadcast.single_call,
        }
    }
}

/// The caller and origin a call runs with once the frames have been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedCaller {
    /// `msg.sender` of the call.
    pub sender: Address,
    /// `tx.origin` while the call runs.
    pub origin: Address,
    /// Whether a delegate call may run in the context of the impersonated account.
    pub delegate_allowed: bool,
    /// Depth of the prank that applied, if any.
    pub prank: Option<u64>,
    /// Whether the broadcast applied.
    pub broadcast: bool,
}

/// Pranks and broadcasts, keyed by the depth that armed them.
#[derive(Clone, Debug, Default)]
pub struct CallContextStack {
    frames: BTreeMap<u64, Frame>,
}

impl CallContextStack {
    /// Returns the frame in effect at `depth`: the deepest one armed at or above it.
    pub fn frame(&self, depth: u64) -> Option<&Frame> {
        self.frames.range(..=depth).next_back().map(|(_, frame)| frame)
    }

    /// Returns the prank in effect at `depth`.
    pub fn prank(&self, depth: u64) -> Option<&Prank> {
        match self.frame(depth)? {
            Frame::Prank(prank) => Some(prank),
            Frame::Broadcast(_) => None,
        }
    }

    /// Returns the active broadcast.
    pub fn broadcast(&self) -> Option<&Broadcast> {
        self.frames.values().find_map(|frame| match frame {
            Frame::Broadcast(broadcast) => Some(broadcast),
            Frame::Prank(_) => None,
        })
    }

    pub fn broadcast_mut(&mut self) -> Option<&mut Broadcast> {
        self.frames.values_mut().find_map(|frame| match frame {
            Frame::Broadcast(broadcast) => Some(broadcast),
            Frame::Prank(_) => None,
        })
    }

    /// Returns true if any prank is armed.
    pub fn has_prank(&self) -> bool {
        self.frames.values().any(|frame| matches!(frame, Frame::Prank(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Arms a prank that applies to the next call made from `site`.
    pub fn arm_single(
        &mut self,
        site: CallSite,
        new_caller: Address,
        new_origin: Option<Address>,
        delegate_call: bool,
    ) -> Result {
        self.arm(Prank::new(site, new_caller, new_origin, true, delegate_call))
    }

    /// Arms a prank that applies to every call made from `site` until it is disarmed.
    pub fn arm_persistent(
        &mut self,
        site: CallSite,
        new_caller: Address,
        new_origin: Option<Address>,
        delegate_call: bool,
    ) -> Result {
        self.arm(Prank::new(site, new_caller, new_origin, false, delegate_call))
    }

    fn arm(&mut self, prank: Prank) -> Result {
        ensure!(
            self.broadcast().is_none(),
            "cannot `prank` for a broadcasted transaction; \
             pass the desired `tx.origin` into the `broadcast` cheatcode call"
        );
        if let Some(Frame::Prank(current)) = self.frames.get(&prank.depth) {
            if !current.used {
                return Err(Error::FrameInUse);
            }
            if current.single_call != prank.single_call {
                return Err(Error::ConflictingFrame);
            }
        }
        debug!(target: "cheatcodes", depth = prank.depth, new_caller = %prank.new_caller, single_call = prank.single_call, "armed prank");
        self.frames.insert(prank.depth, Frame::Prank(prank));
        Ok(())
    }

    /// Removes the prank armed at `depth`.
    pub fn disarm(&mut self, depth: u64) -> Option<Prank> {
        match self.frames.remove(&depth)? {
            Frame::Prank(prank) => Some(prank),
            frame @ Frame::Broadcast(_) => {
                self.frames.insert(depth, frame);
                None
            }
        }
    }

    /// Arms a broadcast.
    pub fn arm_broadcast(&mut self, broadcast: Broadcast) -> Result {
        ensure!(
            !self.has_prank(),
            "You have an active prank. Broadcasting and pranks are not compatible. \
             Disable one or the other"
        );
        ensure!(self.broadcast().is_none(), "You have an active broadcast already.");
        debug!(target: "cheatcodes", depth = broadcast.depth, signer = %broadcast.new_origin, single_call = broadcast.single_call, "armed broadcast");
        self.frames.insert(broadcast.depth, Frame::Broadcast(broadcast));
        Ok(())
    }

    /// Removes the active broadcast.
    pub fn stop_broadcast(&mut self) -> Result<Broadcast> {
        let depth = self.broadcast().map(|broadcast| broadcast.depth);
        match depth.and_then(|depth| self.frames.remove(&depth)) {
            Some(Frame::Broadcast(broadcast)) => Ok(broadcast),
            _ => bail!("no broadcast in progress to stop"),
        }
    }

    /// Resolves `msg.sender` and `tx.origin` of a call made by `caller` at `depth`.
    ///
    /// A prank sets the sender only at exactly its depth, and the origin at its depth and
    /// deeper. A broadcast sets both, at exactly its depth.
    pub fn resolve_caller(&self, depth: u64, caller: Address, origin: Address) -> ResolvedCaller {
        let mut resolved = ResolvedCaller {
            sender: caller,
            origin,
            delegate_allowed: false,
            prank: None,
            broadcast: false,
        };
        match self.frame(depth) {
            Some(Frame::Prank(prank)) if caller == prank.prank_caller => {
                let mut applied = false;
                if depth == prank.depth {
                    resolved.sender = prank.new_caller;
                    resolved.delegate_allowed = prank.delegate_call;
                    applied = true;
                }
                if let Some(new_origin) = prank.new_origin {
                    resolved.origin = new_origin;
                    applied = true;
                }
                if applied {
                    resolved.prank = Some(prank.depth);
                }
            }
            Some(Frame::Broadcast(broadcast))
                if depth == broadcast.depth && caller == broadcast.original_caller =>
            {
                resolved.sender = broadcast.new_origin;
                resolved.origin = broadcast.new_origin;
                resolved.broadcast = true;
            }
            _ => {}
        }
        resolved
    }

    /// Marks the prank armed at `depth` as used.
    pub fn mark_used(&mut self, depth: u64) {
        if let Some(Frame::Prank(prank)) = self.frames.get_mut(&depth)
            && let Some(applied) = prank.first_time_applied()
        {
            *prank = applied;
        }
    }

    /// Unwinds the frame armed at `depth` once a call made from it returns.
    ///
    /// Returns the origin to restore. Single-use frames are removed, together with single-use
    /// frames armed deeper by callees that returned without using them.
    pub fn call_end(&mut self, depth: u64) -> Option<Address> {
        let deeper = self.frames.split_off(&depth.saturating_add(1));
        for (armed, frame) in deeper {
            if frame.is_single_call() {
                trace!(target: "cheatcodes", depth = armed, "dropped unused single-use frame");
            } else {
                self.frames.insert(armed, frame);
            }
        }

        let (origin, single_call) = match self.frames.get(&depth)? {
            Frame::Prank(prank) => (prank.prank_origin, prank.single_call),
            Frame::Broadcast(broadcast) => (broadcast.original_origin, broadcast.single_call),
        };
        if single_call {
            trace!(target: "cheatcodes", depth, "single-use frame consumed");
            self.frames.remove(&depth);
        }
        Some(origin)
    }
}

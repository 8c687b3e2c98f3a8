use crate::{CheatsCtxt, Error, Result};
use alloy_primitives::Address;

impl CheatsCtxt<'_> {
    /// Makes the next call from the invoking frame run with `msg.sender` set to `new_caller`,
    /// and `tx.origin` set to `new_origin` if given.
    ///
    /// With `delegate_call`, a delegate call also runs in the context of `new_caller`, which
    /// must then be a contract.
    pub fn prank(
        &mut self,
        new_caller: Address,
        new_origin: Option<Address>,
        delegate_call: bool,
    ) -> Result {
        self.check_delegate(new_caller, delegate_call)?;
        let site = self.site();
        self.state.context.arm_single(site, new_caller, new_origin, delegate_call)
    }

    /// Like [`prank`](Self::prank), for every call made from the invoking frame until
    /// [`stop_prank`](Self::stop_prank).
    pub fn start_prank(
        &mut self,
        new_caller: Address,
        new_origin: Option<Address>,
        delegate_call: bool,
    ) -> Result {
        self.check_delegate(new_caller, delegate_call)?;
        let site = self.site();
        self.state.context.arm_persistent(site, new_caller, new_origin, delegate_call)
    }

    /// Removes the prank armed by the invoking frame, if any.
    pub fn stop_prank(&mut self) {
        if let Some(prank) = self.state.context.disarm(self.depth) {
            trace!(target: "cheatcodes", depth = prank.depth, new_caller = %prank.new_caller, "stopped prank");
        }
    }

    fn check_delegate(&self, new_caller: Address, delegate_call: bool) -> Result {
        if delegate_call && self.backend.code(new_caller)?.is_empty() {
            return Err(Error::CannotDelegateFromExternalActor(new_caller));
        }
        Ok(())
    }
}

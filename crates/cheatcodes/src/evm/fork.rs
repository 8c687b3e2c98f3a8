use crate::{Cheatcodes, CheatsCtxt, Result};
use alloy_primitives::{Address, B256, U256};
use sandbox_evm_core::fork::CreateFork;

impl CheatsCtxt<'_> {
    /// Returns the id of the active fork.
    pub fn active_fork(&self) -> Result<U256> {
        self.backend.active_fork_id().ok_or_else(|| fmt_err!("no active fork"))
    }

    /// Creates a fork of `url_or_alias` at `block`, or at the latest block.
    pub fn create_fork(&mut self, url_or_alias: &str, block: Option<u64>) -> Result<U256> {
        self.persist_caller()?;
        Ok(self.backend.create_fork(CreateFork::new(url_or_alias, block))?)
    }

    /// Creates a fork and selects it.
    pub fn create_select_fork(&mut self, url_or_alias: &str, block: Option<u64>) -> Result<U256> {
        check_broadcast(self.state)?;
        self.persist_caller()?;
        Ok(self.backend.create_select_fork(CreateFork::new(url_or_alias, block))?)
    }

    pub fn select_fork(&mut self, fork_id: U256) -> Result {
        self.persist_caller()?;
        check_broadcast(self.state)?;
        Ok(self.backend.select_fork(fork_id)?)
    }

    /// Rolls `fork_id`, or the active fork, to `block`.
    pub fn roll_fork(&mut self, fork_id: Option<U256>, block: u64) -> Result {
        self.persist_caller()?;
        Ok(self.backend.roll_fork(fork_id, block)?)
    }

    /// Rolls `fork_id`, or the active fork, to the state right before `tx`.
    pub fn roll_fork_to_transaction(&mut self, fork_id: Option<U256>, tx: B256) -> Result {
        self.persist_caller()?;
        Ok(self.backend.roll_fork_to_transaction(fork_id, tx)?)
    }

    /// Shares `accounts` across every fork.
    pub fn make_persistent(&mut self, accounts: &[Address]) -> Result {
        for account in accounts {
            self.backend.add_persistent_account(*account)?;
        }
        Ok(())
    }

    pub fn revoke_persistent(&mut self, accounts: &[Address]) {
        for account in accounts {
            self.backend.remove_persistent_account(account);
        }
    }

    pub fn is_persistent(&self, account: Address) -> bool {
        self.backend.is_persistent(&account)
    }

    // Keeps the state of the calling contract when the active fork changes.
    fn persist_caller(&mut self) -> Result {
        self.backend.add_persistent_account(self.caller)?;
        Ok(())
    }
}

fn check_broadcast(state: &Cheatcodes) -> Result {
    if state.context.broadcast().is_none() {
        Ok(())
    } else {
        Err(fmt_err!("cannot select forks during a broadcast"))
    }
}

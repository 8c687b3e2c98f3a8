//! Shared setup: a backend plus cheatcode state, driven the way the interpreter drives it.

use alloy_primitives::{Address, address};
use sandbox_cheatcodes::{
    CallInputs, CallOutcome, CallStatus, Cheatcodes, CheatsConfig, CheatsCtxt,
};
use sandbox_evm_core::{backend::Backend, constants::TEST_CONTRACT_ADDRESS, fork::ForkSources};
use std::sync::Arc;

/// The contract under test.
pub const TEST: Address = TEST_CONTRACT_ADDRESS;
pub const TARGET: Address = address!("00000000000000000000000000000000000000a1");
pub const OTHER: Address = address!("00000000000000000000000000000000000000a2");
pub const ALICE: Address = address!("000000000000000000000000000000000000a11c");
pub const BOB: Address = address!("0000000000000000000000000000000000000b0b");

/// Depth the test contract executes at.
pub const TEST_DEPTH: u64 = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub struct Sandbox {
    pub cheats: Cheatcodes,
    pub backend: Backend,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_sources(ForkSources::default())
    }

    pub fn with_sources(sources: ForkSources) -> Self {
        init_tracing();
        let config = CheatsConfig::default();
        let backend = config.backend(sources);
        Self { cheats: Cheatcodes::new(Arc::new(config)), backend }
    }

    /// Cheatcodes invoked by the test contract.
    pub fn ctx(&mut self) -> CheatsCtxt<'_> {
        self.cheats.ctx(&mut self.backend, TEST, TEST_DEPTH)
    }

    /// Enters `call`.
    pub fn enter(&mut self, call: &CallInputs) -> CallOutcome {
        self.cheats.call(&mut self.backend, call).unwrap()
    }

    /// Leaves `call`.
    pub fn exit(&mut self, call: &CallInputs, status: CallStatus) {
        self.cheats.call_end(&mut self.backend, call, status).unwrap();
    }

    /// Runs a call that does nothing inside the callee.
    pub fn call(&mut self, call: &CallInputs) -> CallOutcome {
        let outcome = self.enter(call);
        self.exit(call, CallStatus::Return);
        outcome
    }
}

/// A call made by the test contract.
pub fn test_call(target: Address) -> CallInputs {
    CallInputs::call(TEST, target, TEST_DEPTH)
}

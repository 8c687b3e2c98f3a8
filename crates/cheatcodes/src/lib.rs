//! # sandbox-cheatcodes
//!
//! Cheatcode implementations: call-context overrides, access recording, state diffs and
//! assertions, on top of the [`Backend`](sandbox_evm_core::backend::Backend).

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub use config::CheatsConfig;
pub use error::{Error, Result};
pub use evm::{
    DealRecord,
    mock::{MockCallDataContext, MockCallReturnData},
};
pub use inspector::{
    CallInputs, CallKind, CallOutcome, CallStatus, Cheatcodes, CheatsCtxt, CreateInputs,
    CreateOutcome, CreateScheme,
};
pub use script::{Authorization, BroadcastableTransaction, BroadcastableTransactions};

#[macro_use]
mod error;

pub mod assert;

mod config;

pub mod context;

mod evm;

mod inspector;

pub mod record;

mod script;

pub mod state_diff;

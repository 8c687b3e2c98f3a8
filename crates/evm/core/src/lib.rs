//! # sandbox-evm-core
//!
//! Account storage, forked environments and state snapshots.

#![warn(unused_crate_dependencies)]

#[macro_use]
extern crate tracing;

pub mod backend;
pub mod constants;
pub mod env;
pub mod fork;
pub mod snapshot;

use crate::test_helpers::*;
use alloy_primitives::{Bytes, U256};
use sandbox_cheatcodes::{CallInputs, CallStatus};
use sandbox_evm_core::{
    backend::AccountInfo,
    constants::CALLER,
    fork::{ForkSources, MemoryProvider},
};

const URL: &str = "http://mainnet";

fn sandbox() -> Sandbox {
    let provider = MemoryProvider::new()
        .with_storage(5, TARGET, U256::ZERO, U256::from(1))
        .with_account(10, OTHER, AccountInfo::new(U256::ZERO, 1).with_code(Bytes::from_static(&[0x60, 0x00])))
        .with_storage(10, TARGET, U256::ZERO, U256::from(2));
    let mut sources = ForkSources::default();
    sources.register(URL, provider).alias("mainnet", URL);
    Sandbox::with_sources(sources)
}

#[test]
fn forks_do_not_share_state() {
    let mut sandbox = sandbox();
    let latest = sandbox.ctx().create_select_fork("mainnet", None).unwrap();
    let previous = sandbox.ctx().create_fork(URL, Some(5)).unwrap();
    assert_eq!(sandbox.ctx().active_fork().unwrap(), latest);
    assert!(sandbox.ctx().is_persistent(TEST));

    let Sandbox { cheats, backend } = &mut sandbox;
    assert_eq!(cheats.sload(backend, TARGET, U256::ZERO, 2).unwrap(), U256::from(2));
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(3), 2).unwrap();

    sandbox.ctx().select_fork(previous).unwrap();
    let Sandbox { cheats, backend } = &mut sandbox;
    assert_eq!(cheats.sload(backend, TARGET, U256::ZERO, 2).unwrap(), U256::from(1));

    sandbox.ctx().select_fork(latest).unwrap();
    let Sandbox { cheats, backend } = &mut sandbox;
    assert_eq!(cheats.sload(backend, TARGET, U256::ZERO, 2).unwrap(), U256::from(3));

    // rolling discards local writes
    sandbox.ctx().roll_fork(None, 10).unwrap();
    let Sandbox { cheats, backend } = &mut sandbox;
    assert_eq!(cheats.sload(backend, TARGET, U256::ZERO, 2).unwrap(), U256::from(2));
}

#[test]
fn forks_cannot_be_selected_while_broadcasting() {
    let mut sandbox = sandbox();
    let id = sandbox.ctx().create_fork("mainnet", None).unwrap();
    sandbox.ctx().start_broadcast(None).unwrap();
    assert_eq!(
        sandbox.ctx().select_fork(id).unwrap_err().to_string(),
        "cannot select forks during a broadcast"
    );
}

#[test]
fn persistent_accounts_cross_forks() {
    let mut sandbox = sandbox();
    let first = sandbox.ctx().create_select_fork("mainnet", Some(10)).unwrap();
    let second = sandbox.ctx().create_fork("mainnet", Some(5)).unwrap();

    sandbox.ctx().make_persistent(&[ALICE]).unwrap();
    sandbox.backend.set_balance(ALICE, U256::from(7)).unwrap();
    sandbox.ctx().select_fork(second).unwrap();
    assert_eq!(sandbox.backend.basic(ALICE).unwrap().balance, U256::from(7));

    sandbox.ctx().revoke_persistent(&[ALICE]);
    sandbox.ctx().select_fork(first).unwrap();
    assert_eq!(sandbox.backend.basic(ALICE).unwrap().balance, U256::ZERO);
}

#[test]
fn reverts_on_missing_contracts_are_diagnosed() {
    let mut sandbox = sandbox();
    sandbox.ctx().create_fork("mainnet", Some(10)).unwrap();
    sandbox.ctx().create_select_fork("mainnet", Some(5)).unwrap();

    let root = CallInputs::call(CALLER, TEST, 0);
    sandbox.enter(&root);
    // the contract only exists from block 10 on, so the call stops immediately
    let call = test_call(OTHER);
    sandbox.enter(&call);
    sandbox.exit(&call, CallStatus::Stop);

    let err = sandbox.cheats.call_end(&mut sandbox.backend, &root, CallStatus::Revert).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Contract {OTHER} does not exist on active fork with id `1`\n        But exists on non active forks: `[0]`"
        )
    );
}

#[test]
fn snapshots_restore_state() {
    let mut sandbox = Sandbox::new();
    sandbox.backend.write_storage(TARGET, U256::ZERO, U256::from(1)).unwrap();

    let id = sandbox.ctx().snapshot_state();
    sandbox.backend.write_storage(TARGET, U256::ZERO, U256::from(2)).unwrap();
    assert!(sandbox.ctx().revert_to_state(id));
    assert_eq!(sandbox.backend.read_storage(TARGET, U256::ZERO).unwrap(), U256::from(1));

    sandbox.backend.write_storage(TARGET, U256::ZERO, U256::from(3)).unwrap();
    assert!(sandbox.ctx().revert_to_state_and_delete(id));
    assert_eq!(sandbox.backend.read_storage(TARGET, U256::ZERO).unwrap(), U256::from(1));
    assert!(!sandbox.ctx().revert_to_state(id));

    for _ in 0..300 {
        let id = sandbox.ctx().snapshot_state();
        assert!(sandbox.ctx().delete_state_snapshot(id));
    }
    let id = sandbox.ctx().snapshot_state();
    sandbox.ctx().delete_state_snapshots();
    assert!(!sandbox.ctx().revert_to_state(id));
}

use crate::test_helpers::*;
use alloy_primitives::{B256, Bytes, U256};
use sandbox_cheatcodes::{DealRecord, Error};
use sandbox_evm_core::backend::BackendError;

#[test]
fn block_values_follow_snapshots() {
    let mut sandbox = Sandbox::new();
    let mut ctx = sandbox.ctx();
    let id = ctx.snapshot_state();
    ctx.warp(1_700_000_000);
    ctx.roll(42);
    ctx.prevrandao(B256::repeat_byte(7));

    let clock = *sandbox.backend.clock();
    assert_eq!((clock.timestamp, clock.number), (1_700_000_000, 42));
    assert_eq!(clock.prevrandao, B256::repeat_byte(7));

    assert!(sandbox.ctx().revert_to_state(id));
    assert_eq!(sandbox.backend.clock().number, 1);
}

#[test]
fn deal_etch_store_and_load() {
    let mut sandbox = Sandbox::new();
    let mut ctx = sandbox.ctx();
    ctx.deal(ALICE, U256::from(5)).unwrap();
    ctx.deal(ALICE, U256::from(8)).unwrap();
    ctx.etch(TARGET, vec![0x60u8, 0x00]).unwrap();
    ctx.store(TARGET, U256::from(3), U256::from(9)).unwrap();
    assert_eq!(ctx.load(TARGET, U256::from(3)).unwrap(), U256::from(9));

    assert_eq!(sandbox.backend.basic(ALICE).unwrap().balance, U256::from(8));
    assert_eq!(sandbox.backend.code(TARGET).unwrap(), Bytes::from_static(&[0x60, 0x00]));
    assert_eq!(
        sandbox.cheats.eth_deals,
        vec![
            DealRecord { address: ALICE, old_balance: U256::ZERO, new_balance: U256::from(5) },
            DealRecord { address: ALICE, old_balance: U256::from(5), new_balance: U256::from(8) },
        ]
    );
}

#[test]
fn nonces_only_move_down_unsafely() {
    let mut sandbox = Sandbox::new();
    let mut ctx = sandbox.ctx();
    ctx.set_nonce(ALICE, 10).unwrap();
    let err = ctx.set_nonce(ALICE, 5).unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::InvalidNonce { .. })), "{err}");

    ctx.set_nonce_unsafe(ALICE, 5).unwrap();
    assert_eq!(ctx.get_nonce(ALICE).unwrap(), 5);
}

#[test]
fn copies_of_arbitrary_storage_agree() {
    let mut sandbox = Sandbox::new();
    let mut ctx = sandbox.ctx();
    ctx.set_arbitrary_storage(TARGET, false);
    ctx.copy_storage(TARGET, OTHER).unwrap();
    ctx.copy_storage(TARGET, BOB).unwrap();

    let slot = U256::from(77);
    let value = ctx.load(OTHER, slot).unwrap();
    assert_eq!(ctx.load(BOB, slot).unwrap(), value);
    assert_eq!(ctx.load(TARGET, slot).unwrap(), value);
    assert_eq!(ctx.load(TARGET, slot).unwrap(), value);
}

use crate::test_helpers::*;
use alloy_primitives::Bytes;
use sandbox_cheatcodes::{CallInputs, CallKind, CallStatus, Error};
use sandbox_evm_core::constants::CALLER;

#[test]
fn single_prank_applies_to_one_call() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().prank(ALICE, Some(BOB), false).unwrap();

    let call = test_call(TARGET);
    let first = sandbox.call(&call);
    assert_eq!((first.caller, first.origin), (ALICE, BOB));
    assert_eq!(sandbox.cheats.tx_origin, CALLER);

    let second = sandbox.call(&call);
    assert_eq!((second.caller, second.origin), (TEST, CALLER));
    assert!(sandbox.cheats.context.is_empty());
}

#[test]
fn origin_reaches_nested_calls_but_sender_does_not() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_prank(ALICE, Some(BOB), false).unwrap();

    let outer = test_call(TARGET);
    let outcome = sandbox.enter(&outer);
    assert_eq!(outcome.caller, ALICE);

    let inner = CallInputs::call(TARGET, OTHER, TEST_DEPTH + 1);
    let nested = sandbox.call(&inner);
    assert_eq!((nested.caller, nested.origin), (TARGET, BOB));

    sandbox.exit(&outer, CallStatus::Return);
    assert_eq!(sandbox.cheats.tx_origin, CALLER);
}

#[test]
fn persistent_prank_overwrite_needs_a_use() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_prank(ALICE, None, false).unwrap();
    assert!(matches!(sandbox.ctx().start_prank(BOB, None, false), Err(Error::FrameInUse)));

    let call = test_call(TARGET);
    assert_eq!(sandbox.call(&call).caller, ALICE);

    sandbox.ctx().start_prank(BOB, None, false).unwrap();
    assert_eq!(sandbox.call(&call).caller, BOB);
    assert_eq!(sandbox.call(&call).caller, BOB);

    assert!(matches!(sandbox.ctx().prank(ALICE, None, false), Err(Error::ConflictingFrame)));

    sandbox.ctx().stop_prank();
    assert_eq!(sandbox.call(&call).caller, TEST);
}

#[test]
fn delegated_prank_runs_in_the_impersonated_context() {
    let mut sandbox = Sandbox::new();
    let err = sandbox.ctx().prank(ALICE, None, true).unwrap_err();
    assert!(matches!(err, Error::CannotDelegateFromExternalActor(address) if address == ALICE));

    sandbox.backend.set_code(OTHER, Bytes::from_static(&[0x60, 0x00])).unwrap();
    sandbox.ctx().prank(OTHER, None, true).unwrap();

    let mut call = test_call(TARGET).with_kind(CallKind::DelegateCall);
    call.target_address = TEST;
    let outcome = sandbox.call(&call);
    assert_eq!(outcome.caller, OTHER);
    assert_eq!(outcome.target_address, OTHER);
}

#[test]
fn single_prank_does_not_outlive_the_callee_that_armed_it() {
    let mut sandbox = Sandbox::new();
    let outer = test_call(TARGET);
    sandbox.enter(&outer);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.ctx(backend, TARGET, TEST_DEPTH + 1).prank(ALICE, None, false).unwrap();
    sandbox.exit(&outer, CallStatus::Return);
    assert!(sandbox.cheats.context.is_empty());

    sandbox.enter(&outer);
    let inner = CallInputs::call(TARGET, OTHER, TEST_DEPTH + 1);
    assert_eq!(sandbox.call(&inner).caller, TARGET);
    sandbox.exit(&outer, CallStatus::Return);
}

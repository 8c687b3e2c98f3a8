use crate::test_helpers::*;
use alloy_primitives::{Bytes, U256};
use sandbox_cheatcodes::{CallKind, CallStatus, CreateInputs, CreateScheme, Error};
use sandbox_evm_core::constants::{CALLER, DEFAULT_CREATE2_DEPLOYER};

fn create(scheme: CreateScheme, depth: u64) -> CreateInputs {
    CreateInputs {
        caller: TEST,
        value: U256::ZERO,
        init_code: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
        scheme,
        depth,
    }
}

#[test]
fn broadcast_records_one_call() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().broadcast(Some(ALICE)).unwrap();

    let call = test_call(TARGET).with_value(U256::from(5)).with_input(vec![1u8, 2, 3]);
    let outcome = sandbox.call(&call);
    assert_eq!((outcome.caller, outcome.origin), (ALICE, ALICE));
    assert_eq!(sandbox.cheats.tx_origin, CALLER);

    let txs = sandbox.cheats.take_broadcastable_transactions();
    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    assert_eq!(tx.from, ALICE);
    assert_eq!(tx.to, Some(TARGET));
    assert_eq!(tx.value, U256::from(5));
    assert_eq!(tx.input, Bytes::from(vec![1u8, 2, 3]));
    assert_eq!(tx.nonce, 0);
    assert_eq!(tx.rpc, None);
    assert_eq!(sandbox.backend.read_nonce(ALICE).unwrap(), 1);

    // single use
    assert_eq!(sandbox.call(&call).caller, TEST);
    assert!(sandbox.cheats.broadcastable_transactions.is_empty());
}

#[test]
fn start_broadcast_records_until_stopped() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(None).unwrap();

    sandbox.call(&test_call(TARGET));
    sandbox.call(&test_call(OTHER));
    // static calls are not transactions
    sandbox.call(&test_call(OTHER).with_kind(CallKind::StaticCall));
    sandbox.ctx().stop_broadcast().unwrap();
    sandbox.call(&test_call(TARGET));

    let txs = sandbox.cheats.take_broadcastable_transactions();
    let sent = txs.iter().map(|tx| (tx.from, tx.to, tx.nonce)).collect::<Vec<_>>();
    assert_eq!(sent, vec![(CALLER, Some(TARGET), 0), (CALLER, Some(OTHER), 1)]);
    assert_eq!(sandbox.backend.read_nonce(CALLER).unwrap(), 2);

    assert_eq!(
        sandbox.ctx().stop_broadcast().unwrap_err().to_string(),
        "no broadcast in progress to stop"
    );
}

#[test]
fn static_call_after_single_broadcast_fails() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().broadcast(Some(ALICE)).unwrap();

    let call = test_call(TARGET).with_kind(CallKind::StaticCall);
    let err = sandbox.cheats.call(&mut sandbox.backend, &call).unwrap_err();
    assert_eq!(
        err.to_string(),
        "`staticcall`s are not allowed after `broadcast`; use `startBroadcast` instead"
    );
}

#[test]
fn pranks_and_broadcasts_exclude_each_other() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_prank(BOB, None, false).unwrap();
    assert_eq!(
        sandbox.ctx().broadcast(Some(ALICE)).unwrap_err().to_string(),
        "You have an active prank. Broadcasting and pranks are not compatible. Disable one or the other"
    );
    sandbox.ctx().stop_prank();

    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();
    assert!(sandbox.ctx().prank(BOB, None, false).is_err());
    assert_eq!(
        sandbox.ctx().broadcast(Some(BOB)).unwrap_err().to_string(),
        "You have an active broadcast already."
    );
}

#[test]
fn creations_are_recorded_without_recipient() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();

    let inputs = create(CreateScheme::Create, TEST_DEPTH);
    let outcome = sandbox.cheats.create(&mut sandbox.backend, &inputs).unwrap();
    assert_eq!(outcome.caller, ALICE);
    assert_eq!(outcome.address, ALICE.create(0));
    sandbox
        .cheats
        .create_end(&mut sandbox.backend, &inputs, CallStatus::Return, Some(outcome.address))
        .unwrap();

    let tx = sandbox.cheats.broadcastable_transactions.pop_front().unwrap();
    assert_eq!(tx.to, None);
    assert_eq!(tx.input, inputs.init_code);
    assert_eq!(tx.nonce, 0);
    assert_eq!(sandbox.backend.read_nonce(ALICE).unwrap(), 1);
}

#[test]
fn create2_goes_through_the_deployer() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();

    let salt = U256::from(7);
    let inputs = create(CreateScheme::Create2 { salt }, TEST_DEPTH);
    let err = sandbox.cheats.create(&mut sandbox.backend, &inputs).unwrap_err();
    assert!(err.to_string().starts_with("missing CREATE2 deployer"), "{err}");

    sandbox.backend.set_code(DEFAULT_CREATE2_DEPLOYER, Bytes::from_static(&[0x60, 0x00])).unwrap();
    let outcome = sandbox.cheats.create(&mut sandbox.backend, &inputs).unwrap();
    assert_eq!(outcome.caller, DEFAULT_CREATE2_DEPLOYER);
    assert_eq!(
        outcome.address,
        DEFAULT_CREATE2_DEPLOYER.create2_from_code(salt.to_be_bytes::<32>(), &inputs.init_code)
    );

    let tx = sandbox.cheats.broadcastable_transactions.pop_front().unwrap();
    assert_eq!(tx.to, Some(DEFAULT_CREATE2_DEPLOYER));
    assert_eq!(&tx.input[..32], &salt.to_be_bytes::<32>()[..]);
    assert_eq!(&tx.input[32..], &inputs.init_code[..]);
    assert_eq!(sandbox.backend.read_nonce(ALICE).unwrap(), 1);
}

#[test]
fn code_deployments_one_frame_down() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();

    let nested = create(CreateScheme::Create, TEST_DEPTH + 1);
    let outcome = sandbox.cheats.create(&mut sandbox.backend, &nested).unwrap();
    assert_eq!(outcome.origin, ALICE);
    assert!(sandbox.cheats.broadcastable_transactions.is_empty());
    sandbox.cheats.create_end(&mut sandbox.backend, &nested, CallStatus::Return, None).unwrap();

    sandbox.cheats.set_deploy_from_code(true);
    sandbox.cheats.create(&mut sandbox.backend, &nested).unwrap();
    assert_eq!(sandbox.cheats.broadcastable_transactions.len(), 1);
}

#[test]
fn delegation_is_attached_to_the_next_transaction() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();

    let authorization = sandbox.ctx().attach_delegation(ALICE, OTHER).unwrap();
    assert_eq!(authorization.nonce, 1);
    assert_eq!(authorization.chain_id, 31337);
    assert_eq!(sandbox.backend.basic(ALICE).unwrap().delegation(), Some(OTHER));

    sandbox.call(&test_call(TARGET));
    sandbox.call(&test_call(TARGET));
    let txs = sandbox.cheats.take_broadcastable_transactions();
    assert_eq!(txs[0].authorization, Some(authorization));
    assert_eq!(txs[0].nonce, 0);
    assert_eq!(txs[1].authorization, None);
    assert_eq!(txs[1].nonce, 2);
    assert_eq!(sandbox.backend.read_nonce(ALICE).unwrap(), 3);
}

#[test]
fn delegation_and_blob_conflict() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().start_broadcast(Some(ALICE)).unwrap();

    sandbox.ctx().attach_delegation(BOB, OTHER).unwrap();
    assert!(matches!(sandbox.cheats.attach_blob(vec![1u8]), Err(Error::DelegationBlobConflict)));

    sandbox.call(&test_call(TARGET));
    assert_eq!(sandbox.backend.read_nonce(BOB).unwrap(), 1);

    sandbox.cheats.attach_blob(vec![1u8]).unwrap();
    assert!(matches!(
        sandbox.ctx().attach_delegation(BOB, OTHER),
        Err(Error::DelegationBlobConflict)
    ));
    sandbox.call(&test_call(TARGET));

    let txs = sandbox.cheats.take_broadcastable_transactions();
    assert_eq!(txs[1].blob, Some(Bytes::from(vec![1u8])));
}

#[test]
fn exhausted_signer_nonce_is_an_error() {
    let mut sandbox = Sandbox::new();
    sandbox.backend.set_nonce_unsafe(ALICE, u64::MAX).unwrap();
    sandbox.ctx().broadcast(Some(ALICE)).unwrap();

    let err = sandbox.cheats.call(&mut sandbox.backend, &test_call(TARGET)).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("nonce of {ALICE} cannot be incremented past {}", u64::MAX)
    );
    assert_eq!(sandbox.backend.read_nonce(ALICE).unwrap(), u64::MAX);
}

use crate::test_helpers::*;
use alloy_primitives::{Bytes, U256};
use sandbox_cheatcodes::{CallStatus, MockCallReturnData};

#[test]
fn longest_calldata_prefix_wins() {
    let mut sandbox = Sandbox::new();
    let mut ctx = sandbox.ctx();
    ctx.mock_call(TARGET, vec![0xaau8], None, vec![1u8]).unwrap();
    ctx.mock_call(TARGET, vec![0xaau8, 0xbb], None, vec![2u8]).unwrap();
    ctx.mock_call_revert(TARGET, vec![0xccu8], Some(U256::from(5)), vec![3u8]).unwrap();

    // mocking an account without code etches a placeholder
    assert_eq!(sandbox.backend.code(TARGET).unwrap(), Bytes::from_static(&[0]));

    let mocked = |sandbox: &mut Sandbox, input: Vec<u8>, value: u64| {
        sandbox.call(&test_call(TARGET).with_input(input).with_value(U256::from(value))).mocked
    };
    assert_eq!(
        mocked(&mut sandbox, vec![0xaa, 0xbb, 0x01], 0),
        Some(MockCallReturnData { status: CallStatus::Return, data: Bytes::from(vec![2u8]) })
    );
    assert_eq!(mocked(&mut sandbox, vec![0xaa, 0x01], 0).unwrap().data, Bytes::from(vec![1u8]));
    assert_eq!(mocked(&mut sandbox, vec![0xcc], 5).unwrap().status, CallStatus::Revert);
    assert_eq!(mocked(&mut sandbox, vec![0xcc], 4), None);
    assert_eq!(mocked(&mut sandbox, vec![0xdd], 0), None);

    sandbox.cheats.clear_mocked_calls();
    assert_eq!(mocked(&mut sandbox, vec![0xaa], 0), None);
}

#[test]
fn mocked_calls_are_recorded() {
    let mut sandbox = Sandbox::new();
    sandbox.ctx().mock_call(TARGET, Bytes::new(), None, Bytes::new()).unwrap();
    sandbox.cheats.start_state_diff_recording();

    let outcome = sandbox.call(&test_call(TARGET));
    assert!(outcome.mocked.is_some());
    let accesses = sandbox.cheats.stop_and_return_state_diff().unwrap();
    assert_eq!(accesses.len(), 1);
    assert_eq!(accesses[0].account, TARGET);
}

use crate::test_helpers::*;
use alloy_primitives::U256;
use sandbox_cheatcodes::{CallStatus, Error};

const CALLEE_DEPTH: u64 = TEST_DEPTH + 1;

#[test]
fn records_reads_and_writes_of_callees() {
    let mut sandbox = Sandbox::new();
    sandbox.cheats.record();

    let call = test_call(TARGET);
    sandbox.enter(&call);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::from(1), U256::from(10), CALLEE_DEPTH).unwrap();
    assert_eq!(cheats.sload(backend, TARGET, U256::from(1), CALLEE_DEPTH).unwrap(), U256::from(10));
    assert_eq!(cheats.sload(backend, TARGET, U256::from(2), CALLEE_DEPTH).unwrap(), U256::ZERO);
    sandbox.exit(&call, CallStatus::Return);

    let (reads, writes) = sandbox.cheats.accesses(TARGET);
    assert_eq!(reads, vec![U256::from(1), U256::from(1), U256::from(2)]);
    assert_eq!(writes, vec![U256::from(1)]);
    assert_eq!(sandbox.cheats.accesses(OTHER), (vec![], vec![]));

    let recorded = sandbox.cheats.stop_record().unwrap();
    assert_eq!(recorded.writes[&TARGET], vec![U256::from(1)]);
    assert!(matches!(sandbox.cheats.stop_record(), Err(Error::NoActiveRecordingWindow)));

    // restarting starts from an empty log
    sandbox.cheats.record();
    assert_eq!(sandbox.cheats.accesses(TARGET), (vec![], vec![]));
}

#[test]
fn storage_goes_through_the_backend() {
    let mut sandbox = Sandbox::new();
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::from(3), U256::from(4), CALLEE_DEPTH).unwrap();
    assert_eq!(backend.read_storage(TARGET, U256::from(3)).unwrap(), U256::from(4));
    assert!(cheats.accesses.is_none());
}

use crate::test_helpers::*;
use alloy_primitives::{Address, B256, U256, address};
use sandbox_cheatcodes::{CallInputs, CallStatus, state_diff::AccountAccessKind};
use sandbox_common::StorageLayout;
use std::sync::Arc;

const HOLDER: Address = address!("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

fn layout() -> Arc<StorageLayout> {
    let layout = serde_json::from_str(
        r#"{
        "storage": [
            { "astId": 1, "contract": "Token", "label": "count", "offset": 0, "slot": "0", "type": "t_uint256" },
            { "astId": 2, "contract": "Token", "label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_address,t_uint256)" },
            { "astId": 3, "contract": "Token", "label": "name", "offset": 0, "slot": "2", "type": "t_string_storage" }
        ],
        "types": {
            "t_address": { "encoding": "inplace", "label": "address", "numberOfBytes": "20" },
            "t_uint256": { "encoding": "inplace", "label": "uint256", "numberOfBytes": "32" },
            "t_string_storage": { "encoding": "bytes", "label": "string", "numberOfBytes": "32" },
            "t_mapping(t_address,t_uint256)": {
                "encoding": "mapping",
                "key": "t_address",
                "label": "mapping(address => uint256)",
                "numberOfBytes": "32",
                "value": "t_uint256"
            }
        }
    }"#,
    )
    .unwrap();
    Arc::new(layout)
}

#[test]
fn nested_calls_keep_their_order() {
    let mut sandbox = Sandbox::new();
    sandbox.backend.set_balance(TARGET, U256::from(10)).unwrap();
    sandbox.cheats.start_state_diff_recording();

    let outer = test_call(TARGET);
    sandbox.enter(&outer);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(1), 2).unwrap();

    let inner = CallInputs::call(TARGET, OTHER, 2);
    sandbox.enter(&inner);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, OTHER, U256::ZERO, U256::from(9), 3).unwrap();
    sandbox.exit(&inner, CallStatus::Revert);

    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(2), 2).unwrap();
    backend.set_balance(TARGET, U256::from(15)).unwrap();
    sandbox.exit(&outer, CallStatus::Return);

    let accesses = sandbox.cheats.stop_and_return_state_diff().unwrap();
    let kinds = accesses.iter().map(|access| (access.kind, access.account)).collect::<Vec<_>>();
    similar_asserts::assert_eq!(
        kinds,
        vec![
            (AccountAccessKind::Call, TARGET),
            (AccountAccessKind::Call, OTHER),
            (AccountAccessKind::Resume, TARGET),
        ]
    );

    let (call, nested, resume) = (&accesses[0], &accesses[1], &accesses[2]);
    assert_eq!((call.old_balance, call.new_balance), (U256::from(10), U256::from(15)));
    assert!(call.initialized && !call.reverted);
    assert_eq!(call.storage_accesses.len(), 1);
    assert!(nested.reverted && nested.storage_accesses[0].reverted);
    assert_eq!(resume.storage_accesses[0].previous_value, B256::from(U256::from(1)));
    assert_eq!(resume.storage_accesses[0].new_value, B256::from(U256::from(2)));
}

#[test]
fn rendered_diffs_decode_registered_layouts() {
    let mut sandbox = Sandbox::new();
    sandbox.cheats.register_storage_layout(TARGET, layout());
    sandbox.cheats.label(TARGET, "token").unwrap();
    sandbox.cheats.start_state_diff_recording();

    let call = test_call(TARGET);
    sandbox.enter(&call);
    let Sandbox { cheats, backend } = &mut sandbox;
    let (key, base) = (B256::left_padding_from(HOLDER.as_slice()), B256::from(U256::from(1)));
    let preimage = [key.as_slice(), base.as_slice()].concat();
    let entry = cheats.keccak(TARGET, &preimage);
    cheats.sstore(backend, TARGET, U256::from_be_bytes(entry.0), U256::from(100), 2).unwrap();
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(1), 2).unwrap();
    sandbox.exit(&call, CallStatus::Return);

    let diffs = sandbox.cheats.state_diffs();
    let token = &diffs[&TARGET];
    assert_eq!(token.label.as_deref(), Some("token"));
    let count = token.state_diff[&B256::ZERO].slot_info.as_ref().unwrap();
    assert_eq!(count.label, "count");
    let balance = token.state_diff[&entry].slot_info.as_ref().unwrap();
    assert_eq!(balance.label, format!("balances[{HOLDER}]"));
    assert_eq!(balance.keys, Some(vec![HOLDER.to_string()]));
    assert_eq!(sandbox.cheats.get_mapping_key_and_parent_of(TARGET, entry), Some((key, base)));
    assert_eq!(sandbox.cheats.get_mapping_length(TARGET, base), 1);
    assert_eq!(sandbox.cheats.get_mapping_slot_at(TARGET, base, 0), entry);
    assert_eq!(sandbox.cheats.get_mapping_slot_at(TARGET, base, 1), B256::ZERO);

    let text = sandbox.cheats.get_state_diff();
    assert!(text.starts_with(&format!("{TARGET}\nlabel: token\n- state diff:\n")), "{text}");
    assert!(text.contains(&format!("@ {} (count, uint256): 0 → 1", B256::ZERO)), "{text}");
    assert!(
        text.contains(&format!(
            "@ {entry} (balances[{HOLDER}], mapping(address => uint256)): 0 → 100"
        )),
        "{text}"
    );

    let json: serde_json::Value =
        serde_json::from_str(&sandbox.cheats.get_state_diff_json().unwrap()).unwrap();
    let account = json.as_object().unwrap().values().next().unwrap();
    assert_eq!(account["label"], "token");
    let slot = &account["stateDiff"][B256::ZERO.to_string()];
    assert_eq!(slot["label"], "count");
    assert_eq!(slot["type"], "uint256");
    assert_eq!(slot["newValue"], B256::from(U256::from(1)).to_string());
}

#[test]
fn views_render_the_last_closed_window() {
    let mut sandbox = Sandbox::new();
    sandbox.cheats.label(TARGET, "token").unwrap();
    sandbox.cheats.start_state_diff_recording();

    let call = test_call(TARGET);
    sandbox.enter(&call);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(1), 2).unwrap();
    sandbox.exit(&call, CallStatus::Return);

    let open_text = sandbox.cheats.get_state_diff();
    let open_json = sandbox.cheats.get_state_diff_json().unwrap();
    assert!(open_text.contains("label: token"), "{open_text}");

    assert_eq!(sandbox.cheats.stop_and_return_state_diff().unwrap().len(), 1);
    assert_eq!(sandbox.cheats.get_state_diff(), open_text);
    assert_eq!(sandbox.cheats.get_state_diff_json().unwrap(), open_json);

    // a new window replaces the closed one
    sandbox.cheats.start_state_diff_recording();
    assert_eq!(sandbox.cheats.get_state_diff(), "");
}

#[test]
fn pending_frames_report_no_balance_change() {
    let mut sandbox = Sandbox::new();
    sandbox.backend.set_balance(TARGET, U256::from(10)).unwrap();
    sandbox.cheats.start_state_diff_recording();

    let call = test_call(TARGET);
    sandbox.enter(&call);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::ZERO, U256::from(1), 2).unwrap();

    let diffs = sandbox.cheats.state_diffs();
    assert_eq!(diffs[&TARGET].balance_diff, None);
    assert!(!sandbox.cheats.get_state_diff().contains("balance diff"));

    sandbox.backend.set_balance(TARGET, U256::from(4)).unwrap();
    sandbox.exit(&call, CallStatus::Return);
    let text = sandbox.cheats.get_state_diff();
    assert!(text.contains("- balance diff: 10 → 4"), "{text}");
}

#[test]
fn corrupt_string_headers_render_raw() {
    let mut sandbox = Sandbox::new();
    sandbox.cheats.register_storage_layout(TARGET, layout());
    sandbox.cheats.start_state_diff_recording();

    let call = test_call(TARGET);
    sandbox.enter(&call);
    let Sandbox { cheats, backend } = &mut sandbox;
    cheats.sstore(backend, TARGET, U256::from(2), U256::MAX, 2).unwrap();
    sandbox.exit(&call, CallStatus::Return);

    let diffs = sandbox.cheats.state_diffs();
    let name = diffs[&TARGET].state_diff[&B256::from(U256::from(2))].slot_info.as_ref().unwrap();
    assert_eq!(name.label, "name");
    assert!(name.decoded.is_none());

    let text = sandbox.cheats.get_state_diff();
    assert!(
        text.contains(&format!(
            "@ {} (name, string): {} → {}",
            B256::from(U256::from(2)),
            B256::ZERO,
            B256::from(U256::MAX)
        )),
        "{text}"
    );
    assert!(sandbox.cheats.get_state_diff_json().is_ok());
}

use crate::{CallInputs, CallStatus, Cheatcodes, CheatsCtxt, Result};
use alloy_primitives::{Address, Bytes, U256};
use std::cmp::Ordering;

/// Mocked call data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MockCallDataContext {
    /// The partial calldata to match for mock
    pub calldata: Bytes,
    /// The value to match for mock
    pub value: Option<U256>,
}

/// Mocked return data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockCallReturnData {
    /// How the mocked call ends
    pub status: CallStatus,
    /// Return data or revert data
    pub data: Bytes,
}

impl PartialOrd for MockCallDataContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MockCallDataContext {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that iteration visits longer calldata first: a tighter calldata match
        // wins over a looser one, and over a match on `msg.value` alone.
        self.calldata.cmp(&other.calldata).reverse().then(self.value.cmp(&other.value).reverse())
    }
}

impl CheatsCtxt<'_> {
    /// Makes calls to `callee` whose calldata starts with `data` return `return_data`, if
    /// they also transfer `value` when given.
    pub fn mock_call(
        &mut self,
        callee: Address,
        data: impl Into<Bytes>,
        value: Option<U256>,
        return_data: impl Into<Bytes>,
    ) -> Result {
        self.mock(callee, data.into(), value, CallStatus::Return, return_data.into())
    }

    /// Like [`mock_call`](Self::mock_call), with the matching calls reverting with
    /// `revert_data`.
    pub fn mock_call_revert(
        &mut self,
        callee: Address,
        data: impl Into<Bytes>,
        value: Option<U256>,
        revert_data: impl Into<Bytes>,
    ) -> Result {
        self.mock(callee, data.into(), value, CallStatus::Revert, revert_data.into())
    }

    fn mock(
        &mut self,
        callee: Address,
        calldata: Bytes,
        value: Option<U256>,
        status: CallStatus,
        data: Bytes,
    ) -> Result {
        // Etches a single byte onto the account if it is empty to circumvent the `extcodesize`
        // check Solidity might perform.
        if self.backend.code(callee)?.is_empty() {
            self.backend.set_code(callee, Bytes::from_static(&[0u8]))?;
        }
        trace!(target: "cheatcodes", %callee, %calldata, ?value, %status, "mocked call");
        self.state
            .mocked_calls
            .entry(callee)
            .or_default()
            .insert(MockCallDataContext { calldata, value }, MockCallReturnData { status, data });
        Ok(())
    }
}

impl Cheatcodes {
    /// Removes every mocked call.
    pub fn clear_mocked_calls(&mut self) {
        self.mocked_calls.clear();
    }

    /// Returns the mocked result of `call`, preferring an exact match and then the longest
    /// matching calldata prefix.
    pub(crate) fn mocked_result(&self, call: &CallInputs) -> Option<&MockCallReturnData> {
        let mocks = self.mocked_calls.get(&call.bytecode_address)?;
        let ctx = MockCallDataContext { calldata: call.input.clone(), value: Some(call.value) };
        mocks.get(&ctx).or_else(|| {
            mocks
                .iter()
                .find(|(mock, _)| {
                    call.input.get(..mock.calldata.len()) == Some(&mock.calldata[..])
                        && mock.value.is_none_or(|value| value == call.value)
                })
                .map(|(_, return_data)| return_data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(calldata: &'static [u8], value: Option<u64>) -> MockCallDataContext {
        MockCallDataContext { calldata: Bytes::from_static(calldata), value: value.map(U256::from) }
    }

    #[test]
    fn longer_calldata_orders_first() {
        let mut mocks = vec![ctx(&[1], None), ctx(&[1, 2, 3], None), ctx(&[1, 2], Some(1))];
        mocks.sort();
        assert_eq!(mocks, vec![ctx(&[1, 2, 3], None), ctx(&[1, 2], Some(1)), ctx(&[1], None)]);
    }
}

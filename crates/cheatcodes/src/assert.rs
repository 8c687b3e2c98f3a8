//! Approximate equality assertions.

use crate::{Error, Result};
use alloy_primitives::{I256, U256, utils::format_units};
use std::fmt::{self, Display};

/// Relative deltas are expressed with 18 decimals: `1e18` is 100%.
const EQ_REL_DELTA_RESOLUTION: U256 = U256::from_limbs([18, 0, 0, 0]);

/// Numbers that can be compared approximately.
pub trait ApproxEq: Copy + Display {
    /// Returns `|self - other|`.
    fn delta(self, other: Self) -> U256;

    /// Returns `|self|`.
    fn magnitude(self) -> U256;
}

impl ApproxEq for U256 {
    fn delta(self, other: Self) -> U256 {
        if self > other { self - other } else { other - self }
    }

    fn magnitude(self) -> U256 {
        self
    }
}

impl ApproxEq for I256 {
    fn delta(self, other: Self) -> U256 {
        let (left_sign, left_abs) = self.into_sign_and_abs();
        let (right_sign, right_abs) = other.into_sign_and_abs();

        if left_sign == right_sign {
            if left_abs > right_abs { left_abs - right_abs } else { right_abs - left_abs }
        } else {
            left_abs + right_abs
        }
    }

    fn magnitude(self) -> U256 {
        self.into_sign_and_abs().1
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{left} !~= {right} (max delta: {max_delta}, real delta: {real_delta})")]
struct EqAbsAssertionError<T> {
    left: T,
    right: T,
    max_delta: U256,
    real_delta: U256,
}

fn format_delta_percent(delta: &U256) -> String {
    let decimals = (EQ_REL_DELTA_RESOLUTION - U256::from(2)).to::<u8>();
    let formatted = format_units(*delta, decimals).unwrap_or_else(|_| delta.to_string());
    let formatted = match formatted.split_once('.') {
        Some((int, fraction)) => match fraction.trim_end_matches('0') {
            "" => int.to_string(),
            fraction => format!("{int}.{fraction}"),
        },
        None => formatted,
    };
    format!("{formatted}%")
}

#[derive(Debug)]
enum EqRelDelta {
    Defined(U256),
    Undefined,
}

impl Display for EqRelDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(delta) => f.write_str(&format_delta_percent(delta)),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "{left} !~= {right} (max delta: {}, real delta: {real_delta})",
    format_delta_percent(max_delta)
)]
struct EqRelAssertionFailure<T> {
    left: T,
    right: T,
    max_delta: U256,
    real_delta: EqRelDelta,
}

fn assertion_failed(err: impl Display, error_msg: Option<&str>) -> Error {
    let error_msg = error_msg.unwrap_or("assertion failed");
    fmt_err!("{error_msg}: {err}")
}

/// Asserts that `left` and `right` differ by at most `max_delta`.
pub fn assert_approx_eq_abs<T: ApproxEq>(left: T, right: T, max_delta: U256) -> Result {
    assert_approx_eq_abs_with(left, right, max_delta, None)
}

/// Like [`assert_approx_eq_abs`], with a custom message prefix.
pub fn assert_approx_eq_abs_with<T: ApproxEq>(
    left: T,
    right: T,
    max_delta: U256,
    error_msg: Option<&str>,
) -> Result {
    let delta = left.delta(right);
    if delta <= max_delta {
        return Ok(());
    }
    Err(assertion_failed(EqAbsAssertionError { left, right, max_delta, real_delta: delta }, error_msg))
}

/// Asserts that `left` and `right` differ by at most `max_percent_delta` relative to `right`,
/// where `1e18` is 100%.
///
/// Comparing against zero is only defined when both sides are zero.
pub fn assert_approx_eq_rel<T: ApproxEq>(left: T, right: T, max_percent_delta: U256) -> Result {
    assert_approx_eq_rel_with(left, right, max_percent_delta, None)
}

/// Like [`assert_approx_eq_rel`], with a custom message prefix.
pub fn assert_approx_eq_rel_with<T: ApproxEq>(
    left: T,
    right: T,
    max_percent_delta: U256,
    error_msg: Option<&str>,
) -> Result {
    let max_delta = max_percent_delta;
    if right.magnitude().is_zero() {
        if left.magnitude().is_zero() {
            return Ok(());
        }
        let failure =
            EqRelAssertionFailure { left, right, max_delta, real_delta: EqRelDelta::Undefined };
        return Err(assertion_failed(failure, error_msg));
    }

    let delta = left
        .delta(right)
        .checked_mul(U256::from(10).pow(EQ_REL_DELTA_RESOLUTION))
        .ok_or(Error::OverflowInDeltaCalculation)?
        / right.magnitude();

    if delta <= max_delta {
        return Ok(());
    }
    let failure =
        EqRelAssertionFailure { left, right, max_delta, real_delta: EqRelDelta::Defined(delta) };
    Err(assertion_failed(failure, error_msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn percent(value: u64) -> U256 {
        U256::from(value) * U256::from(10).pow(U256::from(16))
    }

    #[test]
    fn abs_within_delta() {
        assert_approx_eq_abs(U256::from(100), U256::from(103), U256::from(3)).unwrap();
        let err = assert_approx_eq_abs(U256::from(100), U256::from(104), U256::from(3)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "assertion failed: 100 !~= 104 (max delta: 3, real delta: 4)"
        );

        let err = assert_approx_eq_abs_with(I256::MINUS_ONE, I256::ONE, U256::from(1), Some("custom"))
            .unwrap_err();
        assert_eq!(err.to_string(), "custom: -1 !~= 1 (max delta: 1, real delta: 2)");
    }

    #[test]
    fn rel_within_percent() {
        assert_approx_eq_rel(U256::from(105), U256::from(100), percent(5)).unwrap();
        let err = assert_approx_eq_rel(U256::from(106), U256::from(100), percent(5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "assertion failed: 106 !~= 100 (max delta: 5%, real delta: 6%)"
        );

        let err = assert_approx_eq_rel(U256::from(1015), U256::from(1000), percent(1)).unwrap_err();
        assert!(err.to_string().ends_with("(max delta: 1%, real delta: 1.5%)"), "{err}");

        assert_approx_eq_rel(I256::try_from(-95).unwrap(), I256::try_from(-100).unwrap(), percent(5))
            .unwrap();
    }

    #[test]
    fn rel_against_zero() {
        assert_approx_eq_rel(U256::ZERO, U256::ZERO, U256::ZERO).unwrap();
        let err = assert_approx_eq_rel(U256::from(1), U256::ZERO, percent(100)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "assertion failed: 1 !~= 0 (max delta: 100%, real delta: undefined)"
        );
    }

    #[test]
    fn rel_overflow() {
        let err = assert_approx_eq_rel(U256::MAX, U256::from(1), U256::MAX).unwrap_err();
        assert!(matches!(err, Error::OverflowInDeltaCalculation));
    }

    proptest! {
        #[test]
        fn delta_is_symmetric(left in any::<i128>(), right in any::<i128>()) {
            let (left, right) = (I256::try_from(left).unwrap(), I256::try_from(right).unwrap());
            prop_assert_eq!(left.delta(right), right.delta(left));
            prop_assert!(assert_approx_eq_abs(left, right, left.delta(right)).is_ok());
        }
    }
}

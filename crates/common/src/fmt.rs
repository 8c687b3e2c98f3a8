//! Helpers for formatting decoded storage values.

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::hex;
use std::fmt;

/// [`DynSolValue`] formatter.
struct DynValueFormatter {
    raw: bool,
}

impl DynValueFormatter {
    /// Recursively formats a [`DynSolValue`].
    fn value(&self, value: &DynSolValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match value {
            DynSolValue::Address(inner) => write!(f, "{inner}"),
            DynSolValue::Function(inner) => write!(f, "{inner}"),
            DynSolValue::Bytes(inner) => f.write_str(&hex::encode_prefixed(inner)),
            DynSolValue::FixedBytes(word, size) => {
                f.write_str(&hex::encode_prefixed(&word[..*size]))
            }
            DynSolValue::Uint(inner, _) => write!(f, "{inner}"),
            DynSolValue::Int(inner, _) => write!(f, "{inner}"),
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
                f.write_str("[")?;
                self.list(values, f)?;
                f.write_str("]")
            }
            DynSolValue::Tuple(values) => self.tuple(values, f),
            DynSolValue::String(inner) => write!(f, "{inner:?}"),
            DynSolValue::Bool(inner) => write!(f, "{inner}"),
            DynSolValue::CustomStruct { name, prop_names, tuple } => {
                if self.raw || prop_names.len() != tuple.len() {
                    return self.tuple(tuple, f);
                }

                f.write_str(name)?;
                f.write_str("({ ")?;
                for (i, (prop_name, value)) in std::iter::zip(prop_names, tuple).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{prop_name}: ")?;
                    self.value(value, f)?;
                }
                f.write_str(" })")
            }
        }
    }

    fn list(&self, values: &[DynSolValue], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.value(value, f)?;
        }
        Ok(())
    }

    fn tuple(&self, values: &[DynSolValue], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        self.list(values, f)?;
        f.write_str(")")
    }
}

struct DynValueDisplay<'a> {
    value: &'a DynSolValue,
    formatter: DynValueFormatter,
}

impl fmt::Display for DynValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.formatter.value(self.value, f)
    }
}

/// Formats the given value for user output. Structs keep their member names.
pub fn format_token(value: &DynSolValue) -> String {
    DynValueDisplay { value, formatter: DynValueFormatter { raw: false } }.to_string()
}

/// Formats the given value so it can be parsed back later.
///
/// Structs are rendered as plain tuples, losing the struct and member names.
pub fn format_token_raw(value: &DynSolValue) -> String {
    DynValueDisplay { value, formatter: DynValueFormatter { raw: true } }.to_string()
}

use alloy_primitives::Address;
use sandbox_evm_core::backend::BackendError;
use std::{borrow::Cow, fmt};

/// Cheatcode result type.
///
/// Type alias with a default Ok type of `()`, and default Err type of [`Error`].
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

macro_rules! fmt_err {
    ($msg:literal $(,)?) => {
        $crate::Error::fmt(::std::format_args!($msg))
    };
    ($err:expr $(,)?) => {
        <$crate::Error as ::std::convert::From<_>>::from($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::fmt(::std::format_args!($fmt, $($arg)*))
    };
}

macro_rules! bail {
    ($msg:literal $(,)?) => {
        return ::std::result::Result::Err(fmt_err!($msg))
    };
    ($err:expr $(,)?) => {
        return ::std::result::Result::Err(fmt_err!($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::std::result::Result::Err(fmt_err!($fmt, $($arg)*))
    };
}

macro_rules! ensure {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err($crate::Error::custom(
                ::std::concat!("Condition failed: `", ::std::stringify!($cond), "`")
            ));
        }
    };
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err(fmt_err!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err(fmt_err!($err));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::std::result::Result::Err(fmt_err!($fmt, $($arg)*));
        }
    };
}

/// Error thrown by cheatcodes.
///
/// Most failures are plain messages built with `fmt_err!`; the ones callers branch on have their
/// own variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame was armed at a depth whose frame has not been applied yet.
    #[error("cannot overwrite a prank until it is applied at least once")]
    FrameInUse,
    /// A single-use frame was armed over a persistent one at the same depth, or the reverse.
    #[error(
        "cannot override an ongoing prank with a single `prank`; \
         use `startPrank` to override the current prank"
    )]
    ConflictingFrame,
    /// A delegated prank was requested for an account without code.
    #[error("cannot `prank` delegate call from an EOA: {0} has no code")]
    CannotDelegateFromExternalActor(Address),
    /// A recording window was closed without being opened.
    #[error("no recording window is active")]
    NoActiveRecordingWindow,
    /// A delegation and a blob were attached to the same broadcast transaction.
    #[error(
        "both delegation and blob are active; `attachBlob` and `attachDelegation` are not compatible"
    )]
    DelegationBlobConflict,
    /// Scaling a relative delta overflowed.
    #[error("overflow in delta calculation")]
    OverflowInDeltaCalculation,
    /// An error of the underlying state.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Any other failure.
    #[error("{0}")]
    Custom(Cow<'static, str>),
}

impl Error {
    /// Creates a new error from pre-formatted arguments, avoiding an allocation for literals.
    pub fn fmt(args: fmt::Arguments<'_>) -> Self {
        match args.as_str() {
            Some(s) => Self::Custom(Cow::Borrowed(s)),
            None => Self::Custom(Cow::Owned(args.to_string())),
        }
    }

    /// Creates a new error with a custom message.
    pub fn custom(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a new error from anything that can be displayed.
    pub fn display(msg: impl fmt::Display) -> Self {
        Self::Custom(Cow::Owned(msg.to_string()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::custom(value)
    }
}

impl From<&'static str> for Error {
    fn from(value: &'static str) -> Self {
        Self::custom(value)
    }
}

impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        Self::display(format_args!("{err:#}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::display(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails(flag: bool) -> Result<u8> {
        ensure!(flag, "flag was {flag}");
        Ok(1)
    }

    #[test]
    fn macros_build_messages() {
        assert_eq!(fails(true).unwrap(), 1);
        assert_eq!(fails(false).unwrap_err().to_string(), "flag was false");

        let err = fmt_err!("static message");
        assert!(matches!(err, Error::Custom(Cow::Borrowed("static message"))));

        let err: Error = fmt_err!(BackendError::msg("boom"));
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(err.to_string(), "boom");
    }
}

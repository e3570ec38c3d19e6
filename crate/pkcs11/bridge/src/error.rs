use cosmian_pkcs11_sys::CK_ATTRIBUTE_TYPE;
use thiserror::Error;

use crate::error_code::ErrorCode;

pub type P11Result<T> = Result<T, P11Error>;

#[derive(Error, Debug)]
pub enum P11Error {
    #[error("{0}")]
    Default(String),

    /// The native module returned a non-success status
    #[error("PKCS#11 error: {0}")]
    Pkcs11(ErrorCode),

    #[error("attribute 0x{attribute:08X}: expected a {expected} value, found {found}")]
    TypeMismatch {
        attribute: CK_ATTRIBUTE_TYPE,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0} not available on library")]
    FunctionNotAvailable(&'static str),

    #[error("Error loading the library: {0}")]
    LibLoading(#[from] libloading::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl P11Error {
    /// The native status carried by this error, if any
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Pkcs11(code) => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.error_code() == Some(code)
    }
}

impl From<ErrorCode> for P11Error {
    fn from(code: ErrorCode) -> Self {
        Self::Pkcs11(code)
    }
}

/// Return early with an error if a condition is not satisfied.
#[macro_export]
macro_rules! p11_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::P11Error::Default(
                ::core::format_args!($msg).to_string(),
            ));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
}

//! Native status codes returned by a PKCS#11 module.
//!
//! Every `CK_RV` maps to an [`ErrorCode`], known or not. `CKR_OK` is never an
//! error: [`ErrorCode::from_native`] returns `None` for it and callers are
//! expected to check success first (see [`check_rv`]).

use std::fmt::{self, Display, Formatter};

use cosmian_pkcs11_sys::CK_RV;
use strum_macros::{Display as StrumDisplay, EnumIter};

use crate::{P11Error, P11Result};

pub(crate) const CKR_OK_VALUE: CK_RV = 0x0000_0000;

/// Broad family of a native failure, used by callers to decide
/// whether to retry, re-authenticate or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumIter)]
pub enum ErrorCategory {
    /// Bad arguments, stale handles, operation state errors.
    Protocol,
    /// Memory, session count or write protection limits.
    Resource,
    /// PIN and login state.
    Authentication,
    /// Token or device failures.
    Device,
    Other,
}

macro_rules! error_codes {
    ($($variant:ident = $value:literal, $name:literal, $category:ident;)*) => {
        /// A non-success native status.
        ///
        /// Unknown values are kept verbatim in [`ErrorCode::Unknown`] and render as
        /// a hexadecimal literal.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)*
            Unknown(CK_RV),
        }

        impl ErrorCode {
            /// Map a native status to its error code.
            /// Returns `None` for `CKR_OK`; never fails otherwise.
            #[must_use]
            pub const fn from_native(rv: CK_RV) -> Option<Self> {
                match rv {
                    CKR_OK_VALUE => None,
                    $($value => Some(Self::$variant),)*
                    other => Some(Self::Unknown(other)),
                }
            }

            #[must_use]
            pub const fn code(&self) -> CK_RV {
                match self {
                    $(Self::$variant => $value,)*
                    Self::Unknown(rv) => *rv,
                }
            }

            /// The symbolic `CKR_*` name, if the code is a well-known one.
            #[must_use]
            pub const fn name(&self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($name),)*
                    Self::Unknown(_) => None,
                }
            }

            #[must_use]
            pub const fn category(&self) -> ErrorCategory {
                match self {
                    $(Self::$variant => ErrorCategory::$category,)*
                    Self::Unknown(_) => ErrorCategory::Other,
                }
            }
        }
    };
}

error_codes! {
    Cancel = 0x0000_0001, "CKR_CANCEL", Other;
    HostMemory = 0x0000_0002, "CKR_HOST_MEMORY", Resource;
    SlotIdInvalid = 0x0000_0003, "CKR_SLOT_ID_INVALID", Protocol;
    GeneralError = 0x0000_0005, "CKR_GENERAL_ERROR", Other;
    FunctionFailed = 0x0000_0006, "CKR_FUNCTION_FAILED", Other;
    ArgumentsBad = 0x0000_0007, "CKR_ARGUMENTS_BAD", Protocol;
    NoEvent = 0x0000_0008, "CKR_NO_EVENT", Other;
    NeedToCreateThreads = 0x0000_0009, "CKR_NEED_TO_CREATE_THREADS", Other;
    CantLock = 0x0000_000A, "CKR_CANT_LOCK", Other;
    AttributeReadOnly = 0x0000_0010, "CKR_ATTRIBUTE_READ_ONLY", Protocol;
    AttributeSensitive = 0x0000_0011, "CKR_ATTRIBUTE_SENSITIVE", Protocol;
    AttributeTypeInvalid = 0x0000_0012, "CKR_ATTRIBUTE_TYPE_INVALID", Protocol;
    AttributeValueInvalid = 0x0000_0013, "CKR_ATTRIBUTE_VALUE_INVALID", Protocol;
    ActionProhibited = 0x0000_001B, "CKR_ACTION_PROHIBITED", Protocol;
    DataInvalid = 0x0000_0020, "CKR_DATA_INVALID", Protocol;
    DataLenRange = 0x0000_0021, "CKR_DATA_LEN_RANGE", Protocol;
    DeviceError = 0x0000_0030, "CKR_DEVICE_ERROR", Device;
    DeviceMemory = 0x0000_0031, "CKR_DEVICE_MEMORY", Resource;
    DeviceRemoved = 0x0000_0032, "CKR_DEVICE_REMOVED", Device;
    EncryptedDataInvalid = 0x0000_0040, "CKR_ENCRYPTED_DATA_INVALID", Protocol;
    EncryptedDataLenRange = 0x0000_0041, "CKR_ENCRYPTED_DATA_LEN_RANGE", Protocol;
    AeadDecryptFailed = 0x0000_0042, "CKR_AEAD_DECRYPT_FAILED", Protocol;
    FunctionCanceled = 0x0000_0050, "CKR_FUNCTION_CANCELED", Other;
    FunctionNotParallel = 0x0000_0051, "CKR_FUNCTION_NOT_PARALLEL", Protocol;
    FunctionNotSupported = 0x0000_0054, "CKR_FUNCTION_NOT_SUPPORTED", Protocol;
    KeyHandleInvalid = 0x0000_0060, "CKR_KEY_HANDLE_INVALID", Protocol;
    KeySizeRange = 0x0000_0062, "CKR_KEY_SIZE_RANGE", Protocol;
    KeyTypeInconsistent = 0x0000_0063, "CKR_KEY_TYPE_INCONSISTENT", Protocol;
    KeyNotNeeded = 0x0000_0064, "CKR_KEY_NOT_NEEDED", Protocol;
    KeyChanged = 0x0000_0065, "CKR_KEY_CHANGED", Protocol;
    KeyNeeded = 0x0000_0066, "CKR_KEY_NEEDED", Protocol;
    KeyIndigestible = 0x0000_0067, "CKR_KEY_INDIGESTIBLE", Protocol;
    KeyFunctionNotPermitted = 0x0000_0068, "CKR_KEY_FUNCTION_NOT_PERMITTED", Protocol;
    KeyNotWrappable = 0x0000_0069, "CKR_KEY_NOT_WRAPPABLE", Protocol;
    KeyUnextractable = 0x0000_006A, "CKR_KEY_UNEXTRACTABLE", Protocol;
    MechanismInvalid = 0x0000_0070, "CKR_MECHANISM_INVALID", Protocol;
    MechanismParamInvalid = 0x0000_0071, "CKR_MECHANISM_PARAM_INVALID", Protocol;
    ObjectHandleInvalid = 0x0000_0082, "CKR_OBJECT_HANDLE_INVALID", Protocol;
    OperationActive = 0x0000_0090, "CKR_OPERATION_ACTIVE", Protocol;
    OperationNotInitialized = 0x0000_0091, "CKR_OPERATION_NOT_INITIALIZED", Protocol;
    PinIncorrect = 0x0000_00A0, "CKR_PIN_INCORRECT", Authentication;
    PinInvalid = 0x0000_00A1, "CKR_PIN_INVALID", Authentication;
    PinLenRange = 0x0000_00A2, "CKR_PIN_LEN_RANGE", Authentication;
    PinExpired = 0x0000_00A3, "CKR_PIN_EXPIRED", Authentication;
    PinLocked = 0x0000_00A4, "CKR_PIN_LOCKED", Authentication;
    SessionClosed = 0x0000_00B0, "CKR_SESSION_CLOSED", Protocol;
    SessionCount = 0x0000_00B1, "CKR_SESSION_COUNT", Resource;
    SessionHandleInvalid = 0x0000_00B3, "CKR_SESSION_HANDLE_INVALID", Protocol;
    SessionParallelNotSupported = 0x0000_00B4, "CKR_SESSION_PARALLEL_NOT_SUPPORTED", Protocol;
    SessionReadOnly = 0x0000_00B5, "CKR_SESSION_READ_ONLY", Protocol;
    SessionExists = 0x0000_00B6, "CKR_SESSION_EXISTS", Protocol;
    SessionReadOnlyExists = 0x0000_00B7, "CKR_SESSION_READ_ONLY_EXISTS", Protocol;
    SessionReadWriteSoExists = 0x0000_00B8, "CKR_SESSION_READ_WRITE_SO_EXISTS", Protocol;
    SignatureInvalid = 0x0000_00C0, "CKR_SIGNATURE_INVALID", Protocol;
    SignatureLenRange = 0x0000_00C1, "CKR_SIGNATURE_LEN_RANGE", Protocol;
    TemplateIncomplete = 0x0000_00D0, "CKR_TEMPLATE_INCOMPLETE", Protocol;
    TemplateInconsistent = 0x0000_00D1, "CKR_TEMPLATE_INCONSISTENT", Protocol;
    TokenNotPresent = 0x0000_00E0, "CKR_TOKEN_NOT_PRESENT", Device;
    TokenNotRecognized = 0x0000_00E1, "CKR_TOKEN_NOT_RECOGNIZED", Device;
    TokenWriteProtected = 0x0000_00E2, "CKR_TOKEN_WRITE_PROTECTED", Resource;
    UnwrappingKeyHandleInvalid = 0x0000_00F0, "CKR_UNWRAPPING_KEY_HANDLE_INVALID", Protocol;
    UnwrappingKeySizeRange = 0x0000_00F1, "CKR_UNWRAPPING_KEY_SIZE_RANGE", Protocol;
    UnwrappingKeyTypeInconsistent = 0x0000_00F2, "CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT", Protocol;
    UserAlreadyLoggedIn = 0x0000_0100, "CKR_USER_ALREADY_LOGGED_IN", Authentication;
    UserNotLoggedIn = 0x0000_0101, "CKR_USER_NOT_LOGGED_IN", Authentication;
    UserPinNotInitialized = 0x0000_0102, "CKR_USER_PIN_NOT_INITIALIZED", Authentication;
    UserTypeInvalid = 0x0000_0103, "CKR_USER_TYPE_INVALID", Authentication;
    UserAnotherAlreadyLoggedIn = 0x0000_0104, "CKR_USER_ANOTHER_ALREADY_LOGGED_IN", Authentication;
    UserTooManyTypes = 0x0000_0105, "CKR_USER_TOO_MANY_TYPES", Authentication;
    WrappedKeyInvalid = 0x0000_0110, "CKR_WRAPPED_KEY_INVALID", Protocol;
    WrappedKeyLenRange = 0x0000_0112, "CKR_WRAPPED_KEY_LEN_RANGE", Protocol;
    WrappingKeyHandleInvalid = 0x0000_0113, "CKR_WRAPPING_KEY_HANDLE_INVALID", Protocol;
    WrappingKeySizeRange = 0x0000_0114, "CKR_WRAPPING_KEY_SIZE_RANGE", Protocol;
    WrappingKeyTypeInconsistent = 0x0000_0115, "CKR_WRAPPING_KEY_TYPE_INCONSISTENT", Protocol;
    RandomSeedNotSupported = 0x0000_0120, "CKR_RANDOM_SEED_NOT_SUPPORTED", Protocol;
    RandomNoRng = 0x0000_0121, "CKR_RANDOM_NO_RNG", Device;
    DomainParamsInvalid = 0x0000_0130, "CKR_DOMAIN_PARAMS_INVALID", Protocol;
    CurveNotSupported = 0x0000_0140, "CKR_CURVE_NOT_SUPPORTED", Protocol;
    BufferTooSmall = 0x0000_0150, "CKR_BUFFER_TOO_SMALL", Protocol;
    SavedStateInvalid = 0x0000_0160, "CKR_SAVED_STATE_INVALID", Protocol;
    InformationSensitive = 0x0000_0170, "CKR_INFORMATION_SENSITIVE", Protocol;
    StateUnsaveable = 0x0000_0180, "CKR_STATE_UNSAVEABLE", Protocol;
    CryptokiNotInitialized = 0x0000_0190, "CKR_CRYPTOKI_NOT_INITIALIZED", Protocol;
    CryptokiAlreadyInitialized = 0x0000_0191, "CKR_CRYPTOKI_ALREADY_INITIALIZED", Protocol;
    MutexBad = 0x0000_01A0, "CKR_MUTEX_BAD", Other;
    MutexNotLocked = 0x0000_01A1, "CKR_MUTEX_NOT_LOCKED", Other;
    NewPinMode = 0x0000_01B0, "CKR_NEW_PIN_MODE", Authentication;
    NextOtp = 0x0000_01B1, "CKR_NEXT_OTP", Authentication;
    ExceededMaxIterations = 0x0000_01B5, "CKR_EXCEEDED_MAX_ITERATIONS", Resource;
    FipsSelfTestFailed = 0x0000_01B6, "CKR_FIPS_SELF_TEST_FAILED", Device;
    LibraryLoadFailed = 0x0000_01B7, "CKR_LIBRARY_LOAD_FAILED", Device;
    PinTooWeak = 0x0000_01B8, "CKR_PIN_TOO_WEAK", Authentication;
    PublicKeyInvalid = 0x0000_01B9, "CKR_PUBLIC_KEY_INVALID", Protocol;
    FunctionRejected = 0x0000_0200, "CKR_FUNCTION_REJECTED", Protocol;
    TokenResourceExceeded = 0x0000_0201, "CKR_TOKEN_RESOURCE_EXCEEDED", Resource;
    OperationCancelFailed = 0x0000_0202, "CKR_OPERATION_CANCEL_FAILED", Other;
    VendorDefined = 0x8000_0000, "CKR_VENDOR_DEFINED", Other;
}

impl ErrorCode {
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authentication)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.code()),
        }
    }
}

/// Turn a native status into a result: `CKR_OK` is `Ok(())`,
/// anything else a [`P11Error::Pkcs11`].
pub fn check_rv(rv: CK_RV) -> P11Result<()> {
    match ErrorCode::from_native(rv) {
        None => Ok(()),
        Some(code) => Err(P11Error::Pkcs11(code)),
    }
}

//! Typed views of the fixed-width native info records.
//!
//! Character fields of these records are blank padded, not NUL terminated.

use std::fmt::{self, Display, Formatter};

use cosmian_pkcs11_sys::{
    CK_FLAGS, CK_INFO, CK_MECHANISM_INFO, CK_SESSION_INFO, CK_SLOT_ID, CK_SLOT_INFO, CK_STATE,
    CK_TOKEN_INFO, CK_ULONG, CK_VERSION, CKF_HW_SLOT, CKF_LOGIN_REQUIRED, CKF_REMOVABLE_DEVICE,
    CKF_RNG, CKF_RW_SESSION, CKF_TOKEN_INITIALIZED, CKF_TOKEN_PRESENT, CKF_USER_PIN_INITIALIZED,
    CKF_WRITE_PROTECTED,
};

/// Decode a blank padded character field.
#[must_use]
pub fn from_blank_padded(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|&c| c != b' ' && c != 0)
        .map_or(0, |p| p + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encode `value` into a blank padded field of `N` bytes, truncating if needed.
#[must_use]
pub fn blank_padded<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl From<CK_VERSION> for Version {
    fn from(version: CK_VERSION) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    pub cryptoki_version: Version,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub library_description: String,
    pub library_version: Version,
}

impl From<CK_INFO> for ModuleInfo {
    fn from(info: CK_INFO) -> Self {
        Self {
            cryptoki_version: info.cryptokiVersion.into(),
            manufacturer_id: from_blank_padded(&info.manufacturerID),
            flags: info.flags,
            library_description: from_blank_padded(&info.libraryDescription),
            library_version: info.libraryVersion.into(),
        }
    }
}

impl Display for ModuleInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}",
            self.cryptoki_version,
            self.manufacturer_id,
            self.flags,
            self.library_description,
            self.library_version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotInfo {
    pub slot_description: String,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl SlotInfo {
    #[must_use]
    pub const fn token_present(&self) -> bool {
        self.flags & CKF_TOKEN_PRESENT != 0
    }

    #[must_use]
    pub const fn removable_device(&self) -> bool {
        self.flags & CKF_REMOVABLE_DEVICE != 0
    }

    #[must_use]
    pub const fn hardware_slot(&self) -> bool {
        self.flags & CKF_HW_SLOT != 0
    }
}

impl From<CK_SLOT_INFO> for SlotInfo {
    fn from(info: CK_SLOT_INFO) -> Self {
        Self {
            slot_description: from_blank_padded(&info.slotDescription),
            manufacturer_id: from_blank_padded(&info.manufacturerID),
            flags: info.flags,
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub flags: CK_FLAGS,
    pub max_session_count: CK_ULONG,
    pub session_count: CK_ULONG,
    pub max_rw_session_count: CK_ULONG,
    pub rw_session_count: CK_ULONG,
    pub max_pin_len: CK_ULONG,
    pub min_pin_len: CK_ULONG,
    pub total_public_memory: CK_ULONG,
    pub free_public_memory: CK_ULONG,
    pub total_private_memory: CK_ULONG,
    pub free_private_memory: CK_ULONG,
    pub hardware_version: Version,
    pub firmware_version: Version,
    pub utc_time: String,
}

impl TokenInfo {
    #[must_use]
    pub const fn has_rng(&self) -> bool {
        self.flags & CKF_RNG != 0
    }

    #[must_use]
    pub const fn write_protected(&self) -> bool {
        self.flags & CKF_WRITE_PROTECTED != 0
    }

    #[must_use]
    pub const fn login_required(&self) -> bool {
        self.flags & CKF_LOGIN_REQUIRED != 0
    }

    #[must_use]
    pub const fn user_pin_initialized(&self) -> bool {
        self.flags & CKF_USER_PIN_INITIALIZED != 0
    }

    #[must_use]
    pub const fn initialized(&self) -> bool {
        self.flags & CKF_TOKEN_INITIALIZED != 0
    }
}

impl From<CK_TOKEN_INFO> for TokenInfo {
    fn from(info: CK_TOKEN_INFO) -> Self {
        Self {
            label: from_blank_padded(&info.label),
            manufacturer_id: from_blank_padded(&info.manufacturerID),
            model: from_blank_padded(&info.model),
            serial_number: from_blank_padded(&info.serialNumber),
            flags: info.flags,
            max_session_count: info.ulMaxSessionCount,
            session_count: info.ulSessionCount,
            max_rw_session_count: info.ulMaxRwSessionCount,
            rw_session_count: info.ulRwSessionCount,
            max_pin_len: info.ulMaxPinLen,
            min_pin_len: info.ulMinPinLen,
            total_public_memory: info.ulTotalPublicMemory,
            free_public_memory: info.ulFreePublicMemory,
            total_private_memory: info.ulTotalPrivateMemory,
            free_private_memory: info.ulFreePrivateMemory,
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
            utc_time: from_blank_padded(&info.utcTime),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionInfo {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: CK_FLAGS,
    pub device_error: CK_ULONG,
}

impl SessionInfo {
    #[must_use]
    pub const fn is_read_write(&self) -> bool {
        self.flags & CKF_RW_SESSION != 0
    }
}

impl From<CK_SESSION_INFO> for SessionInfo {
    fn from(info: CK_SESSION_INFO) -> Self {
        Self {
            slot_id: info.slotID,
            state: info.state,
            flags: info.flags,
            device_error: info.ulDeviceError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MechanismInfo {
    pub min_key_size: CK_ULONG,
    pub max_key_size: CK_ULONG,
    pub flags: CK_FLAGS,
}

impl MechanismInfo {
    #[must_use]
    pub const fn supports(&self, flag: CK_FLAGS) -> bool {
        self.flags & flag == flag
    }
}

impl From<CK_MECHANISM_INFO> for MechanismInfo {
    fn from(info: CK_MECHANISM_INFO) -> Self {
        Self {
            min_key_size: info.ulMinKeySize,
            max_key_size: info.ulMaxKeySize,
            flags: info.flags,
        }
    }
}

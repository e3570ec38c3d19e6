use cosmian_pkcs11_sys::{
    CK_INFO, CK_MECHANISM_INFO, CK_TOKEN_INFO, CK_VERSION, CKF_ENCRYPT, CKF_DECRYPT,
    CKF_LOGIN_REQUIRED, CKF_RNG, CKF_SIGN, CKF_TOKEN_INITIALIZED,
};

use crate::{MechanismInfo, ModuleInfo, TokenInfo, Version, blank_padded, from_blank_padded};

#[test]
fn test_blank_padding() {
    let field: [u8; 8] = blank_padded("abc");
    assert_eq!(&field, b"abc     ");
    assert_eq!(from_blank_padded(&field), "abc");

    let truncated: [u8; 4] = blank_padded("abcdef");
    assert_eq!(&truncated, b"abcd");
    assert_eq!(from_blank_padded(b"        "), "");
    // some modules pad with NUL
    assert_eq!(from_blank_padded(b"token\0\0\0"), "token");
}

#[test]
fn test_module_info() {
    let info = CK_INFO {
        cryptokiVersion: CK_VERSION { major: 2, minor: 40 },
        manufacturerID: blank_padded("SoftHSM"),
        flags: 0,
        libraryDescription: blank_padded("Implementation of PKCS11"),
        libraryVersion: CK_VERSION { major: 2, minor: 6 },
    };
    let info = ModuleInfo::from(info);
    assert_eq!(info.manufacturer_id, "SoftHSM");
    assert_eq!(info.library_description, "Implementation of PKCS11");
    assert_eq!(info.cryptoki_version, Version { major: 2, minor: 40 });
    assert!(info.to_string().contains("Library Version: 2.6"));
}

#[test]
fn test_token_flags() {
    let info = TokenInfo::from(CK_TOKEN_INFO {
        label: blank_padded("my token"),
        flags: CKF_RNG | CKF_LOGIN_REQUIRED | CKF_TOKEN_INITIALIZED,
        ..CK_TOKEN_INFO::default()
    });
    assert_eq!(info.label, "my token");
    assert!(info.has_rng());
    assert!(info.login_required());
    assert!(info.initialized());
    assert!(!info.write_protected());
    assert!(!info.user_pin_initialized());
}

#[test]
fn test_mechanism_flags() {
    let info = MechanismInfo::from(CK_MECHANISM_INFO {
        ulMinKeySize: 16,
        ulMaxKeySize: 32,
        flags: CKF_ENCRYPT | CKF_DECRYPT,
    });
    assert!(info.supports(CKF_ENCRYPT));
    assert!(info.supports(CKF_ENCRYPT | CKF_DECRYPT));
    assert!(!info.supports(CKF_SIGN));
    assert_eq!(info.max_key_size, 32);
}

//! These tests require a SoftHSM2 library with an initialized token and are gated behind the
//! `softhsm2` feature. To run them, try something like
//! ```sh
//!  RUST_LOG=info \
//!  SOFTHSM2_PKCS11_LIB=/usr/lib/softhsm/libsofthsm2.so \
//!  HSM_USER_PASSWORD="12345678" \
//!  HSM_SLOT_ID=0 \
//!  cargo test --features softhsm2 -- --ignored softhsm2
//! ```
use std::{env, sync::Arc, thread};

use cosmian_logger::{info, log_init};
use cosmian_pkcs11_sys::{
    CK_SLOT_ID, CKA_CLASS, CKA_KEY_TYPE, CKA_LABEL, CKA_MODULUS, CKA_MODULUS_BITS,
    CKA_PUBLIC_EXPONENT, CKA_VALUE, CKA_VALUE_LEN, CKG_MGF1_SHA256, CKK_AES, CKM_AES_GCM,
    CKM_AES_KEY_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_PKCS_OAEP, CKM_RSA_PKCS_PSS,
    CKM_SHA256, CKO_SECRET_KEY,
};
use num_bigint_dig::BigUint;
use zeroize::Zeroizing;

use crate::{
    Attribute, InitArgs, Mechanism, MechanismParameter, ModuleConfig, ModuleRegistry, P11Error,
    P11Result, Pkcs11Module, Session, UserType, shared,
};

const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";
const SLOT_ID: CK_SLOT_ID = 0x00;

fn lib_path() -> String {
    env::var("SOFTHSM2_PKCS11_LIB").unwrap_or_else(|_| SOFTHSM2_PKCS11_LIB.to_owned())
}

fn password() -> P11Result<Zeroizing<Vec<u8>>> {
    let password = env::var("HSM_USER_PASSWORD")
        .map_err(|_| P11Error::Default("HSM_USER_PASSWORD is not set".to_owned()))?;
    Ok(Zeroizing::new(password.into_bytes()))
}

fn slot_id() -> CK_SLOT_ID {
    env::var("HSM_SLOT_ID")
        .ok()
        .and_then(|id| id.parse().ok())
        .unwrap_or(SLOT_ID)
}

fn connect() -> P11Result<Arc<Pkcs11Module>> {
    let mut config = ModuleConfig::new(lib_path());
    config.os_locking_ok = true;
    ModuleRegistry::global().connect_with(&config)
}

fn login_session(module: &Arc<Pkcs11Module>) -> P11Result<Session> {
    let session = module.slot(slot_id()).open_session(true)?;
    if let Err(e) = session.login(UserType::User, &password()?) {
        if !e.is(crate::ErrorCode::UserAlreadyLoggedIn) {
            return Err(e);
        }
    }
    Ok(session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_info_and_slots() -> P11Result<()> {
    log_init(None);
    let module = connect()?;
    info!("Connected to the HSM:\n{}", module.info()?);
    for slot in module.slots(true)? {
        let token = slot.token_info()?;
        info!("slot {}: token {} ({})", slot.id(), token.label, token.model);
        assert!(slot.info()?.token_present());
    }
    let mechanisms = module.slot(slot_id()).mechanisms()?;
    assert!(mechanisms.contains(&CKM_AES_GCM));
    Ok(())
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_reconnect_is_deduplicated() -> P11Result<()> {
    log_init(None);
    let first = connect()?;
    // a second registry shares no state: the native module reports it is
    // already initialized, which is absorbed
    let registry = ModuleRegistry::new(crate::NativeLoader);
    let second = registry.connect(
        &lib_path(),
        crate::DEFAULT_FUNCTION_LIST_NAME,
        Some(&InitArgs::os_locking_ok()),
        false,
    )?;
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &connect()?));
    Ok(())
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_aes_gcm() -> P11Result<()> {
    log_init(None);
    let module = connect()?;
    let session = login_session(&module)?;
    let key = session.generate_key(
        &mut Mechanism::new(CKM_AES_KEY_GEN),
        &[
            Attribute::ulong(CKA_CLASS, CKO_SECRET_KEY),
            Attribute::ulong(CKA_KEY_TYPE, CKK_AES),
            Attribute::ulong(CKA_VALUE_LEN, 32),
            Attribute::chars(CKA_LABEL, "bridge-aes-test"),
            shared::TOKEN_FALSE,
            shared::ENCRYPT_TRUE,
            shared::DECRYPT_TRUE,
        ],
    )?;

    let iv = session.generate_random(12)?;
    let mut gcm = Mechanism::with_parameter(
        CKM_AES_GCM,
        MechanismParameter::Gcm {
            iv,
            aad: b"header".to_vec(),
            tag_bits: 128,
        },
    );
    let ciphertext = session.encrypt(&mut gcm, key, b"Hello, SoftHSM2!")?;
    assert_eq!(ciphertext.len(), 16 + 16);
    let address = gcm.native_handle();
    let plaintext = session.decrypt(&mut gcm, key, &ciphertext)?;
    assert_eq!(plaintext.as_slice(), b"Hello, SoftHSM2!");
    assert_eq!(gcm.native_handle(), address);

    let label = session.get_attribute(key, CKA_LABEL)?;
    assert_eq!(
        label.map(|l| l.as_chars().map(ToOwned::to_owned)).transpose()?,
        Some("bridge-aes-test".to_owned())
    );
    let found = session.find_objects(&[Attribute::chars(CKA_LABEL, "bridge-aes-test")])?;
    assert!(found.contains(&key));
    // reading a sensitive value yields an absent attribute, not an error
    let value = session.get_attributes(key, &[CKA_VALUE])?;
    info!("CKA_VALUE absent: {}", value[0].is_absent());

    session.destroy_object(key)?;
    session.close()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_rsa() -> P11Result<()> {
    log_init(None);
    let module = connect()?;
    let session = login_session(&module)?;
    let exponent = BigUint::from(65_537_u32);
    let (public_key, private_key) = session.generate_key_pair(
        &mut Mechanism::new(CKM_RSA_PKCS_KEY_PAIR_GEN),
        &[
            Attribute::ulong(CKA_MODULUS_BITS, 2048),
            Attribute::big_integer(CKA_PUBLIC_EXPONENT, &exponent),
            shared::TOKEN_FALSE,
            shared::ENCRYPT_TRUE,
            shared::VERIFY_TRUE,
        ],
        &[
            shared::TOKEN_FALSE,
            shared::DECRYPT_TRUE,
            shared::SIGN_TRUE,
        ],
    )?;

    let attributes = session.get_attributes(public_key, &[CKA_MODULUS, CKA_PUBLIC_EXPONENT])?;
    assert_eq!(attributes[0].as_bytes()?.len(), 256);
    assert_eq!(attributes[1].as_big_uint()?, exponent);

    let mut oaep = Mechanism::with_parameter(
        CKM_RSA_PKCS_OAEP,
        MechanismParameter::RsaOaep {
            hash_alg: CKM_SHA256,
            mgf: CKG_MGF1_SHA256,
            source_data: vec![],
        },
    );
    let ciphertext = session.encrypt(&mut oaep, public_key, b"secret")?;
    let plaintext = session.decrypt(&mut oaep, private_key, &ciphertext)?;
    assert_eq!(plaintext.as_slice(), b"secret");

    let mut pss = Mechanism::with_parameter(
        CKM_RSA_PKCS_PSS,
        MechanismParameter::RsaPss {
            hash_alg: CKM_SHA256,
            mgf: CKG_MGF1_SHA256,
            salt_len: 32,
        },
    );
    let digest = session.digest(&mut Mechanism::new(CKM_SHA256), b"to be signed")?;
    let signature = session.sign(&mut pss, private_key, &digest)?;
    session.verify(&mut pss, public_key, &digest, &signature)?;

    session.destroy_object(public_key)?;
    session.destroy_object(private_key)?;
    session.close()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_multi_threaded_random() -> P11Result<()> {
    log_init(None);
    let module = connect()?;
    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| -> P11Result<()> {
                    let session = module.slot(slot_id()).open_session(false)?;
                    assert_eq!(session.generate_random(64)?.len(), 64);
                    session.close()
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| P11Error::Default("worker thread panicked".to_owned()))??;
        }
        Ok(())
    })
}

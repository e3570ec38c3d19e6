use std::env;

use cosmian_pkcs11_sys::CKF_OS_LOCKING_OK;
use serial_test::serial;

use crate::{
    DEFAULT_FUNCTION_LIST_NAME, ModuleConfig, P11Error, P11Result,
    config::{ENV_FUNCTION_LIST, ENV_MODULE_PATH, ENV_OMIT_INITIALIZE, ENV_OS_LOCKING_OK},
};

fn clear_env() {
    // SAFETY: tests touching the environment run serially
    unsafe {
        for name in [
            ENV_MODULE_PATH,
            ENV_FUNCTION_LIST,
            ENV_OS_LOCKING_OK,
            ENV_OMIT_INITIALIZE,
        ] {
            env::remove_var(name);
        }
    }
}

#[test]
#[serial]
fn test_from_env_defaults() -> P11Result<()> {
    clear_env();
    // SAFETY: tests touching the environment run serially
    unsafe { env::set_var(ENV_MODULE_PATH, "/usr/lib/softhsm/libsofthsm2.so") };
    let config = ModuleConfig::from_env()?;
    assert_eq!(config, ModuleConfig::new("/usr/lib/softhsm/libsofthsm2.so"));
    assert_eq!(config.function_list_name, DEFAULT_FUNCTION_LIST_NAME);
    assert!(!config.init_args().is_os_locking_ok());
    clear_env();
    Ok(())
}

#[test]
#[serial]
fn test_from_env_overrides() -> P11Result<()> {
    clear_env();
    // SAFETY: tests touching the environment run serially
    unsafe {
        env::set_var(ENV_MODULE_PATH, "/opt/hsm/lib.so");
        env::set_var(ENV_FUNCTION_LIST, "C_GetFunctionListVendor");
        env::set_var(ENV_OS_LOCKING_OK, "true");
        env::set_var(ENV_OMIT_INITIALIZE, "1");
    }
    let config = ModuleConfig::from_env()?;
    assert_eq!(config.function_list_name, "C_GetFunctionListVendor");
    assert!(config.os_locking_ok);
    assert!(config.omit_initialize);
    assert_eq!(config.init_args().flags, CKF_OS_LOCKING_OK);
    clear_env();
    Ok(())
}

#[test]
#[serial]
fn test_from_env_errors() {
    clear_env();
    assert!(matches!(
        ModuleConfig::from_env(),
        Err(P11Error::Configuration(_))
    ));
    // SAFETY: tests touching the environment run serially
    unsafe {
        env::set_var(ENV_MODULE_PATH, "/opt/hsm/lib.so");
        env::set_var(ENV_OS_LOCKING_OK, "maybe");
    }
    assert!(matches!(
        ModuleConfig::from_env(),
        Err(P11Error::Configuration(_))
    ));
    clear_env();
}

#[test]
fn test_deserialize_with_defaults() -> Result<(), serde_json::Error> {
    let config: ModuleConfig =
        serde_json::from_str(r#"{ "library_path": "/usr/lib/libsofthsm2.so" }"#)?;
    assert_eq!(config, ModuleConfig::new("/usr/lib/libsofthsm2.so"));

    let config: ModuleConfig = serde_json::from_str(
        r#"{
            "library_path": "/opt/lib.so",
            "function_list_name": "C_GetFunctionListVendor",
            "os_locking_ok": true,
            "omit_initialize": true
        }"#,
    )?;
    assert!(config.os_locking_ok);
    assert!(config.omit_initialize);
    assert_eq!(config.function_list_name, "C_GetFunctionListVendor");
    Ok(())
}

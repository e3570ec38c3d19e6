use std::env;

use cosmian_pkcs11_sys::CKF_OS_LOCKING_OK;
use serde::{Deserialize, Serialize};

use crate::{InitArgs, P11Error, P11Result};

pub const DEFAULT_FUNCTION_LIST_NAME: &str = "C_GetFunctionList";

pub const ENV_MODULE_PATH: &str = "PKCS11_MODULE_PATH";
pub const ENV_FUNCTION_LIST: &str = "PKCS11_FUNCTION_LIST";
pub const ENV_OS_LOCKING_OK: &str = "PKCS11_OS_LOCKING_OK";
pub const ENV_OMIT_INITIALIZE: &str = "PKCS11_OMIT_INITIALIZE";

fn default_function_list_name() -> String {
    DEFAULT_FUNCTION_LIST_NAME.to_owned()
}

/// How to reach and initialize one PKCS#11 module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModuleConfig {
    /// Path of the shared library
    pub library_path: String,
    /// Entry point returning the function list
    #[serde(default = "default_function_list_name")]
    pub function_list_name: String,
    /// Assert that the module may use OS locking, so calls need not be
    /// serialized
    #[serde(default)]
    pub os_locking_ok: bool,
    /// Skip `C_Initialize`, for modules already initialized by another
    /// component of the process
    #[serde(default)]
    pub omit_initialize: bool,
}

impl ModuleConfig {
    #[must_use]
    pub fn new(library_path: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            function_list_name: default_function_list_name(),
            os_locking_ok: false,
            omit_initialize: false,
        }
    }

    /// Read the configuration from `PKCS11_MODULE_PATH` (required),
    /// `PKCS11_FUNCTION_LIST`, `PKCS11_OS_LOCKING_OK` and
    /// `PKCS11_OMIT_INITIALIZE`.
    pub fn from_env() -> P11Result<Self> {
        let library_path = env::var(ENV_MODULE_PATH).map_err(|e| {
            P11Error::Configuration(format!("{ENV_MODULE_PATH} is not set: {e}"))
        })?;
        if library_path.trim().is_empty() {
            return Err(P11Error::Configuration(format!("{ENV_MODULE_PATH} is empty")));
        }
        Ok(Self {
            library_path,
            function_list_name: env::var(ENV_FUNCTION_LIST)
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(default_function_list_name),
            os_locking_ok: env_flag(ENV_OS_LOCKING_OK)?,
            omit_initialize: env_flag(ENV_OMIT_INITIALIZE)?,
        })
    }

    /// The initialize arguments matching this configuration.
    #[must_use]
    pub const fn init_args(&self) -> InitArgs {
        if self.os_locking_ok {
            InitArgs::new(CKF_OS_LOCKING_OK)
        } else {
            InitArgs::new(0)
        }
    }
}

fn env_flag(name: &str) -> P11Result<bool> {
    let Ok(value) = env::var(name) else {
        return Ok(false);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(P11Error::Configuration(format!(
            "{name}: invalid boolean value {other}"
        ))),
    }
}

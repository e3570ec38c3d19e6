//! Copyright 2024 Cosmian Tech SAS
//!
//! Safe access to PKCS#11 modules.
//!
//! A [`ModuleRegistry`] hands out one [`Pkcs11Module`] per library path,
//! initialized once and serialized when the module cannot be called
//! concurrently. Sessions, attribute templates and mechanisms are typed; the
//! native layouts they require are built and released here.

#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

pub use api::{InitArgs, Pkcs11Api, UserType, requires_serialization};
pub use attribute::{
    Attribute, AttributeValue, NativeTemplate, ValueKind, shared, value_kind,
};
pub use config::{DEFAULT_FUNCTION_LIST_NAME, ModuleConfig};
pub use cosmian_pkcs11_sys as sys;
pub use error::{P11Error, P11Result};
pub use error_code::{ErrorCategory, ErrorCode, check_rv};
pub use info::{
    MechanismInfo, ModuleInfo, SessionInfo, SlotInfo, TokenInfo, Version, blank_padded,
    from_blank_padded,
};
pub use mechanism::{Mechanism, MechanismParameter, NativeMechanism, NativeParameterHandle};
pub use module::Pkcs11Module;
pub use native::NativeModule;
pub use registry::{ModuleLoader, ModuleRegistry, NativeLoader};
pub use session::{FIND_BATCH_SIZE, Session, Slot};
pub use synchronized::Synchronized;

mod api;
mod attribute;
pub mod config;
mod error;
mod error_code;
mod info;
mod mechanism;
mod module;
mod native;
mod registry;
mod session;
mod synchronized;

#[cfg(test)]
mod tests;

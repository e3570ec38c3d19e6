//! The native call surface of a PKCS#11 module.
//!
//! [`Pkcs11Api`] is implemented by [`crate::NativeModule`] (the real library)
//! and by [`crate::Synchronized`], which serializes the calls of any other
//! implementation. Every method maps to one `C_*` function; a failing status
//! surfaces as [`crate::P11Error::Pkcs11`].
//!
//! Functions a module does not provide default to `CKR_FUNCTION_NOT_SUPPORTED`.

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE,
    CK_SLOT_ID, CK_USER_TYPE, CKF_LIBRARY_CANT_CREATE_OS_THREADS, CKF_OS_LOCKING_OK, CKU_CONTEXT_SPECIFIC,
    CKU_SO, CKU_USER,
};

use crate::{
    Attribute, ErrorCode, Mechanism, MechanismInfo, ModuleInfo, P11Error, P11Result, SessionInfo,
    SlotInfo, TokenInfo,
};

/// Flags passed to `C_Initialize`. Mutex callbacks are never provided:
/// a module either uses OS locking or is serialized by [`crate::Synchronized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitArgs {
    pub flags: CK_FLAGS,
}

impl InitArgs {
    #[must_use]
    pub const fn new(flags: CK_FLAGS) -> Self {
        Self { flags }
    }

    #[must_use]
    pub const fn os_locking_ok() -> Self {
        Self::new(CKF_OS_LOCKING_OK)
    }

    /// Whether the caller accepts the module using OS-level locking
    #[must_use]
    pub const fn is_os_locking_ok(&self) -> bool {
        self.flags & CKF_OS_LOCKING_OK != 0
    }

    #[must_use]
    pub const fn library_cant_create_os_threads(&self) -> bool {
        self.flags & CKF_LIBRARY_CANT_CREATE_OS_THREADS != 0
    }
}

/// Whether calls to a module initialized with `init_args` must be serialized.
///
/// Only a caller asserting `CKF_OS_LOCKING_OK` lets the module run
/// concurrent calls.
#[must_use]
pub fn requires_serialization(init_args: Option<&InitArgs>) -> bool {
    !init_args.is_some_and(InitArgs::is_os_locking_ok)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    SecurityOfficer,
    User,
    ContextSpecific,
}

impl From<UserType> for CK_USER_TYPE {
    fn from(user_type: UserType) -> Self {
        match user_type {
            UserType::SecurityOfficer => CKU_SO,
            UserType::User => CKU_USER,
            UserType::ContextSpecific => CKU_CONTEXT_SPECIFIC,
        }
    }
}

fn not_supported<T>() -> P11Result<T> {
    Err(P11Error::Pkcs11(ErrorCode::FunctionNotSupported))
}

#[allow(unused_variables)]
pub trait Pkcs11Api: Send + Sync {
    fn initialize(&self, init_args: Option<&InitArgs>) -> P11Result<()>;

    fn finalize(&self) -> P11Result<()>;

    fn get_info(&self) -> P11Result<ModuleInfo> {
        not_supported()
    }

    fn get_slot_list(&self, token_present: bool) -> P11Result<Vec<CK_SLOT_ID>> {
        not_supported()
    }

    fn get_slot_info(&self, slot_id: CK_SLOT_ID) -> P11Result<SlotInfo> {
        not_supported()
    }

    fn get_token_info(&self, slot_id: CK_SLOT_ID) -> P11Result<TokenInfo> {
        not_supported()
    }

    fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> P11Result<Vec<CK_MECHANISM_TYPE>> {
        not_supported()
    }

    fn get_mechanism_info(
        &self,
        slot_id: CK_SLOT_ID,
        mechanism: CK_MECHANISM_TYPE,
    ) -> P11Result<MechanismInfo> {
        not_supported()
    }

    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> P11Result<CK_SESSION_HANDLE> {
        not_supported()
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        not_supported()
    }

    fn close_all_sessions(&self, slot_id: CK_SLOT_ID) -> P11Result<()> {
        not_supported()
    }

    fn get_session_info(&self, session: CK_SESSION_HANDLE) -> P11Result<SessionInfo> {
        not_supported()
    }

    fn login(&self, session: CK_SESSION_HANDLE, user_type: UserType, pin: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        not_supported()
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    fn copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> P11Result<()> {
        not_supported()
    }

    /// Read attribute values. Values the token will not reveal
    /// (sensitive or unknown types) come back absent.
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> P11Result<Vec<Attribute>> {
        not_supported()
    }

    fn set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<()> {
        not_supported()
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> P11Result<()> {
        not_supported()
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        max_count: usize,
    ) -> P11Result<Vec<CK_OBJECT_HANDLE>> {
        not_supported()
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        not_supported()
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        not_supported()
    }

    fn encrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn encrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn encrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        not_supported()
    }

    fn decrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn decrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn decrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn digest_init(&self, session: CK_SESSION_HANDLE, mechanism: &mut Mechanism) -> P11Result<()> {
        not_supported()
    }

    fn digest(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn digest_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn digest_key(&self, session: CK_SESSION_HANDLE, key: CK_OBJECT_HANDLE) -> P11Result<()> {
        not_supported()
    }

    fn digest_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        not_supported()
    }

    fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn sign_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        not_supported()
    }

    fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn verify_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn verify_final(&self, session: CK_SESSION_HANDLE, signature: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    /// Returns the `(public, private)` key handles
    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> P11Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        not_supported()
    }

    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<Vec<u8>> {
        not_supported()
    }

    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> P11Result<()> {
        not_supported()
    }

    fn generate_random(&self, session: CK_SESSION_HANDLE, len: usize) -> P11Result<Vec<u8>> {
        not_supported()
    }
}

//! A [`Pkcs11Api`] decorator serializing every call on one connection.
//!
//! Modules initialized without `CKF_OS_LOCKING_OK` may not be called from
//! several threads at once. Wrapping them in [`Synchronized`] makes each call
//! run to completion before the next one starts, whichever thread issues it.
//! Nothing else changes: arguments, results and errors pass through as is.

use std::sync::{Mutex, MutexGuard};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE,
    CK_SLOT_ID,
};

use crate::{
    Attribute, InitArgs, Mechanism, MechanismInfo, ModuleInfo, P11Error, P11Result, Pkcs11Api,
    SessionInfo, SlotInfo, TokenInfo, UserType,
};

pub struct Synchronized<A: Pkcs11Api> {
    inner: A,
    lock: Mutex<()>,
}

impl<A: Pkcs11Api> Synchronized<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    /// The wrapped connection. Calls made through it bypass serialization.
    pub const fn inner(&self) -> &A {
        &self.inner
    }

    fn lock(&self) -> P11Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|e| P11Error::Default(format!("Failed to acquire the call lock: {e}")))
    }
}

/// Implement each listed method by forwarding it to the inner connection
/// while holding the call lock.
macro_rules! serialized {
    ($(fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
        $(
            fn $name(&self $(, $arg: $ty)*) -> $ret {
                let _guard = self.lock()?;
                self.inner.$name($($arg),*)
            }
        )*
    };
}

impl<A: Pkcs11Api> Pkcs11Api for Synchronized<A> {
    serialized! {
        fn initialize(&self, init_args: Option<&InitArgs>) -> P11Result<()>;
        fn finalize(&self) -> P11Result<()>;
        fn get_info(&self) -> P11Result<ModuleInfo>;
        fn get_slot_list(&self, token_present: bool) -> P11Result<Vec<CK_SLOT_ID>>;
        fn get_slot_info(&self, slot_id: CK_SLOT_ID) -> P11Result<SlotInfo>;
        fn get_token_info(&self, slot_id: CK_SLOT_ID) -> P11Result<TokenInfo>;
        fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> P11Result<Vec<CK_MECHANISM_TYPE>>;
        fn get_mechanism_info(
            &self,
            slot_id: CK_SLOT_ID,
            mechanism: CK_MECHANISM_TYPE
        ) -> P11Result<MechanismInfo>;
        fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> P11Result<CK_SESSION_HANDLE>;
        fn close_session(&self, session: CK_SESSION_HANDLE) -> P11Result<()>;
        fn close_all_sessions(&self, slot_id: CK_SLOT_ID) -> P11Result<()>;
        fn get_session_info(&self, session: CK_SESSION_HANDLE) -> P11Result<SessionInfo>;
        fn login(&self, session: CK_SESSION_HANDLE, user_type: UserType, pin: &[u8]) -> P11Result<()>;
        fn logout(&self, session: CK_SESSION_HANDLE) -> P11Result<()>;
        fn create_object(
            &self,
            session: CK_SESSION_HANDLE,
            template: &[Attribute]
        ) -> P11Result<CK_OBJECT_HANDLE>;
        fn copy_object(
            &self,
            session: CK_SESSION_HANDLE,
            object: CK_OBJECT_HANDLE,
            template: &[Attribute]
        ) -> P11Result<CK_OBJECT_HANDLE>;
        fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> P11Result<()>;
        fn get_attribute_value(
            &self,
            session: CK_SESSION_HANDLE,
            object: CK_OBJECT_HANDLE,
            types: &[CK_ATTRIBUTE_TYPE]
        ) -> P11Result<Vec<Attribute>>;
        fn set_attribute_value(
            &self,
            session: CK_SESSION_HANDLE,
            object: CK_OBJECT_HANDLE,
            template: &[Attribute]
        ) -> P11Result<()>;
        fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> P11Result<()>;
        fn find_objects(
            &self,
            session: CK_SESSION_HANDLE,
            max_count: usize
        ) -> P11Result<Vec<CK_OBJECT_HANDLE>>;
        fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> P11Result<()>;
        fn encrypt_init(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            key: CK_OBJECT_HANDLE
        ) -> P11Result<()>;
        fn encrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn encrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn encrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>>;
        fn decrypt_init(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            key: CK_OBJECT_HANDLE
        ) -> P11Result<()>;
        fn decrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn decrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn decrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>>;
        fn digest_init(&self, session: CK_SESSION_HANDLE, mechanism: &mut Mechanism) -> P11Result<()>;
        fn digest(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn digest_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()>;
        fn digest_key(&self, session: CK_SESSION_HANDLE, key: CK_OBJECT_HANDLE) -> P11Result<()>;
        fn digest_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>>;
        fn sign_init(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            key: CK_OBJECT_HANDLE
        ) -> P11Result<()>;
        fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>>;
        fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()>;
        fn sign_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>>;
        fn verify_init(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            key: CK_OBJECT_HANDLE
        ) -> P11Result<()>;
        fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> P11Result<()>;
        fn verify_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()>;
        fn verify_final(&self, session: CK_SESSION_HANDLE, signature: &[u8]) -> P11Result<()>;
        fn generate_key(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            template: &[Attribute]
        ) -> P11Result<CK_OBJECT_HANDLE>;
        fn generate_key_pair(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            public_template: &[Attribute],
            private_template: &[Attribute]
        ) -> P11Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)>;
        fn wrap_key(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            wrapping_key: CK_OBJECT_HANDLE,
            key: CK_OBJECT_HANDLE
        ) -> P11Result<Vec<u8>>;
        fn unwrap_key(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            unwrapping_key: CK_OBJECT_HANDLE,
            wrapped_key: &[u8],
            template: &[Attribute]
        ) -> P11Result<CK_OBJECT_HANDLE>;
        fn derive_key(
            &self,
            session: CK_SESSION_HANDLE,
            mechanism: &mut Mechanism,
            base_key: CK_OBJECT_HANDLE,
            template: &[Attribute]
        ) -> P11Result<CK_OBJECT_HANDLE>;
        fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> P11Result<()>;
        fn generate_random(&self, session: CK_SESSION_HANDLE, len: usize) -> P11Result<Vec<u8>>;
    }
}

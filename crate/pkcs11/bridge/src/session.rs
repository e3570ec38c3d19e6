//! Slots and sessions of a module connection.
//!
//! Descriptors returned here are queried from the module on every call and
//! never cached, since tokens can come and go between two calls. A
//! [`Session`] is owned by the caller that opened it: it must be closed with
//! [`Session::close`], dropping it leaves the native session open.

use std::sync::Arc;

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE,
    CK_SLOT_ID, CKF_RW_SESSION, CKF_SERIAL_SESSION,
};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    Attribute, Mechanism, MechanismInfo, P11Error, P11Result, Pkcs11Module, SessionInfo,
    SlotInfo, TokenInfo, UserType,
};

/// Number of handles requested per `C_FindObjects` call
pub const FIND_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct Slot {
    module: Arc<Pkcs11Module>,
    id: CK_SLOT_ID,
}

impl Slot {
    pub(crate) const fn new(module: Arc<Pkcs11Module>, id: CK_SLOT_ID) -> Self {
        Self { module, id }
    }

    #[must_use]
    pub const fn id(&self) -> CK_SLOT_ID {
        self.id
    }

    #[must_use]
    pub const fn module(&self) -> &Arc<Pkcs11Module> {
        &self.module
    }

    pub fn info(&self) -> P11Result<SlotInfo> {
        self.module.get_slot_info(self.id)
    }

    pub fn token_info(&self) -> P11Result<TokenInfo> {
        self.module.get_token_info(self.id)
    }

    pub fn mechanisms(&self) -> P11Result<Vec<CK_MECHANISM_TYPE>> {
        self.module.get_mechanism_list(self.id)
    }

    pub fn mechanism_info(&self, mechanism: CK_MECHANISM_TYPE) -> P11Result<MechanismInfo> {
        self.module.get_mechanism_info(self.id, mechanism)
    }

    /// Open a serial session, read-write if requested.
    pub fn open_session(&self, read_write: bool) -> P11Result<Session> {
        let flags: CK_FLAGS = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        let handle = self.module.open_session(self.id, flags)?;
        debug!(
            "Opened session {handle} on slot {} of {} (read-write: {read_write})",
            self.id,
            self.module.path()
        );
        Ok(Session {
            module: self.module.clone(),
            handle,
        })
    }

    /// Close every session the application holds on this slot.
    pub fn close_all_sessions(&self) -> P11Result<()> {
        debug!("Closing all sessions on slot {}", self.id);
        self.module.close_all_sessions(self.id)
    }
}

/// An open session. Operations are forwarded to the module connection the
/// session was opened on.
#[derive(Debug)]
pub struct Session {
    module: Arc<Pkcs11Module>,
    handle: CK_SESSION_HANDLE,
}

impl Session {
    #[must_use]
    pub const fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn module(&self) -> &Arc<Pkcs11Module> {
        &self.module
    }

    /// Close the native session.
    pub fn close(self) -> P11Result<()> {
        debug!("Closing session {}", self.handle);
        self.module.close_session(self.handle)
    }

    pub fn info(&self) -> P11Result<SessionInfo> {
        self.module.get_session_info(self.handle)
    }

    pub fn login(&self, user_type: UserType, pin: &Zeroizing<Vec<u8>>) -> P11Result<()> {
        debug!("Logging in session {} as {user_type:?}", self.handle);
        self.module.login(self.handle, user_type, pin)
    }

    pub fn logout(&self) -> P11Result<()> {
        self.module.logout(self.handle)
    }

    pub fn create_object(&self, template: &[Attribute]) -> P11Result<CK_OBJECT_HANDLE> {
        self.module.create_object(self.handle, template)
    }

    pub fn copy_object(
        &self,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        self.module.copy_object(self.handle, object, template)
    }

    pub fn destroy_object(&self, object: CK_OBJECT_HANDLE) -> P11Result<()> {
        self.module.destroy_object(self.handle, object)
    }

    /// Read attributes of an object.
    ///
    /// Attributes the token does not reveal (sensitive, or not applicable to
    /// the object) come back absent instead of failing the whole read.
    pub fn get_attributes(
        &self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> P11Result<Vec<Attribute>> {
        self.module.get_attribute_value(self.handle, object, types)
    }

    /// Read a single attribute; `None` if the token does not reveal it.
    pub fn get_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        type_: CK_ATTRIBUTE_TYPE,
    ) -> P11Result<Option<Attribute>> {
        Ok(self
            .get_attributes(object, &[type_])?
            .into_iter()
            .next()
            .filter(|attribute| !attribute.is_absent()))
    }

    pub fn set_attributes(&self, object: CK_OBJECT_HANDLE, template: &[Attribute]) -> P11Result<()> {
        self.module.set_attribute_value(self.handle, object, template)
    }

    /// Find every object matching `template`.
    ///
    /// Handles are fetched in batches of [`FIND_BATCH_SIZE`]. The search is
    /// always finalized once started, even if a batch fails.
    pub fn find_objects(&self, template: &[Attribute]) -> P11Result<Vec<CK_OBJECT_HANDLE>> {
        self.module.find_objects_init(self.handle, template)?;
        let found = self.collect_found();
        let finalized = self.module.find_objects_final(self.handle);
        let handles = found?;
        finalized?;
        trace!("Found {} objects in session {}", handles.len(), self.handle);
        Ok(handles)
    }

    fn collect_found(&self) -> P11Result<Vec<CK_OBJECT_HANDLE>> {
        let mut handles = Vec::new();
        loop {
            let batch = self.module.find_objects(self.handle, FIND_BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }
            if batch.len() > FIND_BATCH_SIZE {
                return Err(P11Error::Default(
                    "More objects returned than requested".to_owned(),
                ));
            }
            handles.extend(batch);
        }
        Ok(handles)
    }

    pub fn encrypt(
        &self,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
    ) -> P11Result<Vec<u8>> {
        self.module.encrypt_init(self.handle, mechanism, key)?;
        self.module.encrypt(self.handle, data)
    }

    pub fn decrypt(
        &self,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
    ) -> P11Result<Zeroizing<Vec<u8>>> {
        self.module.decrypt_init(self.handle, mechanism, key)?;
        Ok(Zeroizing::new(self.module.decrypt(self.handle, data)?))
    }

    pub fn digest(&self, mechanism: &mut Mechanism, data: &[u8]) -> P11Result<Vec<u8>> {
        self.module.digest_init(self.handle, mechanism)?;
        self.module.digest(self.handle, data)
    }

    pub fn sign(
        &self,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
    ) -> P11Result<Vec<u8>> {
        self.module.sign_init(self.handle, mechanism, key)?;
        self.module.sign(self.handle, data)
    }

    /// Verify `signature` over `data`. An invalid signature is reported as
    /// `CKR_SIGNATURE_INVALID`.
    pub fn verify(
        &self,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> P11Result<()> {
        self.module.verify_init(self.handle, mechanism, key)?;
        self.module.verify(self.handle, data, signature)
    }

    pub fn generate_key(
        &self,
        mechanism: &mut Mechanism,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        self.module.generate_key(self.handle, mechanism, template)
    }

    pub fn generate_key_pair(
        &self,
        mechanism: &mut Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> P11Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        self.module
            .generate_key_pair(self.handle, mechanism, public_template, private_template)
    }

    pub fn wrap_key(
        &self,
        mechanism: &mut Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<Vec<u8>> {
        self.module
            .wrap_key(self.handle, mechanism, wrapping_key, key)
    }

    pub fn unwrap_key(
        &self,
        mechanism: &mut Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        self.module
            .unwrap_key(self.handle, mechanism, unwrapping_key, wrapped_key, template)
    }

    pub fn derive_key(
        &self,
        mechanism: &mut Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        self.module
            .derive_key(self.handle, mechanism, base_key, template)
    }

    pub fn seed_random(&self, seed: &[u8]) -> P11Result<()> {
        self.module.seed_random(self.handle, seed)
    }

    pub fn generate_random(&self, len: usize) -> P11Result<Vec<u8>> {
        self.module.generate_random(self.handle, len)
    }
}

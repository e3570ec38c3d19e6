use std::{ffi::OsStr, mem::size_of, ptr};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_BBOOL, CK_BYTE_PTR, CK_C_INITIALIZE_ARGS, CK_FALSE,
    CK_FLAGS, CK_FUNCTION_LIST, CK_FUNCTION_LIST_PTR, CK_FUNCTION_LIST_PTR_PTR, CK_INFO,
    CK_MECHANISM_INFO, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE,
    CK_SESSION_INFO, CK_SLOT_ID, CK_SLOT_INFO, CK_TOKEN_INFO, CK_TRUE, CK_ULONG, CK_ULONG_PTR,
    CK_USER_TYPE, CK_VOID_PTR,
};
use libloading::Library;
use tracing::{debug, trace};

use crate::{
    Attribute, ErrorCode, InitArgs, Mechanism, MechanismInfo, ModuleInfo, NativeTemplate,
    P11Error, P11Result, Pkcs11Api, SessionInfo, SlotInfo, TokenInfo, UserType, ValueKind,
    attribute::decode_native, error_code::check_rv, p11_ensure, value_kind,
};

/// `CK_UNAVAILABLE_INFORMATION`
const UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

/// Resolve an entry of the function list, failing if the module left it empty.
macro_rules! function {
    ($module:expr, $name:ident) => {
        $module
            .functions
            .$name
            .ok_or(P11Error::FunctionNotAvailable(stringify!($name)))?
    };
}

/// Call a function of the list and convert its status.
macro_rules! pkcs11_call {
    ($module:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let function = function!($module, $name);
        trace!("{}", stringify!($name));
        let rv = unsafe { function($($arg),*) };
        check_rv(rv)
    }};
}

/// Run the two-call output convention: ask for the length with a null
/// buffer, then fill a buffer of that length.
pub(crate) fn sized_output<F>(mut call: F) -> P11Result<Vec<u8>>
where
    F: FnMut(CK_BYTE_PTR, CK_ULONG_PTR) -> CK_RV,
{
    let mut len: CK_ULONG = 0;
    check_rv(call(ptr::null_mut(), &raw mut len))?;
    let mut output = vec![0_u8; usize::try_from(len)?];
    check_rv(call(output.as_mut_ptr(), &raw mut len))?;
    output.truncate(usize::try_from(len)?);
    Ok(output)
}

fn input(data: &[u8]) -> P11Result<(CK_BYTE_PTR, CK_ULONG)> {
    Ok((data.as_ptr().cast_mut(), CK_ULONG::try_from(data.len())?))
}

const fn empty_attribute(type_: CK_ATTRIBUTE_TYPE) -> CK_ATTRIBUTE {
    CK_ATTRIBUTE {
        type_,
        pValue: ptr::null_mut(),
        ulValueLen: 0,
    }
}

/// Statuses under which `C_GetAttributeValue` still reports every
/// other attribute of the template.
fn tolerate_unavailable(rv: CK_RV) -> P11Result<()> {
    match ErrorCode::from_native(rv) {
        None | Some(ErrorCode::AttributeSensitive | ErrorCode::AttributeTypeInvalid) => Ok(()),
        Some(code) => Err(P11Error::Pkcs11(code)),
    }
}

/// A PKCS#11 shared library and the function list it exports.
///
/// The library stays loaded as long as this value lives. Dropping it does not
/// call `C_Finalize`: finalization is explicit, see [`Pkcs11Api::finalize`].
pub struct NativeModule {
    path: String,
    functions: CK_FUNCTION_LIST,
    // must outlive `functions`, absent for in-process function lists
    _library: Option<Library>,
}

impl NativeModule {
    /// Load the library at `path` and resolve its function list through the
    /// entry point `function_list_name` (usually `C_GetFunctionList`).
    pub fn load(path: &str, function_list_name: &str) -> P11Result<Self> {
        debug!("Loading PKCS#11 library {path} through {function_list_name}");
        let library = unsafe { Library::new(OsStr::new(path)) }?;
        let functions = {
            let get_function_list = unsafe {
                library.get::<unsafe extern "C" fn(CK_FUNCTION_LIST_PTR_PTR) -> CK_RV>(
                    function_list_name.as_bytes(),
                )
            }?;
            let mut list: CK_FUNCTION_LIST_PTR = ptr::null_mut();
            check_rv(unsafe { get_function_list(&raw mut list) })?;
            if list.is_null() {
                return Err(P11Error::Default(format!(
                    "{function_list_name} returned a null function list"
                )));
            }
            let functions = unsafe { *list };
            functions
        };
        debug!(
            "Resolved function list of {path}, version {}.{}",
            functions.version.major, functions.version.minor
        );
        Ok(Self {
            path: path.to_owned(),
            functions,
            _library: Some(library),
        })
    }

    /// Wrap a function list that lives in this process.
    #[cfg(test)]
    pub(crate) fn from_function_list(path: &str, functions: CK_FUNCTION_LIST) -> Self {
        Self {
            path: path.to_owned(),
            functions,
            _library: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn output_bytes(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        function: unsafe extern "C" fn(
            CK_SESSION_HANDLE,
            CK_BYTE_PTR,
            CK_ULONG,
            CK_BYTE_PTR,
            CK_ULONG_PTR,
        ) -> CK_RV,
    ) -> P11Result<Vec<u8>> {
        let (p_data, data_len) = input(data)?;
        sized_output(|p_out, p_len| unsafe { function(session, p_data, data_len, p_out, p_len) })
    }

    fn output_final(
        &self,
        session: CK_SESSION_HANDLE,
        function: unsafe extern "C" fn(CK_SESSION_HANDLE, CK_BYTE_PTR, CK_ULONG_PTR) -> CK_RV,
    ) -> P11Result<Vec<u8>> {
        sized_output(|p_out, p_len| unsafe { function(session, p_out, p_len) })
    }
}

impl Pkcs11Api for NativeModule {
    fn initialize(&self, init_args: Option<&InitArgs>) -> P11Result<()> {
        let mut args = init_args.map(|init_args| CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: init_args.flags,
            pReserved: ptr::null_mut(),
        });
        let p_args: CK_VOID_PTR = args
            .as_mut()
            .map_or(ptr::null_mut(), |args| ptr::from_mut(args).cast());
        pkcs11_call!(self, C_Initialize, p_args)
    }

    fn finalize(&self) -> P11Result<()> {
        pkcs11_call!(self, C_Finalize, ptr::null_mut())
    }

    fn get_info(&self) -> P11Result<ModuleInfo> {
        let mut info = CK_INFO::default();
        pkcs11_call!(self, C_GetInfo, &raw mut info)?;
        Ok(info.into())
    }

    fn get_slot_list(&self, token_present: bool) -> P11Result<Vec<CK_SLOT_ID>> {
        let present: CK_BBOOL = if token_present { CK_TRUE } else { CK_FALSE };
        let mut count: CK_ULONG = 0;
        pkcs11_call!(self, C_GetSlotList, present, ptr::null_mut(), &raw mut count)?;
        let mut slots: Vec<CK_SLOT_ID> = vec![0; usize::try_from(count)?];
        pkcs11_call!(self, C_GetSlotList, present, slots.as_mut_ptr(), &raw mut count)?;
        slots.truncate(usize::try_from(count)?);
        Ok(slots)
    }

    fn get_slot_info(&self, slot_id: CK_SLOT_ID) -> P11Result<SlotInfo> {
        let mut info = CK_SLOT_INFO::default();
        pkcs11_call!(self, C_GetSlotInfo, slot_id, &raw mut info)?;
        Ok(info.into())
    }

    fn get_token_info(&self, slot_id: CK_SLOT_ID) -> P11Result<TokenInfo> {
        let mut info = CK_TOKEN_INFO::default();
        pkcs11_call!(self, C_GetTokenInfo, slot_id, &raw mut info)?;
        Ok(info.into())
    }

    fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> P11Result<Vec<CK_MECHANISM_TYPE>> {
        let mut count: CK_ULONG = 0;
        pkcs11_call!(self, C_GetMechanismList, slot_id, ptr::null_mut(), &raw mut count)?;
        let mut mechanisms: Vec<CK_MECHANISM_TYPE> = vec![0; usize::try_from(count)?];
        pkcs11_call!(
            self,
            C_GetMechanismList,
            slot_id,
            mechanisms.as_mut_ptr(),
            &raw mut count
        )?;
        mechanisms.truncate(usize::try_from(count)?);
        Ok(mechanisms)
    }

    fn get_mechanism_info(
        &self,
        slot_id: CK_SLOT_ID,
        mechanism: CK_MECHANISM_TYPE,
    ) -> P11Result<MechanismInfo> {
        let mut info = CK_MECHANISM_INFO::default();
        pkcs11_call!(self, C_GetMechanismInfo, slot_id, mechanism, &raw mut info)?;
        Ok(info.into())
    }

    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> P11Result<CK_SESSION_HANDLE> {
        let mut session: CK_SESSION_HANDLE = 0;
        pkcs11_call!(
            self,
            C_OpenSession,
            slot_id,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session
        )?;
        Ok(session)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        pkcs11_call!(self, C_CloseSession, session)
    }

    fn close_all_sessions(&self, slot_id: CK_SLOT_ID) -> P11Result<()> {
        pkcs11_call!(self, C_CloseAllSessions, slot_id)
    }

    fn get_session_info(&self, session: CK_SESSION_HANDLE) -> P11Result<SessionInfo> {
        let mut info = CK_SESSION_INFO::default();
        pkcs11_call!(self, C_GetSessionInfo, session, &raw mut info)?;
        Ok(info.into())
    }

    fn login(&self, session: CK_SESSION_HANDLE, user_type: UserType, pin: &[u8]) -> P11Result<()> {
        let (p_pin, pin_len) = input(pin)?;
        pkcs11_call!(
            self,
            C_Login,
            session,
            CK_USER_TYPE::from(user_type),
            p_pin,
            pin_len
        )
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        pkcs11_call!(self, C_Logout, session)
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let mut template = NativeTemplate::encode(template)?;
        let mut object: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_CreateObject,
            session,
            template.as_mut_ptr(),
            template.count()?,
            &raw mut object
        )?;
        Ok(object)
    }

    fn copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let mut template = NativeTemplate::encode(template)?;
        let mut copy: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_CopyObject,
            session,
            object,
            template.as_mut_ptr(),
            template.count()?,
            &raw mut copy
        )?;
        Ok(copy)
    }

    fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> P11Result<()> {
        pkcs11_call!(self, C_DestroyObject, session, object)
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> P11Result<Vec<Attribute>> {
        let function = function!(self, C_GetAttributeValue);
        let query = |raw: &mut [CK_ATTRIBUTE]| -> P11Result<()> {
            let count = CK_ULONG::try_from(raw.len())?;
            trace!("C_GetAttributeValue: object {object}, {count} attributes");
            tolerate_unavailable(unsafe { function(session, object, raw.as_mut_ptr(), count) })
        };
        let mut raw: Vec<CK_ATTRIBUTE> = types.iter().map(|&type_| empty_attribute(type_)).collect();
        // first pass: lengths only
        query(&mut raw)?;
        let mut values: Vec<Vec<u8>> = Vec::new();
        let mut nested: Vec<Vec<CK_ATTRIBUTE>> = Vec::new();
        for attribute in &mut raw {
            if attribute.ulValueLen == UNAVAILABLE_INFORMATION {
                attribute.ulValueLen = 0;
                continue;
            }
            let len = usize::try_from(attribute.ulValueLen)?;
            if value_kind(attribute.type_) == ValueKind::Template {
                let mut inner = vec![empty_attribute(0); len / size_of::<CK_ATTRIBUTE>()];
                attribute.pValue = inner.as_mut_ptr().cast();
                nested.push(inner);
            } else {
                let mut buffer = vec![0_u8; len];
                attribute.pValue = buffer.as_mut_ptr().cast();
                values.push(buffer);
            }
        }
        if !nested.is_empty() {
            // second pass: scalar values, plus types and lengths of nested entries
            query(&mut raw)?;
            for attribute in nested.iter_mut().flatten() {
                if attribute.ulValueLen == UNAVAILABLE_INFORMATION
                    || value_kind(attribute.type_) == ValueKind::Template
                {
                    attribute.ulValueLen = 0;
                    continue;
                }
                let mut buffer = vec![0_u8; usize::try_from(attribute.ulValueLen)?];
                attribute.pValue = buffer.as_mut_ptr().cast();
                values.push(buffer);
            }
        }
        let requested: Vec<CK_ULONG> = raw
            .iter()
            .chain(nested.iter().flatten())
            .map(|attribute| attribute.ulValueLen)
            .collect();
        // last pass: values
        query(&mut raw)?;
        for (attribute, requested) in raw
            .iter_mut()
            .chain(nested.iter_mut().flatten())
            .zip(requested)
        {
            if attribute.pValue.is_null() || attribute.ulValueLen == UNAVAILABLE_INFORMATION {
                attribute.pValue = ptr::null_mut();
                attribute.ulValueLen = 0;
            } else {
                attribute.ulValueLen = attribute.ulValueLen.min(requested);
            }
        }
        // SAFETY: every non-null pointer targets a buffer of `values` or `nested`
        // holding at least `ulValueLen` bytes
        unsafe { decode_native(&raw) }
    }

    fn set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<()> {
        let mut template = NativeTemplate::encode(template)?;
        pkcs11_call!(
            self,
            C_SetAttributeValue,
            session,
            object,
            template.as_mut_ptr(),
            template.count()?
        )
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> P11Result<()> {
        let mut template = NativeTemplate::encode(template)?;
        pkcs11_call!(
            self,
            C_FindObjectsInit,
            session,
            template.as_mut_ptr(),
            template.count()?
        )
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        max_count: usize,
    ) -> P11Result<Vec<CK_OBJECT_HANDLE>> {
        let mut handles: Vec<CK_OBJECT_HANDLE> = vec![0; max_count];
        let mut count: CK_ULONG = 0;
        pkcs11_call!(
            self,
            C_FindObjects,
            session,
            handles.as_mut_ptr(),
            CK_ULONG::try_from(max_count)?,
            &raw mut count
        )?;
        let count = usize::try_from(count)?;
        p11_ensure!(count <= max_count, "More objects returned than requested");
        handles.truncate(count);
        Ok(handles)
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        pkcs11_call!(self, C_FindObjectsFinal, session)
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        let mut mechanism = mechanism.to_native()?;
        pkcs11_call!(self, C_EncryptInit, session, mechanism.as_mut_ptr(), key)
    }

    fn encrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_Encrypt))
    }

    fn encrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_EncryptUpdate))
    }

    fn encrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        self.output_final(session, function!(self, C_EncryptFinal))
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        let mut mechanism = mechanism.to_native()?;
        pkcs11_call!(self, C_DecryptInit, session, mechanism.as_mut_ptr(), key)
    }

    fn decrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_Decrypt))
    }

    fn decrypt_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_DecryptUpdate))
    }

    fn decrypt_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        self.output_final(session, function!(self, C_DecryptFinal))
    }

    fn digest_init(&self, session: CK_SESSION_HANDLE, mechanism: &mut Mechanism) -> P11Result<()> {
        let mut mechanism = mechanism.to_native()?;
        pkcs11_call!(self, C_DigestInit, session, mechanism.as_mut_ptr())
    }

    fn digest(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_Digest))
    }

    fn digest_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        let (p_data, len) = input(data)?;
        pkcs11_call!(self, C_DigestUpdate, session, p_data, len)
    }

    fn digest_key(&self, session: CK_SESSION_HANDLE, key: CK_OBJECT_HANDLE) -> P11Result<()> {
        pkcs11_call!(self, C_DigestKey, session, key)
    }

    fn digest_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        self.output_final(session, function!(self, C_DigestFinal))
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        let mut mechanism = mechanism.to_native()?;
        pkcs11_call!(self, C_SignInit, session, mechanism.as_mut_ptr(), key)
    }

    fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        self.output_bytes(session, data, function!(self, C_Sign))
    }

    fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        let (p_data, len) = input(data)?;
        pkcs11_call!(self, C_SignUpdate, session, p_data, len)
    }

    fn sign_final(&self, session: CK_SESSION_HANDLE) -> P11Result<Vec<u8>> {
        self.output_final(session, function!(self, C_SignFinal))
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        let mut mechanism = mechanism.to_native()?;
        pkcs11_call!(self, C_VerifyInit, session, mechanism.as_mut_ptr(), key)
    }

    fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> P11Result<()> {
        let (p_data, data_len) = input(data)?;
        let (p_signature, signature_len) = input(signature)?;
        pkcs11_call!(
            self,
            C_Verify,
            session,
            p_data,
            data_len,
            p_signature,
            signature_len
        )
    }

    fn verify_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<()> {
        let (p_data, len) = input(data)?;
        pkcs11_call!(self, C_VerifyUpdate, session, p_data, len)
    }

    fn verify_final(&self, session: CK_SESSION_HANDLE, signature: &[u8]) -> P11Result<()> {
        let (p_signature, len) = input(signature)?;
        pkcs11_call!(self, C_VerifyFinal, session, p_signature, len)
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let mut mechanism = mechanism.to_native()?;
        let mut template = NativeTemplate::encode(template)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_GenerateKey,
            session,
            mechanism.as_mut_ptr(),
            template.as_mut_ptr(),
            template.count()?,
            &raw mut key
        )?;
        Ok(key)
    }

    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> P11Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let mut mechanism = mechanism.to_native()?;
        let mut public_template = NativeTemplate::encode(public_template)?;
        let mut private_template = NativeTemplate::encode(private_template)?;
        let mut public_key: CK_OBJECT_HANDLE = 0;
        let mut private_key: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_GenerateKeyPair,
            session,
            mechanism.as_mut_ptr(),
            public_template.as_mut_ptr(),
            public_template.count()?,
            private_template.as_mut_ptr(),
            private_template.count()?,
            &raw mut public_key,
            &raw mut private_key
        )?;
        Ok((public_key, private_key))
    }

    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<Vec<u8>> {
        let function = function!(self, C_WrapKey);
        let mut mechanism = mechanism.to_native()?;
        let p_mechanism = mechanism.as_mut_ptr();
        sized_output(|p_out, p_len| unsafe {
            function(session, p_mechanism, wrapping_key, key, p_out, p_len)
        })
    }

    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let mut mechanism = mechanism.to_native()?;
        let mut template = NativeTemplate::encode(template)?;
        let (p_wrapped, wrapped_len) = input(wrapped_key)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_UnwrapKey,
            session,
            mechanism.as_mut_ptr(),
            unwrapping_key,
            p_wrapped,
            wrapped_len,
            template.as_mut_ptr(),
            template.count()?,
            &raw mut key
        )?;
        Ok(key)
    }

    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let mut mechanism = mechanism.to_native()?;
        let mut template = NativeTemplate::encode(template)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        pkcs11_call!(
            self,
            C_DeriveKey,
            session,
            mechanism.as_mut_ptr(),
            base_key,
            template.as_mut_ptr(),
            template.count()?,
            &raw mut key
        )?;
        Ok(key)
    }

    fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> P11Result<()> {
        let (p_seed, len) = input(seed)?;
        pkcs11_call!(self, C_SeedRandom, session, p_seed, len)
    }

    fn generate_random(&self, session: CK_SESSION_HANDLE, len: usize) -> P11Result<Vec<u8>> {
        let mut bytes = vec![0_u8; len];
        pkcs11_call!(
            self,
            C_GenerateRandom,
            session,
            bytes.as_mut_ptr(),
            CK_ULONG::try_from(len)?
        )?;
        Ok(bytes)
    }
}

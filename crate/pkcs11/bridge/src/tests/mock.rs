//! An in-process module standing in for a native library.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE,
    CK_SLOT_ID, CKA_SENSITIVE, CKA_VALUE, CKM_AES_GCM, CKM_RSA_PKCS,
    CKM_SHA256, CKR_OK,
};

use crate::{
    Attribute, ErrorCode, InitArgs, Mechanism, ModuleInfo, ModuleLoader, P11Error, P11Result,
    Pkcs11Api, SessionInfo, UserType, Version, check_rv,
};

pub(super) const MOCK_SLOT: CK_SLOT_ID = 1;
pub(super) const MOCK_PIN: &[u8] = b"1234";
const XOR_KEY: u8 = 0x5A;

/// Observable effects of every mock module built by one loader.
#[derive(Debug, Default)]
pub(super) struct MockCounters {
    pub loads: AtomicUsize,
    pub initializations: AtomicUsize,
    pub finalizations: AtomicUsize,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_overlap: AtomicUsize,
    pub find_final_calls: AtomicUsize,
    /// Address of the parameter of the last mechanism an operation was
    /// started with, 0 if it had none
    pub last_parameter_address: AtomicUsize,
}

impl MockCounters {
    pub(super) fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub(super) fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }

    pub(super) fn find_final_calls(&self) -> usize {
        self.find_final_calls.load(Ordering::SeqCst)
    }

    pub(super) fn last_parameter_address(&self) -> Option<usize> {
        let address = self.last_parameter_address.load(Ordering::SeqCst);
        (address != 0).then_some(address)
    }
}

/// Counts a call as in flight until dropped.
struct InFlight<'a>(&'a MockCounters);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockState {
    next_handle: CK_SESSION_HANDLE,
    next_object: CK_OBJECT_HANDLE,
    sessions: BTreeMap<CK_SESSION_HANDLE, CK_FLAGS>,
    logged_in: bool,
    objects: BTreeMap<CK_OBJECT_HANDLE, Vec<Attribute>>,
    search: Option<Vec<CK_OBJECT_HANDLE>>,
    operation: Option<(CK_MECHANISM_TYPE, CK_OBJECT_HANDLE)>,
}

pub(super) struct MockModule {
    counters: Arc<MockCounters>,
    init_rv: CK_RV,
    call_delay: Duration,
    state: Mutex<MockState>,
}

impl MockModule {
    pub(super) fn new(counters: Arc<MockCounters>, init_rv: CK_RV, call_delay: Duration) -> Self {
        Self {
            counters,
            init_rv,
            call_delay,
            state: Mutex::new(MockState {
                next_handle: 1,
                next_object: 100,
                ..MockState::default()
            }),
        }
    }

    fn enter(&self) -> InFlight<'_> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_overlap.fetch_max(current, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            thread::sleep(self.call_delay);
        }
        InFlight(&self.counters)
    }

    fn state(&self) -> P11Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|e| P11Error::Default(format!("mock state poisoned: {e}")))
    }

    fn session(&self, session: CK_SESSION_HANDLE) -> P11Result<MutexGuard<'_, MockState>> {
        let state = self.state()?;
        if !state.sessions.contains_key(&session) {
            return Err(ErrorCode::SessionHandleInvalid.into());
        }
        Ok(state)
    }

    fn begin(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        let _call = self.enter();
        let native = mechanism.to_native()?;
        let address = native.raw().pParameter as usize;
        let mechanism_type = native.raw().mechanism;
        let mut state = self.session(session)?;
        if !state.objects.contains_key(&key) {
            return Err(ErrorCode::KeyHandleInvalid.into());
        }
        state.operation = Some((mechanism_type, key));
        self.counters
            .last_parameter_address
            .store(address, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        let mut state = self.session(session)?;
        state
            .operation
            .take()
            .map(|_| ())
            .ok_or_else(|| ErrorCode::OperationNotInitialized.into())
    }

    fn xor(data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ XOR_KEY).collect()
    }

    fn insert_object(state: &mut MockState, template: &[Attribute]) -> CK_OBJECT_HANDLE {
        let handle = state.next_object;
        state.next_object += 1;
        state.objects.insert(handle, template.to_vec());
        handle
    }
}

impl Pkcs11Api for MockModule {
    fn initialize(&self, _init_args: Option<&InitArgs>) -> P11Result<()> {
        let _call = self.enter();
        self.counters.initializations.fetch_add(1, Ordering::SeqCst);
        check_rv(self.init_rv)
    }

    fn finalize(&self) -> P11Result<()> {
        let _call = self.enter();
        self.counters.finalizations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_info(&self) -> P11Result<ModuleInfo> {
        let _call = self.enter();
        Ok(ModuleInfo {
            cryptoki_version: Version { major: 3, minor: 0 },
            manufacturer_id: "Cosmian".to_owned(),
            flags: 0,
            library_description: "In-process mock".to_owned(),
            library_version: Version { major: 1, minor: 2 },
        })
    }

    fn get_slot_list(&self, _token_present: bool) -> P11Result<Vec<CK_SLOT_ID>> {
        let _call = self.enter();
        Ok(vec![MOCK_SLOT])
    }

    fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> P11Result<Vec<CK_MECHANISM_TYPE>> {
        let _call = self.enter();
        if slot_id != MOCK_SLOT {
            return Err(ErrorCode::SlotIdInvalid.into());
        }
        Ok(vec![CKM_AES_GCM, CKM_RSA_PKCS, CKM_SHA256])
    }

    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> P11Result<CK_SESSION_HANDLE> {
        let _call = self.enter();
        if slot_id != MOCK_SLOT {
            return Err(ErrorCode::SlotIdInvalid.into());
        }
        let mut state = self.state()?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.sessions.insert(handle, flags);
        Ok(handle)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.state()?;
        state
            .sessions
            .remove(&session)
            .map(|_| ())
            .ok_or_else(|| ErrorCode::SessionHandleInvalid.into())
    }

    fn close_all_sessions(&self, _slot_id: CK_SLOT_ID) -> P11Result<()> {
        let _call = self.enter();
        self.state()?.sessions.clear();
        Ok(())
    }

    fn get_session_info(&self, session: CK_SESSION_HANDLE) -> P11Result<SessionInfo> {
        let _call = self.enter();
        let state = self.session(session)?;
        let flags = state.sessions.get(&session).copied().unwrap_or_default();
        Ok(SessionInfo {
            slot_id: MOCK_SLOT,
            state: 0,
            flags,
            device_error: 0,
        })
    }

    fn login(&self, session: CK_SESSION_HANDLE, _user_type: UserType, pin: &[u8]) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        if state.logged_in {
            return Err(ErrorCode::UserAlreadyLoggedIn.into());
        }
        if pin != MOCK_PIN {
            return Err(ErrorCode::PinIncorrect.into());
        }
        state.logged_in = true;
        Ok(())
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        if !state.logged_in {
            return Err(ErrorCode::UserNotLoggedIn.into());
        }
        state.logged_in = false;
        Ok(())
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        Ok(Self::insert_object(&mut state, template))
    }

    fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        state
            .objects
            .remove(&object)
            .map(|_| ())
            .ok_or_else(|| ErrorCode::ObjectHandleInvalid.into())
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> P11Result<Vec<Attribute>> {
        let _call = self.enter();
        let state = self.session(session)?;
        let attributes = state
            .objects
            .get(&object)
            .ok_or(P11Error::Pkcs11(ErrorCode::ObjectHandleInvalid))?;
        let sensitive = attributes
            .iter()
            .any(|a| a.attribute_type() == CKA_SENSITIVE && a.as_bool().unwrap_or(false));
        Ok(types
            .iter()
            .map(|&type_| {
                if type_ == CKA_VALUE && sensitive {
                    return Attribute::absent(type_);
                }
                attributes
                    .iter()
                    .find(|a| a.attribute_type() == type_)
                    .cloned()
                    .unwrap_or_else(|| Attribute::absent(type_))
            })
            .collect())
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, template: &[Attribute]) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        if state.search.is_some() {
            return Err(ErrorCode::OperationActive.into());
        }
        let found = state
            .objects
            .iter()
            .filter(|(_, attributes)| template.iter().all(|wanted| attributes.contains(wanted)))
            .map(|(handle, _)| *handle)
            .collect();
        state.search = Some(found);
        Ok(())
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        max_count: usize,
    ) -> P11Result<Vec<CK_OBJECT_HANDLE>> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        let search = state
            .search
            .as_mut()
            .ok_or(P11Error::Pkcs11(ErrorCode::OperationNotInitialized))?;
        let batch = search.len().min(max_count);
        Ok(search.drain(..batch).collect())
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> P11Result<()> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        self.counters.find_final_calls.fetch_add(1, Ordering::SeqCst);
        state
            .search
            .take()
            .map(|_| ())
            .ok_or_else(|| ErrorCode::OperationNotInitialized.into())
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        self.begin(session, mechanism, key)
    }

    fn encrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        let _call = self.enter();
        self.finish(session)?;
        Ok(Self::xor(data))
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        self.begin(session, mechanism, key)
    }

    fn decrypt(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        let _call = self.enter();
        self.finish(session)?;
        Ok(Self::xor(data))
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        self.begin(session, mechanism, key)
    }

    fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> P11Result<Vec<u8>> {
        let _call = self.enter();
        self.finish(session)?;
        Ok(Self::xor(data).into_iter().rev().collect())
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &mut Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> P11Result<()> {
        self.begin(session, mechanism, key)
    }

    fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> P11Result<()> {
        let _call = self.enter();
        self.finish(session)?;
        let expected: Vec<u8> = Self::xor(data).into_iter().rev().collect();
        if expected == signature {
            Ok(())
        } else {
            Err(ErrorCode::SignatureInvalid.into())
        }
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        _mechanism: &mut Mechanism,
        template: &[Attribute],
    ) -> P11Result<CK_OBJECT_HANDLE> {
        let _call = self.enter();
        let mut state = self.session(session)?;
        Ok(Self::insert_object(&mut state, template))
    }

    fn generate_random(&self, session: CK_SESSION_HANDLE, len: usize) -> P11Result<Vec<u8>> {
        let _call = self.enter();
        let _state = self.session(session)?;
        Ok((0..len).map(|i| u8::try_from(i % 251).unwrap_or_default()).collect())
    }
}

/// Builds [`MockModule`]s sharing one set of counters.
pub(super) struct MockLoader {
    pub counters: Arc<MockCounters>,
    pub init_rv: CK_RV,
    pub call_delay: Duration,
    /// Paths for which loading fails
    pub missing: Vec<String>,
}

impl MockLoader {
    pub(super) fn new() -> Self {
        Self::with_init_rv(CKR_OK)
    }

    pub(super) fn with_init_rv(init_rv: CK_RV) -> Self {
        Self {
            counters: Arc::new(MockCounters::default()),
            init_rv,
            call_delay: Duration::ZERO,
            missing: Vec::new(),
        }
    }

    pub(super) fn slow(mut self, call_delay: Duration) -> Self {
        self.call_delay = call_delay;
        self
    }
}

impl ModuleLoader for MockLoader {
    type Api = MockModule;

    fn load(&self, path: &str, _function_list_name: &str) -> P11Result<MockModule> {
        if self.missing.iter().any(|missing| missing == path) {
            return Err(P11Error::Default(format!("no such library: {path}")));
        }
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        // widen the window in which concurrent constructions could race
        thread::sleep(self.call_delay);
        Ok(MockModule::new(
            self.counters.clone(),
            self.init_rv,
            self.call_delay,
        ))
    }
}

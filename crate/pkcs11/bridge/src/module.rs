use std::{ops::Deref, sync::Arc};

use cosmian_pkcs11_sys::CK_SLOT_ID;

use crate::{ModuleInfo, P11Result, Pkcs11Api, Slot};

/// A connection to one PKCS#11 module, as handed out by the
/// [`ModuleRegistry`](crate::ModuleRegistry).
///
/// Whether calls are serialized is decided once, when the connection is
/// built, and never changes afterwards.
pub struct Pkcs11Module {
    path: String,
    function_list_name: String,
    serialized: bool,
    api: Box<dyn Pkcs11Api>,
}

impl Pkcs11Module {
    pub(crate) fn new(
        path: &str,
        function_list_name: &str,
        serialized: bool,
        api: Box<dyn Pkcs11Api>,
    ) -> Self {
        Self {
            path: path.to_owned(),
            function_list_name: function_list_name.to_owned(),
            serialized,
            api,
        }
    }

    /// Native library path; the registry key of this connection.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn function_list_name(&self) -> &str {
        &self.function_list_name
    }

    /// Whether every call goes through the serializing decorator.
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        self.serialized
    }

    #[must_use]
    pub fn api(&self) -> &dyn Pkcs11Api {
        self.api.as_ref()
    }

    pub fn info(&self) -> P11Result<ModuleInfo> {
        self.api.get_info()
    }

    /// Enumerate the slots of the module, optionally only those holding a
    /// token. The list is queried anew on every call.
    pub fn slots(self: &Arc<Self>, token_present: bool) -> P11Result<Vec<Slot>> {
        Ok(self
            .api
            .get_slot_list(token_present)?
            .into_iter()
            .map(|slot_id| Slot::new(self.clone(), slot_id))
            .collect())
    }

    /// A slot by identifier. Nothing is checked until the slot is used.
    #[must_use]
    pub fn slot(self: &Arc<Self>, slot_id: CK_SLOT_ID) -> Slot {
        Slot::new(self.clone(), slot_id)
    }
}

impl Deref for Pkcs11Module {
    type Target = dyn Pkcs11Api;

    fn deref(&self) -> &Self::Target {
        self.api.as_ref()
    }
}

impl std::fmt::Debug for Pkcs11Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Module")
            .field("path", &self.path)
            .field("function_list_name", &self.function_list_name)
            .field("serialized", &self.serialized)
            .finish_non_exhaustive()
    }
}

//! Process-wide deduplication of module connections.
//!
//! A [`ModuleRegistry`] holds at most one [`Pkcs11Module`] per library path
//! and performs the native initialize call at most once per path. The map lock
//! is only held to find or insert the per-path cell; construction happens
//! inside that cell, so connecting to distinct paths never contends while
//! concurrent connections to the same new path wait for a single construction.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info, warn};

use crate::{
    ErrorCode, InitArgs, ModuleConfig, NativeModule, P11Error, P11Result, Pkcs11Api,
    Pkcs11Module, Synchronized, requires_serialization,
};

/// Builds the raw call surface of a module from its path.
pub trait ModuleLoader: Send + Sync {
    type Api: Pkcs11Api + 'static;

    fn load(&self, path: &str, function_list_name: &str) -> P11Result<Self::Api>;
}

/// Loads modules as shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    type Api = NativeModule;

    fn load(&self, path: &str, function_list_name: &str) -> P11Result<NativeModule> {
        NativeModule::load(path, function_list_name)
    }
}

type ModuleCell = Arc<OnceCell<Arc<Pkcs11Module>>>;

pub struct ModuleRegistry<L: ModuleLoader = NativeLoader> {
    loader: L,
    modules: Mutex<HashMap<String, ModuleCell>>,
}

static GLOBAL: Lazy<ModuleRegistry<NativeLoader>> =
    Lazy::new(|| ModuleRegistry::new(NativeLoader));

impl ModuleRegistry<NativeLoader> {
    /// The registry shared by the whole process.
    pub fn global() -> &'static Self {
        &GLOBAL
    }
}

impl<L: ModuleLoader> ModuleRegistry<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            modules: Mutex::new(HashMap::new()),
        }
    }

    fn modules(&self) -> P11Result<MutexGuard<'_, HashMap<String, ModuleCell>>> {
        self.modules
            .lock()
            .map_err(|e| P11Error::Default(format!("Failed to acquire the registry lock: {e}")))
    }

    /// Return the connection to the module at `path`, building it on first
    /// use.
    ///
    /// On a cache hit every argument other than `path` is ignored and the
    /// existing connection is returned as is.
    ///
    /// When built, the connection is wrapped in [`Synchronized`] unless
    /// `init_args` asserts `CKF_OS_LOCKING_OK`, then initialized unless
    /// `omit_initialize` is set. `CKR_CRYPTOKI_ALREADY_INITIALIZED` is
    /// absorbed. Any other initialize failure is returned to this caller, but
    /// the connection stays registered: later calls get it back without a new
    /// initialize attempt. A load failure registers nothing.
    pub fn connect(
        &self,
        path: &str,
        function_list_name: &str,
        init_args: Option<&InitArgs>,
        omit_initialize: bool,
    ) -> P11Result<Arc<Pkcs11Module>> {
        let cell = self.modules()?.entry(path.to_owned()).or_default().clone();

        let mut init_error = None;
        let mut built = false;
        let module = cell.get_or_try_init(|| {
            built = true;
            self.build(path, function_list_name, init_args, omit_initialize)
                .map(|(module, error)| {
                    init_error = error;
                    Arc::new(module)
                })
        });
        let module = match module {
            Ok(module) => module.clone(),
            Err(e) => {
                self.forget_empty(path, &cell)?;
                return Err(e);
            }
        };
        if let Some(e) = init_error {
            return Err(e);
        }
        if !built {
            debug!("PKCS#11 module {path}: reusing the existing connection");
            let serialized = requires_serialization(init_args);
            if module.is_serialized() != serialized {
                warn!(
                    "PKCS#11 module {path} is already connected with serialized calls = {}; the \
                     requested locking mode is ignored",
                    module.is_serialized()
                );
            }
            if module.function_list_name() != function_list_name {
                warn!(
                    "PKCS#11 module {path} is already connected through {}; {function_list_name} \
                     is ignored",
                    module.function_list_name()
                );
            }
        }
        Ok(module)
    }

    /// Connect using a [`ModuleConfig`].
    pub fn connect_with(&self, config: &ModuleConfig) -> P11Result<Arc<Pkcs11Module>> {
        let init_args = config.init_args();
        self.connect(
            &config.library_path,
            &config.function_list_name,
            Some(&init_args),
            config.omit_initialize,
        )
    }

    fn build(
        &self,
        path: &str,
        function_list_name: &str,
        init_args: Option<&InitArgs>,
        omit_initialize: bool,
    ) -> P11Result<(Pkcs11Module, Option<P11Error>)> {
        let api = self.loader.load(path, function_list_name)?;
        let serialized = requires_serialization(init_args);
        let api: Box<dyn Pkcs11Api> = if serialized {
            info!("PKCS#11 module {path}: OS locking not asserted, serializing calls");
            Box::new(Synchronized::new(api))
        } else {
            debug!("PKCS#11 module {path}: OS locking asserted, calls are not serialized");
            Box::new(api)
        };
        let module = Pkcs11Module::new(path, function_list_name, serialized, api);
        if omit_initialize {
            debug!("PKCS#11 module {path}: initialize omitted");
            return Ok((module, None));
        }
        let error = match module.initialize(init_args) {
            Ok(()) => {
                info!("PKCS#11 module {path} initialized");
                None
            }
            Err(e) if e.is(ErrorCode::CryptokiAlreadyInitialized) => {
                info!("PKCS#11 module {path} was already initialized");
                None
            }
            Err(e) => {
                warn!("PKCS#11 module {path}: initialize failed: {e}");
                Some(e)
            }
        };
        Ok((module, error))
    }

    /// Drop the registry entry of a path whose construction failed, so a
    /// later call may try again.
    fn forget_empty(&self, path: &str, cell: &ModuleCell) -> P11Result<()> {
        let mut modules = self.modules()?;
        if modules
            .get(path)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && current.get().is_none())
        {
            modules.remove(path);
        }
        Ok(())
    }

    /// The connection registered for `path`, if any.
    pub fn lookup(&self, path: &str) -> P11Result<Option<Arc<Pkcs11Module>>> {
        Ok(self
            .modules()?
            .get(path)
            .and_then(|cell| cell.get().cloned()))
    }

    /// Paths of the registered connections.
    pub fn paths(&self) -> P11Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .modules()?
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Unregister the connection to `path` and finalize it.
    ///
    /// Returns `false` if no connection was registered, or if it is still
    /// being connected by another caller. Clones of the
    /// connection held elsewhere remain usable as objects, but the module
    /// behind them is finalized. A module that reports it was not initialized
    /// is torn down without error.
    pub fn teardown(&self, path: &str) -> P11Result<bool> {
        let module = {
            let mut modules = self.modules()?;
            let Some(module) = modules.get(path).and_then(|cell| cell.get().cloned()) else {
                // a connection still being built stays registered
                return Ok(false);
            };
            modules.remove(path);
            module
        };
        match module.finalize() {
            Ok(()) => info!("PKCS#11 module {path} finalized"),
            Err(e) if e.is(ErrorCode::CryptokiNotInitialized) => {
                debug!("PKCS#11 module {path} was not initialized");
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }
}

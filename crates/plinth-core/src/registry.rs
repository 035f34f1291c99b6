//! In-process driver modules.
//!
//! [`StaticRuntime`] resolves a driver file to a module registered under the
//! file's stem, so drivers written in Rust can go through the same loading
//! path as process-hosted ones. Embedders and tests use it in place of
//! [`crate::process::ProcessRuntime`].

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use plinth_plugin_sdk::{CallArgs, CallError, Driver, Signature};
use serde_json::Value;
use tracing::debug;

use crate::{
    error::RuntimeError,
    plugin::{DriverClass, DriverModule, DriverRuntime},
};

type Constructor = dyn Fn(Vec<Value>) -> Result<Box<dyn Driver>, CallError>;

#[derive(Clone)]
struct StaticClass {
    signature: Signature,
    constructor: Rc<Constructor>,
}

#[derive(Clone, Default)]
enum StaticModule {
    #[default]
    Empty,
    Classes(BTreeMap<String, StaticClass>),
    Broken(String),
}

pub struct StaticRuntime {
    extension: String,
    modules: BTreeMap<String, StaticModule>,
    last_search_path: RefCell<Option<Vec<PathBuf>>>,
}

impl Default for StaticRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticRuntime {
    pub const EXTENSION: &'static str = "rs";

    pub fn new() -> Self {
        Self {
            extension: Self::EXTENSION.to_string(),
            modules: BTreeMap::new(),
            last_search_path: RefCell::new(None),
        }
    }

    /// Registers `class` in `module`; the constructor receives its arguments
    /// bound against `signature`.
    pub fn register_class<F>(
        mut self,
        module: impl Into<String>,
        class: impl Into<String>,
        signature: Signature,
        constructor: F,
    ) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Box<dyn Driver>, CallError> + 'static,
    {
        let entry = self.modules.entry(module.into()).or_default();
        if !matches!(entry, StaticModule::Classes(_)) {
            *entry = StaticModule::Classes(BTreeMap::new());
        }
        if let StaticModule::Classes(classes) = entry {
            classes.insert(
                class.into(),
                StaticClass {
                    signature,
                    constructor: Rc::new(constructor),
                },
            );
        }
        self
    }

    /// Registers a module with no classes at all.
    pub fn register_module(mut self, module: impl Into<String>) -> Self {
        self.modules.entry(module.into()).or_default();
        self
    }

    /// Registers a module whose execution fails with `message`.
    pub fn register_broken_module(
        mut self,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.modules
            .insert(module.into(), StaticModule::Broken(message.into()));
        self
    }

    /// Search path handed to the most recent `load_module` call.
    pub fn last_search_path(&self) -> Option<Vec<PathBuf>> {
        self.last_search_path.borrow().clone()
    }
}

impl DriverRuntime for StaticRuntime {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn load_module(
        &self,
        source: &Path,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn DriverModule>, RuntimeError> {
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        *self.last_search_path.borrow_mut() = Some(search_path.to_vec());
        debug!(module = %name, "resolving registered driver module");

        match self.modules.get(&name) {
            None => Err(RuntimeError::Module {
                module: name,
                message: "no module registered under this name".into(),
            }),
            Some(StaticModule::Broken(message)) => Err(RuntimeError::Module {
                module: name,
                message: message.clone(),
            }),
            Some(StaticModule::Empty) => Ok(Box::new(Registered(BTreeMap::new()))),
            Some(StaticModule::Classes(classes)) => Ok(Box::new(Registered(classes.clone()))),
        }
    }
}

struct Registered(BTreeMap<String, StaticClass>);

impl DriverModule for Registered {
    fn class(&self, name: &str) -> Option<Box<dyn DriverClass>> {
        self.0
            .get(name)
            .map(|class| Box::new(class.clone()) as Box<dyn DriverClass>)
    }
}

impl DriverClass for StaticClass {
    fn construct(&self, args: CallArgs) -> Result<Box<dyn Driver>, CallError> {
        let bound = self.signature.bind("__init__", &args)?;
        (self.constructor)(bound)
    }
}

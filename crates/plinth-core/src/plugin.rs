use std::path::{Path, PathBuf};

use plinth_plugin_sdk::{CallArgs, CallError, Driver};

use crate::error::RuntimeError;

/// Turns a driver source file into loadable classes.
///
/// This is the only place where dynamic loading happens; everything past it
/// works against [`Driver`].
pub trait DriverRuntime {
    /// Extension of driver source files, without the dot.
    fn extension(&self) -> &str;

    /// Executes the module at `source` with `search_path` as its module
    /// resolution order.
    fn load_module(
        &self,
        source: &Path,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn DriverModule>, RuntimeError>;
}

/// An executed driver module.
pub trait DriverModule {
    fn class(&self, name: &str) -> Option<Box<dyn DriverClass>>;
}

/// A driver class that can be instantiated.
pub trait DriverClass {
    /// Calls the constructor; a wrong argument shape must come back as
    /// [`CallError::Mismatch`].
    fn construct(&self, args: CallArgs) -> Result<Box<dyn Driver>, CallError>;
}

impl<R: DriverRuntime + ?Sized> DriverRuntime for Box<R> {
    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn load_module(
        &self,
        source: &Path,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn DriverModule>, RuntimeError> {
        (**self).load_module(source, search_path)
    }
}

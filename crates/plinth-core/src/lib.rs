//! Core of the plinth driver harness: manifest validation, dependency path
//! resolution, scoped driver loading, capability conformance and the
//! invocation adapter.

pub mod config;
pub mod conformance;
pub mod deps;
pub mod document;
pub mod error;
pub mod invoke;
pub mod loader;
pub mod plugin;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod search_path;

pub use config::Config;
pub use error::{InvokeError, LoadError, RuntimeError};
pub use invoke::{inventory_list, invoke, probe, Convention, InventoryItem, Invocation, ProbeReport};
pub use loader::{DriverLoader, LoadedPlugin};
pub use process::ProcessRuntime;
pub use registry::StaticRuntime;
pub use schema::{ManifestValidator, ValidationReport};
pub use search_path::{SearchPath, SearchPathGuard};

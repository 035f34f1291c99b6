//! Contract between the plinth harness and driver plugins: the manifest data
//! model, the [`Driver`] trait and the argument/error types used to call
//! driver methods.

pub mod call;
pub mod driver;
pub mod manifest;

pub use call::{CallArgs, CallError, Signature};
pub use driver::{Driver, IntegrationInstance, MethodTable, Target, INVENTORY_LIST, TEST_CONNECTION};
pub use manifest::{
    method_name, Capability, Category, DryRunPolicy, Entrypoint, PluginManifest,
    DEFAULT_ENTRYPOINT, INVENTORY_CAPABILITY,
};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::call::{CallArgs, CallError, Signature};

/// Connectivity check method, optional on every driver.
pub const TEST_CONNECTION: &str = "test_connection";
/// Inventory listing method, optional on every driver.
pub const INVENTORY_LIST: &str = "inventory_list";

/// A loaded driver, known only by the methods it exposes.
///
/// Implementations decide for themselves how arguments bind; a call whose
/// shape does not fit must fail with [`CallError::Mismatch`] so the host can
/// try its other calling conventions.
pub trait Driver {
    /// Names of every callable method.
    fn methods(&self) -> BTreeSet<String>;

    fn has_method(&self, name: &str) -> bool {
        self.methods().contains(name)
    }

    /// Calls `method`; `Ok(None)` means the method returned nothing.
    fn call(&mut self, method: &str, args: CallArgs) -> Result<Option<Value>, CallError>;
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn methods(&self) -> BTreeSet<String> {
        (**self).methods()
    }

    fn has_method(&self, name: &str) -> bool {
        (**self).has_method(name)
    }

    fn call(&mut self, method: &str, args: CallArgs) -> Result<Option<Value>, CallError> {
        (**self).call(method, args)
    }
}

type Handler = Box<dyn FnMut(Vec<Value>) -> Result<Option<Value>, CallError>>;

/// In-process driver assembled from closures, one per method.
///
/// Arguments are bound against each method's [`Signature`] before the handler
/// runs, so binding failures surface as [`CallError::Mismatch`].
#[derive(Default)]
pub struct MethodTable {
    methods: BTreeMap<String, (Signature, Handler)>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(mut self, name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: FnMut(Vec<Value>) -> Result<Option<Value>, CallError> + 'static,
    {
        self.methods
            .insert(name.into(), (signature, Box::new(handler)));
        self
    }
}

impl Driver for MethodTable {
    fn methods(&self) -> BTreeSet<String> {
        self.methods.keys().cloned().collect()
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn call(&mut self, method: &str, args: CallArgs) -> Result<Option<Value>, CallError> {
        let (signature, handler) = self
            .methods
            .get_mut(method)
            .ok_or_else(|| CallError::Failed(format!("driver has no method '{method}'")))?;
        let bound = signature.bind(method, &args)?;
        handler(bound)
    }
}

/// Reference to an external entity a capability acts upon.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: String,
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub attrs: Map<String, Value>,
    #[serde(default)]
    pub labels: Map<String, Value>,
}

impl Target {
    pub fn new(kind: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Identity and configuration handed to a driver constructor, matching what
/// the host platform passes for a configured integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationInstance {
    pub id: String,
    pub name: String,
    pub type_id: String,
    pub config: Map<String, Value>,
}

impl IntegrationInstance {
    pub const DEFAULT_ID: &'static str = "inst-TEST";
    pub const DEFAULT_NAME: &'static str = "Test Instance";
    pub const UNKNOWN_TYPE: &'static str = "unknown.type";

    /// Builds the context for a local run: the name comes from `config.name`
    /// when present and the type id from the manifest id.
    pub fn for_local_run(type_id: &str, config: Map<String, Value>) -> Self {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(Self::DEFAULT_NAME)
            .to_string();
        let type_id = if type_id.is_empty() {
            Self::UNKNOWN_TYPE
        } else {
            type_id
        };
        Self {
            id: Self::DEFAULT_ID.to_string(),
            name,
            type_id: type_id.to_string(),
            config,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

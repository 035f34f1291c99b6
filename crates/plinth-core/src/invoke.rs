//! Invocation adapter: calls capability methods, `test_connection` and
//! `inventory_list` on a loaded driver without knowing its exact parameter
//! lists.
//!
//! Capability methods are tried against a fixed ladder of [`Convention`]s.
//! Only a binding mismatch moves on to the next rung; an error raised by the
//! driver stops the ladder immediately.

use std::{fmt, time::Instant};

use plinth_plugin_sdk::{
    method_name, CallArgs, CallError, Driver, Target, INVENTORY_LIST, TEST_CONNECTION,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::InvokeError;

/// Argument shapes a capability method is tried with, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// `verb=, target=, options=, dry_run=`
    KeywordWithOptions,
    /// `(verb, target, options, dry_run)`
    PositionalWithOptions,
    /// `verb=, target=, dry_run=`
    Keyword,
    /// `(verb, target, dry_run)`
    Positional,
}

impl Convention {
    pub const ORDER: [Convention; 4] = [
        Convention::KeywordWithOptions,
        Convention::PositionalWithOptions,
        Convention::Keyword,
        Convention::Positional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Convention::KeywordWithOptions => "keyword_with_options",
            Convention::PositionalWithOptions => "positional_with_options",
            Convention::Keyword => "keyword",
            Convention::Positional => "positional",
        }
    }

    pub fn bind(self, verb: &str, target: &Value, options: &Value, dry_run: bool) -> CallArgs {
        let verb = Value::from(verb);
        let dry_run = Value::Bool(dry_run);
        match self {
            Convention::KeywordWithOptions => CallArgs::named([
                ("verb", verb),
                ("target", target.clone()),
                ("options", options.clone()),
                ("dry_run", dry_run),
            ]),
            Convention::PositionalWithOptions => {
                CallArgs::positional([verb, target.clone(), options.clone(), dry_run])
            }
            Convention::Keyword => CallArgs::named([
                ("verb", verb),
                ("target", target.clone()),
                ("dry_run", dry_run),
            ]),
            Convention::Positional => CallArgs::positional([verb, target.clone(), dry_run]),
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a capability invocation and the convention that bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub convention: Convention,
    pub result: Value,
}

/// Invokes the method backing `capability_id`.
pub fn invoke(
    driver: &mut dyn Driver,
    capability_id: &str,
    verb: &str,
    target: Option<&Target>,
    options: &Map<String, Value>,
    dry_run: bool,
) -> Result<Invocation, InvokeError> {
    let method = method_name(capability_id);
    if !driver.has_method(&method) {
        return Err(InvokeError::MethodMissing { method });
    }
    let target = target.map_or(Value::Null, Target::to_value);
    let options = Value::Object(options.clone());

    let mut last_mismatch = String::new();
    for convention in Convention::ORDER {
        let args = convention.bind(verb, &target, &options, dry_run);
        match driver.call(&method, args) {
            Ok(result) => {
                tracing::debug!(%method, %convention, "capability method bound");
                metrics::counter!(
                    "plinth_invocations_total",
                    "outcome" => "ok",
                    "convention" => convention.as_str()
                )
                .increment(1);
                return Ok(Invocation {
                    convention,
                    result: result.unwrap_or_else(|| json!({ "success": true })),
                });
            }
            Err(CallError::Mismatch(message)) => {
                tracing::debug!(%method, %convention, %message, "convention rejected");
                last_mismatch = message;
            }
            Err(CallError::Failed(message)) => {
                metrics::counter!("plinth_invocations_total", "outcome" => "error").increment(1);
                return Err(InvokeError::Action(message));
            }
        }
    }

    metrics::counter!("plinth_invocations_total", "outcome" => "unsupported").increment(1);
    Err(InvokeError::InvocationUnsupported {
        method,
        last_mismatch,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub status: String,
    pub latency_ms: u64,
    pub message: String,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} latency_ms={} msg={}",
            self.status, self.latency_ms, self.message
        )
    }
}

/// Runs `test_connection` if the driver has it.
///
/// Status, latency and message come from the driver's reply where present;
/// latency otherwise falls back to the measured call time. A driver without
/// the method reports status `unknown`.
pub fn probe(driver: &mut dyn Driver) -> Result<ProbeReport, InvokeError> {
    let started = Instant::now();
    let reply = if driver.has_method(TEST_CONNECTION) {
        driver
            .call(TEST_CONNECTION, CallArgs::new())
            .map_err(|err| InvokeError::Action(err.to_string()))?
    } else {
        tracing::warn!("driver has no test_connection method");
        None
    };
    let measured = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    metrics::histogram!("plinth_probe_latency_ms").record(measured as f64);

    let reply = match reply {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Ok(ProbeReport {
        status: reply
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        latency_ms: reply
            .get("latency_ms")
            .and_then(Value::as_u64)
            .unwrap_or(measured),
        message: reply
            .get("message")
            .filter(|value| !value.is_null())
            .map(display_value)
            .unwrap_or_default(),
    })
}

/// One entry of an inventory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub attrs: Map<String, Value>,
}

impl InventoryItem {
    /// Reads an item as drivers return it; `id` stands in for a missing
    /// `external_id` and the type defaults to the requested one.
    pub fn from_value(requested: &str, value: &Value) -> Option<Self> {
        let item = value.as_object()?;
        let text = |key: &str| {
            item.get(key)
                .filter(|value| !value.is_null())
                .map(display_value)
                .filter(|text| !text.is_empty())
        };
        Some(Self {
            kind: text("type").unwrap_or_else(|| requested.to_string()),
            external_id: text("external_id").or_else(|| text("id")),
            name: text("name"),
            attrs: item
                .get("attrs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} name={} attrs={}",
            self.kind,
            self.external_id.as_deref().unwrap_or(""),
            self.name.as_deref().unwrap_or(""),
            Value::Object(self.attrs.clone())
        )
    }
}

/// Calls `inventory_list(kind, active_only=…, options=…)`.
pub fn inventory_list(
    driver: &mut dyn Driver,
    kind: &str,
    active_only: bool,
    options: Option<&Map<String, Value>>,
) -> Result<Vec<InventoryItem>, InvokeError> {
    if !driver.has_method(INVENTORY_LIST) {
        return Err(InvokeError::MethodMissing {
            method: INVENTORY_LIST.to_string(),
        });
    }
    let args = CallArgs::positional([Value::from(kind)])
        .kwarg("active_only", Value::Bool(active_only))
        .kwarg("options", options.cloned().map_or(Value::Null, Value::Object));
    let reply = driver.call(INVENTORY_LIST, args).map_err(|err| match err {
        CallError::Mismatch(message) => InvokeError::InvocationUnsupported {
            method: INVENTORY_LIST.to_string(),
            last_mismatch: message,
        },
        CallError::Failed(message) => InvokeError::Action(message),
    })?;

    let entries = match reply {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(InvokeError::Action(format!(
                "inventory_list returned {other} instead of a list"
            )))
        }
    };
    let items: Vec<InventoryItem> = entries
        .iter()
        .filter_map(|entry| {
            let item = InventoryItem::from_value(kind, entry);
            if item.is_none() {
                tracing::warn!(%entry, "skipping inventory entry that is not a mapping");
            }
            item
        })
        .collect();
    metrics::counter!("plinth_inventory_items_total").increment(items.len() as u64);
    Ok(items)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

//! JSONL protocol spoken with process-hosted driver modules.
//!
//! The host writes one [`Request`] per line on the module's stdin and reads
//! one [`Reply`] per line from its stdout. The module process lives as long
//! as the driver instance it hosts; stderr is left to the terminal.
//!
//! ```text
//! > {"op":"describe"}
//! < {"status":"ok","value":{"classes":["Driver"]}}
//! > {"op":"construct","class":"Driver","args":[],"kwargs":{"instance":{..},"secrets":{..}}}
//! < {"status":"ok","value":{"methods":["test_connection","power_cycle"]}}
//! > {"op":"call","method":"power_cycle","args":["reboot",null,{},true],"kwargs":{}}
//! < {"status":"mismatch","message":"power_cycle() takes 3 positional arguments but 4 were given"}
//! ```

use std::collections::BTreeSet;

use plinth_plugin_sdk::{CallArgs, CallError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    /// Lists the classes the module defines.
    Describe,
    /// Instantiates `class`; the reply lists the instance's methods.
    Construct {
        class: &'a str,
        #[serde(flatten)]
        args: &'a CallArgs,
    },
    /// Calls a method on the constructed instance.
    Call {
        method: &'a str,
        #[serde(flatten)]
        args: &'a CallArgs,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        #[serde(default)]
        value: Value,
    },
    /// The arguments did not fit the callee's parameters.
    Mismatch { message: String },
    /// The callee raised.
    Error { message: String },
}

impl Reply {
    /// Converts the reply of a `construct` or `call` request.
    pub fn into_result(self) -> Result<Value, CallError> {
        match self {
            Reply::Ok { value } => Ok(value),
            Reply::Mismatch { message } => Err(CallError::Mismatch(message)),
            Reply::Error { message } => Err(CallError::Failed(message)),
        }
    }
}

/// Extracts a list of names (`classes` or `methods`) from a reply value.
pub fn names(value: &Value, key: &str) -> Option<BTreeSet<String>> {
    value
        .get(key)?
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn requests_serialize_flat() {
        let args = CallArgs::positional([json!("reboot")]).kwarg("dry_run", json!(true));
        let call = Request::Call {
            method: "power_cycle",
            args: &args,
        };
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "op": "call",
                "method": "power_cycle",
                "args": ["reboot"],
                "kwargs": { "dry_run": true }
            })
        );
        assert_eq!(
            serde_json::to_value(Request::Describe).unwrap(),
            json!({ "op": "describe" })
        );
    }

    #[test]
    fn replies_map_to_call_results() {
        let ok: Reply = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert_eq!(ok.into_result(), Ok(Value::Null));

        let mismatch: Reply =
            serde_json::from_str(r#"{"status":"mismatch","message":"bad shape"}"#).unwrap();
        assert!(mismatch.into_result().unwrap_err().is_mismatch());

        let error: Reply =
            serde_json::from_str(r#"{"status":"error","message":"boom"}"#).unwrap();
        assert_eq!(error.into_result(), Err(CallError::Failed("boom".into())));
    }

    #[test]
    fn names_require_string_lists() {
        let value = json!({ "methods": ["b", "a"], "classes": ["Driver", 3] });
        let methods = names(&value, "methods").unwrap();
        assert_eq!(methods.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(names(&value, "classes").is_none());
        assert!(names(&value, "missing").is_none());
    }
}

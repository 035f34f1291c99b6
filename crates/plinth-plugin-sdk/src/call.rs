use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Arguments of a single driver call: positional values followed by named ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallArgs {
    #[serde(rename = "args")]
    positional: Vec<Value>,
    #[serde(rename = "kwargs")]
    named: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self {
            positional: values.into_iter().collect(),
            named: Map::new(),
        }
    }

    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            positional: Vec::new(),
            named: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    pub fn positional_values(&self) -> &[Value] {
        &self.positional
    }

    pub fn named_values(&self) -> &Map<String, Value> {
        &self.named
    }
}

/// Failure reported by a driver method or constructor.
///
/// `Mismatch` means the arguments could not be bound to the callee's
/// parameters; callers may retry with another call shape. `Failed` is an error
/// raised by the driver itself and must be surfaced as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("{0}")]
    Mismatch(String),
    #[error("{0}")]
    Failed(String),
}

impl CallError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
    name: String,
    required: bool,
}

/// Parameter list of an in-process driver method, used to bind [`CallArgs`]
/// the way a dynamic call site would.
///
/// ```
/// use plinth_plugin_sdk::{CallArgs, Signature};
/// use serde_json::json;
///
/// let sig = Signature::new(["verb", "target"]).optional("dry_run");
/// let bound = sig
///     .bind("power_cycle", &CallArgs::positional([json!("reboot")]).kwarg("target", json!(null)))
///     .unwrap();
/// assert_eq!(bound, vec![json!("reboot"), json!(null), json!(null)]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Param>,
    positional_only: bool,
}

impl Signature {
    /// Signature whose parameters are all required.
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            params: names
                .into_iter()
                .map(|name| Param {
                    name: name.into(),
                    required: true,
                })
                .collect(),
            positional_only: false,
        }
    }

    /// Appends a parameter that binds to `null` when not supplied.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Rejects arguments passed by name.
    pub fn positional_only(mut self) -> Self {
        self.positional_only = true;
        self
    }

    /// Binds `args` to the parameter list, returning one value per parameter.
    pub fn bind(&self, method: &str, args: &CallArgs) -> Result<Vec<Value>, CallError> {
        let given = args.positional_values();
        if given.len() > self.params.len() {
            return Err(CallError::Mismatch(format!(
                "{method}() takes {} positional arguments but {} were given",
                self.params.len(),
                given.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = given.iter().cloned().map(Some).collect();
        slots.resize(self.params.len(), None);

        for (name, value) in args.named_values() {
            let Some(index) = self.params.iter().position(|p| &p.name == name) else {
                return Err(CallError::Mismatch(format!(
                    "{method}() got an unexpected keyword argument '{name}'"
                )));
            };
            if self.positional_only {
                return Err(CallError::Mismatch(format!(
                    "{method}() got positional-only argument '{name}' passed as keyword"
                )));
            }
            if slots[index].is_some() {
                return Err(CallError::Mismatch(format!(
                    "{method}() got multiple values for argument '{name}'"
                )));
            }
            slots[index] = Some(value.clone());
        }

        self.params
            .iter()
            .zip(slots)
            .map(|(param, slot)| match slot {
                Some(value) => Ok(value),
                None if !param.required => Ok(Value::Null),
                None => Err(CallError::Mismatch(format!(
                    "{method}() missing required argument: '{}'",
                    param.name
                ))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn four() -> Signature {
        Signature::new(["verb", "target", "options", "dry_run"])
    }

    #[test]
    fn binds_named_arguments_in_parameter_order() {
        let args = CallArgs::named([
            ("dry_run", json!(true)),
            ("verb", json!("reboot")),
            ("options", json!({})),
            ("target", json!(null)),
        ]);
        let bound = four().bind("power_cycle", &args).unwrap();
        assert_eq!(bound, vec![json!("reboot"), json!(null), json!({}), json!(true)]);
    }

    #[test]
    fn mixes_positional_and_named() {
        let sig = Signature::new(["type"])
            .optional("active_only")
            .optional("options");
        let args = CallArgs::positional([json!("site")]).kwarg("active_only", json!(true));
        let bound = sig.bind("inventory_list", &args).unwrap();
        assert_eq!(bound, vec![json!("site"), json!(true), json!(null)]);
    }

    #[rstest]
    #[case::too_many(CallArgs::positional([json!(1), json!(2), json!(3), json!(4), json!(5)]), "takes 4")]
    #[case::unknown(CallArgs::named([("bogus", json!(1))]), "unexpected keyword argument 'bogus'")]
    #[case::missing(CallArgs::positional([json!("reboot")]), "missing required argument: 'target'")]
    #[case::duplicate(
        CallArgs::positional([json!("reboot")]).kwarg("verb", json!("reboot")),
        "multiple values for argument 'verb'"
    )]
    fn reports_binding_mismatches(#[case] args: CallArgs, #[case] needle: &str) {
        let err = four().bind("power_cycle", &args).unwrap_err();
        assert!(err.is_mismatch());
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn positional_only_rejects_keywords() {
        let sig = four().positional_only();
        let named = CallArgs::named([
            ("verb", json!("reboot")),
            ("target", json!(null)),
            ("options", json!({})),
            ("dry_run", json!(false)),
        ]);
        assert!(sig.bind("power_cycle", &named).unwrap_err().is_mismatch());

        let positional = CallArgs::positional([json!("reboot"), json!(null), json!({}), json!(false)]);
        assert_eq!(sig.bind("power_cycle", &positional).unwrap().len(), 4);
    }

    #[test]
    fn call_args_serialize_as_args_and_kwargs() {
        let args = CallArgs::positional([json!("site")]).kwarg("active_only", json!(false));
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            json!({ "args": ["site"], "kwargs": { "active_only": false } })
        );
    }
}

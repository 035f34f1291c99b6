//! Manifest schema validation.
//!
//! The checks mirror the host platform's manifest schema. The engine that runs
//! them is pluggable and may be absent (the `schema` feature is off, or the
//! caller built a [`ManifestValidator`] without one); an absent engine yields
//! an explicit "validation unavailable" report, never a pass.

use serde::Serialize;
use serde_json::Value;

/// Message reported when no schema engine is available.
pub const UNAVAILABLE_MESSAGE: &str =
    "Schema validation unavailable. Build with the `schema` feature to enable manifest checks.";

/// Top-level fields every manifest must carry, in schema order.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "id",
    "name",
    "version",
    "min_core_version",
    "category",
    "schema",
    "capabilities",
    "driver",
];

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Dot-joined location, e.g. `capabilities.0.verbs`; empty for the root.
    pub path: String,
    pub message: String,
    /// Offending value (`null` for missing fields).
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn unavailable() -> Self {
        Self::from_errors(vec![FieldError {
            path: String::new(),
            message: UNAVAILABLE_MESSAGE.to_string(),
            value: Value::Null,
        }])
    }

    pub fn errors_at<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |err| err.path == path)
    }
}

/// Strategy that checks a manifest document and lists every violation.
pub trait SchemaEngine: Send + Sync {
    fn check(&self, manifest: &Value) -> Vec<FieldError>;
}

pub struct ManifestValidator {
    engine: Option<Box<dyn SchemaEngine>>,
}

impl ManifestValidator {
    pub fn new(engine: Option<Box<dyn SchemaEngine>>) -> Self {
        Self { engine }
    }

    pub fn unavailable() -> Self {
        Self::new(None)
    }

    pub fn validate(&self, manifest: &Value) -> ValidationReport {
        match &self.engine {
            Some(engine) => ValidationReport::from_errors(engine.check(manifest)),
            None => {
                tracing::warn!("manifest schema engine unavailable");
                ValidationReport::unavailable()
            }
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        #[cfg(feature = "schema")]
        let engine: Option<Box<dyn SchemaEngine>> = Some(Box::new(builtin::BuiltinSchema::new()));
        #[cfg(not(feature = "schema"))]
        let engine: Option<Box<dyn SchemaEngine>> = None;
        Self::new(engine)
    }
}

/// Validates with the default engine.
pub fn validate(manifest: &Value) -> ValidationReport {
    ManifestValidator::default().validate(manifest)
}

#[cfg(feature = "schema")]
pub use builtin::BuiltinSchema;

#[cfg(feature = "schema")]
mod builtin {
    use plinth_plugin_sdk::{Category, DryRunPolicy};
    use regex::Regex;
    use serde_json::{Map, Value};

    use super::{FieldError, SchemaEngine, REQUIRED_FIELDS};

    const SEMVER: &str = r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$";
    const PLUGIN_ID: &str = r"^[a-z][a-z0-9]*(?:\.[a-z][a-z0-9]*)*$";
    const CAPABILITY_ID: &str = r"^[a-z][a-z0-9_]*(?:\.[a-z][a-z0-9_]*)*$";
    const WORD: &str = r"^[a-z][a-z0-9_]*$";
    const ENTRYPOINT: &str = r"^[a-zA-Z_][a-zA-Z0-9_]*:[a-zA-Z_][a-zA-Z0-9_]*$";
    const NAME_MAX_CHARS: usize = 100;

    /// Regex-backed implementation of the host manifest schema.
    pub struct BuiltinSchema {
        semver: Regex,
        plugin_id: Regex,
        capability_id: Regex,
        word: Regex,
        entrypoint: Regex,
    }

    impl BuiltinSchema {
        pub fn new() -> Self {
            // Patterns are constants; failing to compile one is a programming error.
            let compile = |pattern: &str| Regex::new(pattern).expect("built-in schema pattern");
            Self {
                semver: compile(SEMVER),
                plugin_id: compile(PLUGIN_ID),
                capability_id: compile(CAPABILITY_ID),
                word: compile(WORD),
                entrypoint: compile(ENTRYPOINT),
            }
        }
    }

    impl Default for BuiltinSchema {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SchemaEngine for BuiltinSchema {
        fn check(&self, manifest: &Value) -> Vec<FieldError> {
            let mut walk = Walk::default();
            let Some(root) = walk.object("", manifest) else {
                return walk.errors;
            };

            walk.required("", root, &REQUIRED_FIELDS);
            for key in root.keys() {
                if !REQUIRED_FIELDS.contains(&key.as_str()) {
                    walk.push(
                        key,
                        format!("Additional properties are not allowed ('{key}' was unexpected)"),
                        &root[key],
                    );
                }
            }

            if let Some(id) = root.get("id") {
                walk.pattern("id", id, &self.plugin_id);
            }
            if let Some(name) = root.get("name") {
                walk.name("name", name);
            }
            for field in ["version", "min_core_version"] {
                if let Some(version) = root.get(field) {
                    if let Some(text) = walk.string(field, version) {
                        if !self.semver.is_match(text) {
                            walk.push(
                                field,
                                format!("'{text}' is not a valid semantic version"),
                                version,
                            );
                        }
                    }
                }
            }
            if let Some(category) = root.get("category") {
                walk.one_of("category", category, Category::ALL.map(Category::as_str));
            }
            if let Some(driver) = root.get("driver") {
                self.driver(&mut walk, driver);
            }
            if let Some(schema) = root.get("schema") {
                if let Some(schema) = walk.object("schema", schema) {
                    walk.required("schema", schema, &["connection"]);
                    if let Some(connection) = schema.get("connection") {
                        walk.object("schema.connection", connection);
                    }
                }
            }
            if let Some(capabilities) = root.get("capabilities") {
                self.capabilities(&mut walk, capabilities);
            }
            walk.errors
        }
    }

    impl BuiltinSchema {
        fn driver(&self, walk: &mut Walk, driver: &Value) {
            let Some(driver) = walk.object("driver", driver) else {
                return;
            };
            walk.required("driver", driver, &["entrypoint"]);
            if let Some(entrypoint) = driver.get("entrypoint") {
                walk.pattern("driver.entrypoint", entrypoint, &self.entrypoint);
            }
        }

        fn capabilities(&self, walk: &mut Walk, capabilities: &Value) {
            let Some(items) = walk.array("capabilities", capabilities) else {
                return;
            };
            for (index, item) in items.iter().enumerate() {
                let base = format!("capabilities.{index}");
                let Some(cap) = walk.object(&base, item) else {
                    continue;
                };
                walk.required(&base, cap, &["id", "verbs", "targets"]);
                if let Some(id) = cap.get("id") {
                    walk.pattern(&format!("{base}.id"), id, &self.capability_id);
                }
                for list in ["verbs", "targets"] {
                    let path = format!("{base}.{list}");
                    let Some(words) = cap.get(list).and_then(|value| walk.array(&path, value))
                    else {
                        continue;
                    };
                    for (i, word) in words.iter().enumerate() {
                        walk.pattern(&format!("{path}.{i}"), word, &self.word);
                    }
                }
                if let Some(policy) = cap.get("dry_run") {
                    walk.one_of(
                        &format!("{base}.dry_run"),
                        policy,
                        DryRunPolicy::ALL.map(DryRunPolicy::as_str),
                    );
                }
            }
        }
    }

    /// Accumulates violations while walking a document.
    #[derive(Default)]
    struct Walk {
        errors: Vec<FieldError>,
    }

    impl Walk {
        fn push(&mut self, path: &str, message: String, value: &Value) {
            self.errors.push(FieldError {
                path: path.to_string(),
                message,
                value: value.clone(),
            });
        }

        fn type_error(&mut self, path: &str, value: &Value, expected: &str) {
            self.push(path, format!("{value} is not of type '{expected}'"), value);
        }

        fn object<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v Map<String, Value>> {
            let object = value.as_object();
            if object.is_none() {
                self.type_error(path, value, "object");
            }
            object
        }

        /// Arrays here are always required to be non-empty.
        fn array<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v Vec<Value>> {
            match value.as_array() {
                None => {
                    self.type_error(path, value, "array");
                    None
                }
                Some(items) if items.is_empty() => {
                    self.push(path, "[] should be non-empty".to_string(), value);
                    None
                }
                Some(items) => Some(items),
            }
        }

        fn string<'v>(&mut self, path: &str, value: &'v Value) -> Option<&'v str> {
            let text = value.as_str();
            if text.is_none() {
                self.type_error(path, value, "string");
            }
            text
        }

        /// Missing fields are reported at the path they should have been found.
        fn required(&mut self, base: &str, object: &Map<String, Value>, fields: &[&str]) {
            for field in fields {
                if !object.contains_key(*field) {
                    let path = join(base, field);
                    self.push(
                        &path,
                        format!("'{field}' is a required property"),
                        &Value::Null,
                    );
                }
            }
        }

        fn pattern(&mut self, path: &str, value: &Value, pattern: &regex::Regex) {
            if let Some(text) = self.string(path, value) {
                if !pattern.is_match(text) {
                    self.push(
                        path,
                        format!("'{text}' does not match '{}'", pattern.as_str()),
                        value,
                    );
                }
            }
        }

        fn name(&mut self, path: &str, value: &Value) {
            if let Some(text) = self.string(path, value) {
                let chars = text.chars().count();
                if chars == 0 {
                    self.push(path, "'' should be non-empty".to_string(), value);
                } else if chars > NAME_MAX_CHARS {
                    self.push(
                        path,
                        format!("name is longer than {NAME_MAX_CHARS} characters"),
                        value,
                    );
                }
            }
        }

        fn one_of<const N: usize>(&mut self, path: &str, value: &Value, allowed: [&str; N]) {
            if let Some(text) = self.string(path, value) {
                if !allowed.contains(&text) {
                    self.push(
                        path,
                        format!("'{text}' is not one of {allowed:?}"),
                        value,
                    );
                }
            }
        }
    }

    fn join(base: &str, field: &str) -> String {
        if base.is_empty() {
            field.to_string()
        } else {
            format!("{base}.{field}")
        }
    }
}

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Entrypoint used when a manifest leaves `driver.entrypoint` unset or empty.
pub const DEFAULT_ENTRYPOINT: &str = "driver:Driver";

/// Capability id whose targets drive the inventory browser.
pub const INVENTORY_CAPABILITY: &str = "inventory.list";

/// On-disk manifest (`plugin.yaml`) located at the root of each plugin directory.
///
/// Deserialization is lenient so a driver can be loaded and exercised while
/// its manifest still has schema violations: nulls and mistyped sections read
/// as their defaults, and scalars stand in for strings. Strict checks live in
/// the schema validator.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PluginManifest {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub version: String,
    #[serde(deserialize_with = "lenient::string")]
    pub min_core_version: String,
    #[serde(deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(deserialize_with = "lenient::section")]
    pub driver: DriverSection,
    #[serde(deserialize_with = "lenient::section")]
    pub schema: SchemaSection,
    #[serde(deserialize_with = "lenient::capabilities")]
    pub capabilities: Vec<Capability>,
}

impl PluginManifest {
    /// Builds a manifest from an already parsed document.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Raw `module:Class` reference, falling back to [`DEFAULT_ENTRYPOINT`].
    pub fn entrypoint(&self) -> &str {
        self.driver
            .entrypoint
            .as_deref()
            .filter(|entry| !entry.is_empty())
            .unwrap_or(DEFAULT_ENTRYPOINT)
    }

    pub fn capability(&self, id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|cap| cap.id == id)
    }

    /// Target types listed by the `inventory.list` capability, sorted.
    pub fn inventory_targets(&self) -> BTreeSet<&str> {
        self.capabilities
            .iter()
            .filter(|cap| cap.id == INVENTORY_CAPABILITY)
            .flat_map(|cap| cap.targets.iter().map(String::as_str))
            .collect()
    }

    /// Capabilities that perform actions, i.e. everything but inventory listing.
    pub fn actions(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities
            .iter()
            .filter(|cap| cap.id != INVENTORY_CAPABILITY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DriverSection {
    #[serde(deserialize_with = "lenient::optional_string")]
    pub entrypoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SchemaSection {
    #[serde(deserialize_with = "lenient::section")]
    pub connection: ConnectionSchema,
}

/// Configuration fields a driver expects from the integration instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ConnectionSchema {
    #[serde(deserialize_with = "lenient::mapping")]
    pub properties: Map<String, Value>,
    #[serde(deserialize_with = "lenient::strings")]
    pub required: Vec<String>,
}

impl ConnectionSchema {
    /// Boolean properties with their optional title and default.
    pub fn boolean_fields(&self) -> impl Iterator<Item = BooleanField<'_>> {
        self.properties.iter().filter_map(|(name, prop)| {
            (prop.get("type").and_then(Value::as_str) == Some("boolean")).then(|| BooleanField {
                name,
                title: prop.get("title").and_then(Value::as_str).unwrap_or(name),
                default: prop.get("default").and_then(Value::as_bool),
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BooleanField<'a> {
    pub name: &'a str,
    pub title: &'a str,
    pub default: Option<bool>,
}

/// One declared unit of driver functionality.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Capability {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::strings")]
    pub verbs: Vec<String>,
    #[serde(deserialize_with = "lenient::strings")]
    pub targets: Vec<String>,
    #[serde(deserialize_with = "lenient::optional_string")]
    pub dry_run: Option<String>,
}

impl Capability {
    pub fn new<V, T>(id: impl Into<String>, verbs: V, targets: T) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            id: id.into(),
            verbs: verbs.into_iter().map(Into::into).collect(),
            targets: targets.into_iter().map(Into::into).collect(),
            dry_run: None,
        }
    }

    /// Driver method expected to implement this capability.
    pub fn method_name(&self) -> String {
        method_name(&self.id)
    }

    /// Declared dry-run policy; absent or unrecognised values read as optional.
    pub fn dry_run_policy(&self) -> DryRunPolicy {
        self.dry_run
            .as_deref()
            .and_then(|policy| policy.parse().ok())
            .unwrap_or_default()
    }
}

/// Maps a dotted capability id to its driver method name (`power.cycle` -> `power_cycle`).
pub fn method_name(capability_id: &str) -> String {
    capability_id.replace('.', "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunPolicy {
    Required,
    #[default]
    Optional,
    Unsupported,
}

impl DryRunPolicy {
    pub const ALL: [DryRunPolicy; 3] = [Self::Required, Self::Optional, Self::Unsupported];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for DryRunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DryRunPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Plugin category as understood by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    HostOrchestrator,
    UpsManagement,
    PowerControl,
    NetworkDevice,
    SmartHome,
    Monitoring,
    Notification,
    Storage,
    Compute,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Self::HostOrchestrator,
        Self::UpsManagement,
        Self::PowerControl,
        Self::NetworkDevice,
        Self::SmartHome,
        Self::Monitoring,
        Self::Notification,
        Self::Storage,
        Self::Compute,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostOrchestrator => "host-orchestrator",
            Self::UpsManagement => "ups-management",
            Self::PowerControl => "power-control",
            Self::NetworkDevice => "network-device",
            Self::SmartHome => "smart-home",
            Self::Monitoring => "monitoring",
            Self::Notification => "notification",
            Self::Storage => "storage",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value `{0}`")]
pub struct UnknownVariant(pub String);

/// Parsed `module:Class` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    pub module: String,
    pub class: String,
}

impl FromStr for Entrypoint {
    type Err = MalformedEntrypoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(module), Some(class), None) if !module.is_empty() && !class.is_empty() => {
                Ok(Self {
                    module: module.to_string(),
                    class: class.to_string(),
                })
            }
            _ => Err(MalformedEntrypoint(s.to_string())),
        }
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entrypoint `{0}` is not of the form `module:Class`")]
pub struct MalformedEntrypoint(pub String);

/// Field deserializers that never reject a value of the wrong shape.
mod lenient {
    use serde::{de::DeserializeOwned, Deserialize, Deserializer};
    use serde_json::{Map, Value};

    use super::Capability;

    /// Strings pass through; numbers and booleans are written out.
    fn scalar(value: Value) -> Option<String> {
        match value {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(scalar(Value::deserialize(deserializer)?).unwrap_or_default())
    }

    pub fn optional_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(scalar(Value::deserialize(deserializer)?))
    }

    /// A list of scalars; a lone scalar reads as a one-element list.
    pub fn strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items.into_iter().filter_map(scalar).collect(),
            other => scalar(other).into_iter().collect(),
        })
    }

    pub fn mapping<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Map<String, Value>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }

    pub fn section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(serde_json::from_value(Value::deserialize(deserializer)?).unwrap_or_default())
    }

    /// Entries that are not mappings are dropped.
    pub fn capabilities<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Capability>, D::Error> {
        let Value::Array(entries) = Value::deserialize(deserializer)? else {
            return Ok(Vec::new());
        };
        Ok(entries
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn lenient_manifest_fills_defaults() {
        let manifest = PluginManifest::from_value(json!({
            "id": "acme.ups",
            "capabilities": [{ "id": "power.cycle", "verbs": ["reboot"] }]
        }))
        .unwrap();
        assert_eq!(manifest.entrypoint(), DEFAULT_ENTRYPOINT);
        assert!(manifest.capabilities[0].targets.is_empty());
        assert_eq!(
            manifest.capabilities[0].dry_run_policy(),
            DryRunPolicy::Optional
        );
    }

    #[test]
    fn null_driver_section_falls_back_to_default_entrypoint() {
        let manifest = PluginManifest::from_value(json!({
            "id": "acme.ups",
            "driver": null,
            "schema": { "connection": null },
        }))
        .unwrap();
        assert_eq!(manifest.entrypoint(), DEFAULT_ENTRYPOINT);
        assert!(manifest.schema.connection.required.is_empty());

        let manifest =
            PluginManifest::from_value(json!({ "driver": { "entrypoint": null } })).unwrap();
        assert_eq!(manifest.entrypoint(), DEFAULT_ENTRYPOINT);
    }

    #[test]
    fn scalar_identity_fields_are_stringified() {
        let manifest = PluginManifest::from_value(json!({
            "id": 42,
            "version": 1.0,
            "min_core_version": 2,
            "category": ["power"],
            "capabilities": [
                "power.cycle",
                { "id": "power.cycle", "verbs": "reboot", "targets": [1, null], "dry_run": true },
            ],
        }))
        .unwrap();
        assert_eq!(manifest.id, "42");
        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.min_core_version, "2");
        assert_eq!(manifest.category, "");
        assert_eq!(manifest.capabilities.len(), 1);
        let cap = &manifest.capabilities[0];
        assert_eq!(cap.verbs, vec!["reboot"]);
        assert_eq!(cap.targets, vec!["1"]);
        assert_eq!(cap.dry_run.as_deref(), Some("true"));
        assert_eq!(cap.dry_run_policy(), DryRunPolicy::Optional);
    }

    #[test]
    fn empty_entrypoint_falls_back_to_default() {
        let mut manifest = PluginManifest::default();
        manifest.driver.entrypoint = Some(String::new());
        assert_eq!(manifest.entrypoint(), "driver:Driver");
    }

    #[test]
    fn capability_method_name_joins_segments() {
        let cap = Capability::new("vm.snapshot.create", ["create"], ["vm"]);
        assert_eq!(cap.method_name(), "vm_snapshot_create");
    }

    #[rstest]
    #[case("driver:Driver", Some(("driver", "Driver")))]
    #[case("unifi_driver:UniFiDriver", Some(("unifi_driver", "UniFiDriver")))]
    #[case("driver", None)]
    #[case("driver:", None)]
    #[case(":Driver", None)]
    #[case("a:b:c", None)]
    fn entrypoint_parsing(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = raw.parse::<Entrypoint>().ok();
        let parts = parsed
            .as_ref()
            .map(|entry| (entry.module.as_str(), entry.class.as_str()));
        assert_eq!(parts, expected);
    }

    #[test]
    fn inventory_targets_only_come_from_inventory_capability() {
        let manifest = PluginManifest {
            capabilities: vec![
                Capability::new("inventory.list", ["list"], ["site", "device"]),
                Capability::new("power.cycle", ["reboot"], ["host"]),
            ],
            ..Default::default()
        };
        let targets: Vec<_> = manifest.inventory_targets().into_iter().collect();
        assert_eq!(targets, vec!["device", "site"]);
        let actions: Vec<_> = manifest.actions().map(|cap| cap.id.as_str()).collect();
        assert_eq!(actions, vec!["power.cycle"]);
    }

    #[test]
    fn boolean_fields_carry_title_and_default() {
        let schema: ConnectionSchema = serde_json::from_value(json!({
            "required": ["hostname"],
            "properties": {
                "hostname": { "type": "string" },
                "verify_tls": { "type": "boolean", "title": "Verify TLS", "default": true },
                "legacy": { "type": "boolean" }
            }
        }))
        .unwrap();
        let fields: Vec<_> = schema.boolean_fields().collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "legacy");
        assert_eq!(fields[0].title, "legacy");
        assert_eq!(fields[0].default, None);
        assert_eq!(fields[1].title, "Verify TLS");
        assert_eq!(fields[1].default, Some(true));
    }

    #[test]
    fn category_parses_kebab_case() {
        assert_eq!(
            "ups-management".parse::<Category>(),
            Ok(Category::UpsManagement)
        );
        assert!("toaster".parse::<Category>().is_err());
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use plinth_plugin_sdk::{CallArgs, Driver, Entrypoint, IntegrationInstance, PluginManifest};
use serde_json::{Map, Value};

use crate::{
    deps, document,
    error::LoadError,
    plugin::DriverRuntime,
    search_path::SearchPath,
};

pub const DEFAULT_MANIFEST_FILE: &str = "plugin.yaml";

/// A constructed driver together with the manifest it was loaded from.
pub struct LoadedPlugin {
    pub driver: Box<dyn Driver>,
    pub manifest: PluginManifest,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("manifest", &self.manifest.id)
            .field("methods", &self.driver.methods())
            .finish()
    }
}

/// Loads plugin directories through a [`DriverRuntime`].
pub struct DriverLoader<R> {
    runtime: R,
    search_path: Arc<SearchPath>,
    manifest_file: String,
}

impl<R: DriverRuntime> DriverLoader<R> {
    /// Loader bound to the process-wide search list.
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            search_path: SearchPath::global(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }

    pub fn with_search_path(mut self, search_path: Arc<SearchPath>) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn with_manifest_file(mut self, name: impl Into<String>) -> Self {
        self.manifest_file = name.into();
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn manifest_path(&self, plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(&self.manifest_file)
    }

    /// Reads the manifest as a raw mapping, for schema validation.
    pub fn read_manifest_document(&self, plugin_dir: &Path) -> Result<Value, LoadError> {
        let path = self.manifest_path(plugin_dir);
        if !path.is_file() {
            return Err(LoadError::ManifestMissing { path });
        }
        let invalid = |message: String| LoadError::ManifestInvalid {
            path: path.clone(),
            message,
        };
        let text = fs::read_to_string(&path).map_err(|err| invalid(err.to_string()))?;
        let value = document::parse(&path, &text).map_err(|err| invalid(format!("{err:#}")))?;
        if !value.is_object() {
            return Err(invalid("top level is not a mapping".into()));
        }
        Ok(value)
    }

    pub fn read_manifest(&self, plugin_dir: &Path) -> Result<PluginManifest, LoadError> {
        let value = self.read_manifest_document(plugin_dir)?;
        PluginManifest::from_value(value).map_err(|err| LoadError::ManifestInvalid {
            path: self.manifest_path(plugin_dir),
            message: err.to_string(),
        })
    }

    /// Loads the plugin in `plugin_dir` and constructs its driver.
    ///
    /// The plugin's dependency paths are on the search list only while the
    /// driver module executes.
    pub fn load(
        &self,
        plugin_dir: &Path,
        config: &Map<String, Value>,
        secrets: &Map<String, Value>,
    ) -> Result<LoadedPlugin, LoadError> {
        let result = self.load_inner(plugin_dir, config, secrets);
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("plinth_driver_loads_total", "outcome" => outcome).increment(1);
        result
    }

    fn load_inner(
        &self,
        plugin_dir: &Path,
        config: &Map<String, Value>,
        secrets: &Map<String, Value>,
    ) -> Result<LoadedPlugin, LoadError> {
        let manifest = self.read_manifest(plugin_dir)?;
        let entrypoint: Entrypoint = manifest.entrypoint().parse()?;

        let file_name = format!("{}.{}", entrypoint.module, self.runtime.extension());
        let source = plugin_dir.join(&file_name);
        if !source.is_file() {
            return Err(LoadError::DriverFileMissing { path: source });
        }

        let class = {
            let guard = self.search_path.acquire(deps::resolve(plugin_dir));
            tracing::debug!(added = ?guard.added(), "loading driver module");
            let module = self
                .runtime
                .load_module(&source, &self.search_path.snapshot())?;
            module
                .class(&entrypoint.class)
                .ok_or_else(|| LoadError::DriverClassMissing {
                    class: entrypoint.class.clone(),
                    file: file_name.clone(),
                })?
        };

        let instance = IntegrationInstance::for_local_run(&manifest.id, config.clone()).to_value();
        let secrets = Value::Object(secrets.clone());
        let constructed = match class.construct(CallArgs::named([
            ("instance", instance.clone()),
            ("secrets", secrets.clone()),
        ])) {
            Err(err) if err.is_mismatch() => {
                tracing::debug!(error = %err, "keyword construction rejected, retrying positionally");
                class.construct(CallArgs::positional([instance, secrets]))
            }
            other => other,
        };
        let driver = constructed.map_err(|err| LoadError::DriverConstructionFailed {
            class: entrypoint.class.clone(),
            message: err.to_string(),
        })?;

        tracing::info!(
            plugin = %manifest.id,
            version = %manifest.version,
            entrypoint = %entrypoint,
            methods = driver.methods().len(),
            "driver loaded"
        );
        Ok(LoadedPlugin { driver, manifest })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use plinth_plugin_sdk::{CallError, MethodTable, Signature};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::registry::StaticRuntime;

    const MANIFEST: &str = r#"
id: acme.pdu
name: Acme PDU
version: 1.2.0
min_core_version: 0.1.0
category: power
schema:
  connection:
    type: object
    properties:
      hostname: { type: string }
    required: [hostname]
capabilities:
  - id: power.cycle
    verbs: [reboot]
    targets: [host]
"#;

    fn plugin_dir(manifest: &str, files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plugin.yaml"), manifest).unwrap();
        for file in files {
            fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    fn pdu_driver(instance: Value) -> Box<dyn Driver> {
        Box::new(MethodTable::new().method(
            "power_cycle",
            Signature::new(["verb", "target", "options", "dry_run"]),
            move |_| Ok(Some(json!({ "instance": instance.clone() }))),
        ))
    }

    fn runtime() -> StaticRuntime {
        StaticRuntime::new().register_class(
            "driver",
            "Driver",
            Signature::new(["instance", "secrets"]),
            |mut args| Ok(pdu_driver(args.remove(0))),
        )
    }

    fn loader(runtime: StaticRuntime) -> DriverLoader<StaticRuntime> {
        DriverLoader::new(runtime).with_search_path(Arc::new(SearchPath::with_entries(["/usr/lib/site"])))
    }

    #[test]
    fn loads_and_constructs_with_instance_context() {
        let dir = plugin_dir(MANIFEST, &["driver.rs"]);
        let config = json!({ "hostname": "pdu-1", "name": "Rack PDU" });
        let loaded = loader(runtime())
            .load(dir.path(), config.as_object().unwrap(), &Map::new())
            .unwrap();
        assert_eq!(loaded.manifest.id, "acme.pdu");

        let mut driver = loaded.driver;
        let result = driver
            .call(
                "power_cycle",
                CallArgs::positional([json!("reboot"), json!(null), json!({}), json!(false)]),
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            result["instance"],
            json!({
                "id": "inst-TEST",
                "name": "Rack PDU",
                "type_id": "acme.pdu",
                "config": { "hostname": "pdu-1", "name": "Rack PDU" }
            })
        );
    }

    #[test]
    fn loosely_typed_yaml_manifest_still_loads() {
        let dir = plugin_dir(
            "id: acme.pdu\nversion: 1.0\nmin_core_version: 1\ndriver:\ncapabilities:\n",
            &["driver.rs"],
        );
        let loaded = loader(runtime())
            .load(dir.path(), &Map::new(), &Map::new())
            .unwrap();
        assert_eq!(loaded.manifest.version, "1.0");
        assert_eq!(loaded.manifest.min_core_version, "1");
        assert_eq!(loaded.manifest.entrypoint(), "driver:Driver");
        assert!(loaded.manifest.capabilities.is_empty());
    }

    #[test]
    fn falls_back_to_positional_construction() {
        let dir = plugin_dir(MANIFEST, &["driver.rs"]);
        let seen = Rc::new(RefCell::new(None));
        let record = Rc::clone(&seen);
        let runtime = StaticRuntime::new().register_class(
            "driver",
            "Driver",
            Signature::new(["inst", "creds"]).positional_only(),
            move |args| {
                *record.borrow_mut() = Some(args[1].clone());
                Ok(pdu_driver(args[0].clone()))
            },
        );
        let secrets = json!({ "password": "hunter2" });
        loader(runtime)
            .load(dir.path(), &Map::new(), secrets.as_object().unwrap())
            .unwrap();
        assert_eq!(*seen.borrow(), Some(secrets));
    }

    #[test]
    fn constructor_failure_is_not_retried() {
        let dir = plugin_dir(MANIFEST, &["driver.rs"]);
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let runtime = StaticRuntime::new().register_class(
            "driver",
            "Driver",
            Signature::new(["instance", "secrets"]),
            move |_| {
                *counter.borrow_mut() += 1;
                Err(CallError::failed("hostname is required"))
            },
        );
        let err = loader(runtime)
            .load(dir.path(), &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, LoadError::DriverConstructionFailed { .. }), "{err}");
        assert!(err.to_string().contains("hostname is required"));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn search_path_is_scoped_to_the_load() {
        let dir = plugin_dir(MANIFEST, &["driver.rs"]);
        fs::create_dir(dir.path().join("vendor")).unwrap();
        let loader = loader(runtime());
        let before = loader.search_path().snapshot();

        loader.load(dir.path(), &Map::new(), &Map::new()).unwrap();
        assert_eq!(loader.search_path().snapshot(), before);

        let seen = loader.runtime().last_search_path().unwrap();
        assert_eq!(seen[0], dir.path().join("vendor"));
        assert_eq!(seen[1..], before[..]);
    }

    #[test]
    fn search_path_is_restored_after_a_failed_load() {
        let dir = plugin_dir(MANIFEST, &["driver.rs"]);
        fs::create_dir(dir.path().join("_vendor")).unwrap();
        let loader = loader(StaticRuntime::new().register_broken_module("driver", "ImportError"));
        let before = loader.search_path().snapshot();

        let err = loader.load(dir.path(), &Map::new(), &Map::new()).unwrap_err();
        assert!(matches!(err, LoadError::Runtime(_)), "{err}");
        assert_eq!(loader.search_path().snapshot(), before);
        assert!(loader
            .runtime()
            .last_search_path()
            .unwrap()
            .contains(&dir.path().join("_vendor")));
    }

    #[test]
    fn missing_manifest_and_driver_file() {
        let empty = TempDir::new().unwrap();
        let err = loader(runtime())
            .load(empty.path(), &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, LoadError::ManifestMissing { .. }));
        assert!(err.to_string().ends_with("plugin.yaml not found"));

        let dir = plugin_dir(MANIFEST, &[]);
        let err = loader(runtime())
            .load(dir.path(), &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, LoadError::DriverFileMissing { .. }));
    }

    #[test]
    fn manifest_that_is_not_a_mapping_is_invalid() {
        let dir = plugin_dir("- just\n- a list\n", &["driver.rs"]);
        let err = loader(runtime())
            .load(dir.path(), &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, LoadError::ManifestInvalid { .. }), "{err}");
    }

    #[test]
    fn entrypoint_is_honoured_and_checked() {
        let custom = format!("{MANIFEST}driver:\n  entrypoint: pdu_driver:PduDriver\n");
        let dir = plugin_dir(&custom, &["pdu_driver.rs"]);
        let runtime = StaticRuntime::new().register_class(
            "pdu_driver",
            "PduDriver",
            Signature::new(["instance", "secrets"]),
            |mut args| Ok(pdu_driver(args.remove(0))),
        );
        loader(runtime).load(dir.path(), &Map::new(), &Map::new()).unwrap();

        let wrong_class = StaticRuntime::new().register_module("pdu_driver");
        let err = loader(wrong_class)
            .load(dir.path(), &Map::new(), &Map::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Class 'PduDriver' not found in pdu_driver.rs");

        let malformed = format!("{MANIFEST}driver:\n  entrypoint: a:b:c\n");
        let dir = plugin_dir(&malformed, &[]);
        let err = loader(self::runtime()).load(dir.path(), &Map::new(), &Map::new()).unwrap_err();
        assert!(matches!(err, LoadError::EntrypointMalformed(_)), "{err}");
    }

    #[test]
    fn json_manifest_name_is_configurable() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("plugin.json"),
            r#"{"id": "acme.json", "capabilities": []}"#,
        )
        .unwrap();
        let manifest = DriverLoader::new(runtime())
            .with_manifest_file("plugin.json")
            .read_manifest(dir.path())
            .unwrap();
        assert_eq!(manifest.id, "acme.json");
        assert_eq!(manifest.entrypoint(), "driver:Driver");
    }
}

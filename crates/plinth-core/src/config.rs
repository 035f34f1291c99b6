use anyhow::{bail, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Harness configuration, usually read from `plinth.toml` next to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manifest file name inside the plugin directory.
    pub manifest_file: String,
    /// Host platform version to check `min_core_version` against.
    pub core_version: Option<String>,
    pub runtime: RuntimeSettings,
    pub inventory: InventorySettings,
    pub files: FileSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest_file: "plugin.yaml".into(),
            core_version: None,
            runtime: RuntimeSettings::default(),
            inventory: InventorySettings::default(),
            files: FileSettings::default(),
        }
    }
}

/// How driver modules are executed by the process runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Program that runs the driver file; `None` executes the file directly.
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
    /// Driver source extension, without the dot.
    pub extension: String,
    /// Environment variable the module search list is exported through.
    pub path_env: String,
    /// Run the driver file under the bundled module host instead of executing
    /// it as a protocol speaker itself.
    pub bootstrap: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            interpreter: Some("python3".into()),
            interpreter_args: vec!["-u".into()],
            extension: "py".into(),
            path_env: "PYTHONPATH".into(),
            bootstrap: true,
        }
    }
}

/// Inventory types that can only be listed inside a parent scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    pub parent_type: String,
    /// Option key the chosen parent id is passed under.
    pub parent_option: String,
    pub scoped_types: Vec<String>,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            parent_type: "site".into(),
            parent_option: "site_id".into(),
            scoped_types: vec!["device".into(), "port".into()],
        }
    }
}

impl InventorySettings {
    pub fn is_scoped(&self, kind: &str) -> bool {
        self.scoped_types.iter().any(|scoped| scoped == kind)
    }
}

/// Config and secrets documents, first existing candidate wins on load; the
/// first candidate is written on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub config: Vec<String>,
    pub secrets: Vec<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            config: vec!["config.yaml".into(), "config.json".into()],
            secrets: vec!["secrets.yaml".into(), "secrets.json".into()],
        }
    }
}

impl Config {
    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if self.manifest_file.trim().is_empty() {
            bail!("manifest_file must not be empty");
        }
        self.runtime.validate()?;
        self.inventory.validate()?;
        self.files.validate()?;
        self.core_version()?;
        Ok(())
    }

    pub fn core_version(&self) -> Result<Option<Version>> {
        self.core_version
            .as_deref()
            .map(|raw| {
                Version::parse(raw).with_context(|| format!("invalid core_version `{raw}`"))
            })
            .transpose()
    }

    /// Whether the configured host version satisfies a manifest's
    /// `min_core_version`; `None` when no host version is configured.
    pub fn core_compatibility(&self, min_core_version: &str) -> Result<Option<bool>> {
        let Some(core) = self.core_version()? else {
            return Ok(None);
        };
        let min = Version::parse(min_core_version)
            .with_context(|| format!("invalid min_core_version `{min_core_version}`"))?;
        Ok(Some(core >= min))
    }
}

impl RuntimeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.extension.trim().is_empty() {
            bail!("runtime.extension must not be empty");
        }
        if self.extension.starts_with('.') {
            bail!(
                "runtime.extension `{}` must not start with a dot",
                self.extension
            );
        }
        if self.path_env.trim().is_empty() {
            bail!("runtime.path_env must not be empty");
        }
        if matches!(&self.interpreter, Some(program) if program.trim().is_empty()) {
            bail!("runtime.interpreter must not be empty when set");
        }
        if self.bootstrap && self.interpreter.is_none() {
            bail!("runtime.bootstrap needs runtime.interpreter to run the module host");
        }
        Ok(())
    }
}

impl InventorySettings {
    pub fn validate(&self) -> Result<()> {
        if self.parent_type.trim().is_empty() || self.parent_option.trim().is_empty() {
            bail!("inventory.parent_type and inventory.parent_option must be provided");
        }
        if self.is_scoped(&self.parent_type) {
            bail!(
                "inventory parent type `{}` cannot itself be scoped",
                self.parent_type
            );
        }
        Ok(())
    }
}

impl FileSettings {
    pub fn validate(&self) -> Result<()> {
        if self.config.is_empty() || self.secrets.is_empty() {
            bail!("files.config and files.secrets need at least one candidate each");
        }
        Ok(())
    }
}

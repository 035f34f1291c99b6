use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use plinth_core::{
    document, Config, DriverLoader, LoadError, LoadedPlugin, ProcessRuntime, SearchPath,
};
use plinth_plugin_sdk::PluginManifest;
use serde_json::{Map, Value};

/// A plugin directory with the connection config and secrets used to load it.
pub struct PluginWorkspace {
    dir: PathBuf,
    settings: Config,
    search_path: Arc<SearchPath>,
    pub connection: Map<String, Value>,
    pub secrets: Map<String, Value>,
}

impl PluginWorkspace {
    pub fn open(dir: &Path, settings: Config) -> Result<Self> {
        fn candidates(names: &[String]) -> Vec<&str> {
            names.iter().map(String::as_str).collect()
        }
        let connection = document::load_first(dir, &candidates(&settings.files.config))
            .context("failed to load connection config")?;
        let secrets = document::load_first(dir, &candidates(&settings.files.secrets))
            .context("failed to load secrets")?;
        let search_path = Arc::new(SearchPath::from_env(&settings.runtime.path_env));
        tracing::debug!(
            dir = %dir.display(),
            config_keys = connection.len(),
            secret_keys = secrets.len(),
            host_path_entries = search_path.snapshot().len(),
            "opened plugin directory"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            search_path,
            connection,
            secrets,
        })
    }

    pub fn settings(&self) -> &Config {
        &self.settings
    }

    pub fn loader(&self) -> DriverLoader<ProcessRuntime> {
        DriverLoader::new(ProcessRuntime::new(self.settings.runtime.clone()))
            .with_manifest_file(self.settings.manifest_file.clone())
            .with_search_path(Arc::clone(&self.search_path))
    }

    pub fn manifest_document(&self) -> Result<Value, LoadError> {
        self.loader().read_manifest_document(&self.dir)
    }

    pub fn manifest(&self) -> Result<PluginManifest, LoadError> {
        self.loader().read_manifest(&self.dir)
    }

    pub fn load(&self) -> Result<LoadedPlugin, LoadError> {
        self.loader()
            .load(&self.dir, &self.connection, &self.secrets)
    }

    /// Writes config and secrets to the first configured file names and
    /// returns the paths written.
    pub fn save(&self) -> Result<(PathBuf, PathBuf)> {
        let config_path = self.dir.join(first(&self.settings.files.config)?);
        let secrets_path = self.dir.join(first(&self.settings.files.secrets)?);
        document::save_mapping(&config_path, &self.connection)?;
        document::save_mapping(&secrets_path, &self.secrets)?;
        tracing::info!(
            config = %config_path.display(),
            secrets = %secrets_path.display(),
            "saved plugin settings"
        );
        Ok((config_path, secrets_path))
    }
}

fn first(candidates: &[String]) -> Result<&str> {
    candidates
        .first()
        .map(String::as_str)
        .context("no file name configured")
}

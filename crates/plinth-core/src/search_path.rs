use std::{
    ffi::OsStr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

/// Ordered module search list consulted when a driver module is loaded.
///
/// The process keeps one shared list ([`SearchPath::global`]); loads push
/// their plugin's dependency paths to the front for the duration of the load
/// through a [`SearchPathGuard`].
#[derive(Debug, Default)]
pub struct SearchPath {
    entries: Mutex<Vec<PathBuf>>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().map(Into::into).collect()),
        }
    }

    /// Seeds a list from a `PATH`-style environment variable; unset means empty.
    pub fn from_env(var: impl AsRef<OsStr>) -> Self {
        match std::env::var_os(var) {
            Some(value) => Self::with_entries(std::env::split_paths(&value)),
            None => Self::new(),
        }
    }

    /// Process-wide list shared by every loader that was not given its own.
    pub fn global() -> Arc<SearchPath> {
        static GLOBAL: OnceLock<Arc<SearchPath>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SearchPath::new())))
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Puts `paths` at the front of the list, keeping their relative order and
    /// skipping entries already present. Exactly the inserted entries are
    /// removed again when the returned guard drops.
    pub fn acquire<'a, I>(&'a self, paths: I) -> SearchPathGuard<'a>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        let mut entries = self.lock();
        let mut added = Vec::new();
        for path in paths.into_iter().rev() {
            if !entries.contains(&path) {
                entries.insert(0, path.clone());
                added.push(path);
            }
        }
        if !added.is_empty() {
            tracing::debug!(count = added.len(), "extended module search path");
        }
        SearchPathGuard { list: self, added }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        // Every mutation completes under the lock, so a poisoned list is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped extension of a [`SearchPath`]; dropping it retracts the additions.
#[must_use = "the search path additions are removed as soon as the guard drops"]
#[derive(Debug)]
pub struct SearchPathGuard<'a> {
    list: &'a SearchPath,
    added: Vec<PathBuf>,
}

impl SearchPathGuard<'_> {
    /// Entries this guard inserted, in insertion order.
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.list.lock();
        for path in &self.added {
            if let Some(index) = entries.iter().position(|entry| entry == path) {
                entries.remove(index);
            }
        }
        if !self.added.is_empty() {
            tracing::debug!(count = self.added.len(), "restored module search path");
        }
    }
}

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

/// Isolated environment directory looked up inside a plugin directory.
pub const VENV_DIR: &str = ".venv";
/// Vendor directories used when no isolated environment exists, in order.
pub const VENDOR_DIRS: [&str; 2] = ["_vendor", "vendor"];

/// Extra module search paths contributed by a plugin's dependency environment.
///
/// Never fails: unreadable or missing directories contribute nothing. Earlier
/// entries take precedence.
pub fn resolve(plugin_dir: &Path) -> Vec<PathBuf> {
    let venv = plugin_dir.join(VENV_DIR);
    let candidates = if venv.is_dir() {
        site_packages(&venv)
    } else {
        VENDOR_DIRS
            .iter()
            .map(|name| plugin_dir.join(name))
            .filter(|dir| dir.is_dir())
            .collect()
    };
    let resolved = dedup(candidates);
    tracing::debug!(
        plugin_dir = %plugin_dir.display(),
        paths = resolved.len(),
        "resolved dependency paths"
    );
    resolved
}

/// Site-packages directories of a virtual environment in POSIX (`lib`,
/// `lib64`) and Windows (`Lib`) layouts.
fn site_packages(venv: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for lib in ["lib", "lib64"] {
        for version_dir in interpreter_dirs(&venv.join(lib)) {
            let candidate = version_dir.join("site-packages");
            if candidate.is_dir() {
                found.push(candidate);
            }
        }
    }
    let windows = venv.join("Lib").join("site-packages");
    if windows.is_dir() {
        found.push(windows);
    }
    found
}

/// `python*` children of a lib directory, sorted by name.
fn interpreter_dirs(lib: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(lib) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("python"))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

//! Reading and writing the JSON/YAML mappings a plugin directory carries
//! (manifest, config, secrets). The format is chosen by file extension:
//! `.json` is JSON, anything else is YAML.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Parses document text; an empty YAML document reads as an empty mapping.
pub fn parse(path: &Path, text: &str) -> Result<Value> {
    let value = if is_json(path) {
        serde_json::from_str(text).context("not valid JSON")?
    } else {
        serde_yaml::from_str::<Value>(text).context("not valid YAML")?
    };
    Ok(match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

/// Loads a mapping; a missing file is an empty mapping.
pub fn load_mapping(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match parse(path, &text).with_context(|| format!("failed to parse {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} is not a mapping", path.display()),
    }
}

/// Loads the first existing file among `candidates` (e.g. `config.yaml`, then
/// `config.json`).
pub fn load_first(dir: &Path, candidates: &[&str]) -> Result<Map<String, Value>> {
    match candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
    {
        Some(path) => load_mapping(&path),
        None => Ok(Map::new()),
    }
}

pub fn save_mapping(path: &Path, data: &Map<String, Value>) -> Result<()> {
    let text = if is_json(path) {
        serde_json::to_string_pretty(data)?
    } else {
        serde_yaml::to_string(data)?
    };
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

//! Interactive driver shell: prompts for missing connection settings, loads
//! the driver and offers probe, capability, inventory, action and config
//! menus until the user exits.

use std::{
    io::{BufRead, Write},
    ops::ControlFlow,
};

use anyhow::{bail, Result};
use plinth_core::{invoke, InventoryItem, InvokeError, LoadedPlugin};
use plinth_plugin_sdk::{Driver, DryRunPolicy, PluginManifest, Target};
use serde_json::{Map, Value};

use crate::{prompt::Prompter, workspace::PluginWorkspace};

const PASSWORD_FIELD: &str = "password";

pub fn run<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    workspace: &mut PluginWorkspace,
) -> Result<()> {
    let manifest = match workspace.manifest() {
        Ok(manifest) => manifest,
        Err(err) => {
            prompter.say(format!("\n[load] {err}"))?;
            return Ok(());
        }
    };
    prompt_connection(prompter, workspace, &manifest)?;

    let loaded = match workspace.load() {
        Ok(loaded) => loaded,
        Err(err) => {
            prompter.say(format!("\n[load] {err}"))?;
            return Ok(());
        }
    };
    explore(prompter, workspace, loaded)
}

/// Runs the shell menu against an already loaded plugin until the user exits.
pub fn explore<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    workspace: &mut PluginWorkspace,
    loaded: LoadedPlugin,
) -> Result<()> {
    let mut shell = Shell {
        prompter,
        workspace,
        driver: loaded.driver,
        manifest: loaded.manifest,
    };
    shell.menu()
}

/// Asks for required connection fields that have no value yet and for every
/// boolean property not set in the config.
pub fn prompt_connection<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    workspace: &mut PluginWorkspace,
    manifest: &PluginManifest,
) -> Result<()> {
    let connection = &manifest.schema.connection;
    for field in &connection.required {
        if field == PASSWORD_FIELD {
            if is_blank(workspace.secrets.get(PASSWORD_FIELD)) {
                let password = prompter.secret("Password")?;
                workspace
                    .secrets
                    .insert(PASSWORD_FIELD.into(), Value::String(password));
            }
        } else if is_blank(workspace.connection.get(field)) {
            let value = prompter.ask(&format!("Enter {field}: "))?;
            workspace
                .connection
                .insert(field.clone(), Value::String(value));
        }
    }

    for field in connection.boolean_fields() {
        if workspace.connection.contains_key(field.name) {
            continue;
        }
        if let Some(answer) = prompter.yes_no(field.title, field.default)? {
            workspace
                .connection
                .insert(field.name.to_string(), Value::Bool(answer));
        }
    }
    Ok(())
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Parses an optional options object; blank input is `None`.
fn parse_options(text: &str) -> Result<Option<Map<String, Value>>> {
    if text.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => bail!("options must be a JSON object, got {other}"),
        Err(err) => bail!("Invalid JSON: {err}"),
    }
}

struct Shell<'a, R, W> {
    prompter: &'a mut Prompter<R, W>,
    workspace: &'a mut PluginWorkspace,
    driver: Box<dyn Driver>,
    manifest: PluginManifest,
}

impl<R: BufRead, W: Write> Shell<'_, R, W> {
    fn menu(&mut self) -> Result<()> {
        loop {
            let title = if self.manifest.name.is_empty() {
                &self.manifest.id
            } else {
                &self.manifest.name
            };
            self.prompter
                .say(format!("\n=== plinth driver shell: {title} ==="))?;
            for line in [
                "1) Probe/test_connection",
                "2) List capabilities",
                "3) Inventory...",
                "4) Action...",
                "5) Config & secrets...",
                "0) Exit",
            ] {
                self.prompter.say(line)?;
            }
            match self.prompter.ask("> ")?.as_str() {
                "1" => self.probe()?,
                "2" => self.capabilities()?,
                "3" => self.inventory()?,
                "4" => self.action()?,
                "5" => self.config()?,
                "0" => return Ok(()),
                _ => {
                    self.prompter.say("Invalid selection.")?;
                    continue;
                }
            }
            self.prompter.pause()?;
        }
    }

    fn probe(&mut self) -> Result<()> {
        self.prompter.say("\nProbe / test_connection")?;
        match invoke::probe(self.driver.as_mut()) {
            Ok(report) => self.prompter.say(report.to_string()),
            Err(err) => self.prompter.say(format!("Probe error: {err}")),
        }
    }

    fn capabilities(&mut self) -> Result<()> {
        let caps = &self.manifest.capabilities;
        self.prompter
            .say(format!("\nCapabilities ({}):", caps.len()))?;
        for cap in caps {
            self.prompter.say(format!(
                "  - {}  verbs={:?} targets={:?} dry_run={}",
                cap.id,
                cap.verbs,
                cap.targets,
                cap.dry_run_policy()
            ))?;
        }
        Ok(())
    }

    fn inventory(&mut self) -> Result<()> {
        let kinds: Vec<String> = self
            .manifest
            .inventory_targets()
            .into_iter()
            .map(str::to_string)
            .collect();
        if kinds.is_empty() {
            return self.prompter.say("\nNo inventory targets exposed.");
        }
        let Some(index) = self.prompter.choose("Select inventory type", &kinds)? else {
            return Ok(());
        };
        let kind = &kinds[index];
        let active_only = self.prompter.confirm("Active-only?")?;

        let options = if self.workspace.settings().inventory.is_scoped(kind) {
            match self.parent_scope(kind)? {
                ControlFlow::Continue(options) => options,
                ControlFlow::Break(()) => return Ok(()),
            }
        } else {
            let text = self.prompter.ask("Options JSON (or blank): ")?;
            match parse_options(&text) {
                Ok(options) => options,
                Err(err) => return self.prompter.say(err.to_string()),
            }
        };

        match invoke::inventory_list(self.driver.as_mut(), kind, active_only, options.as_ref()) {
            Ok(items) => {
                self.prompter
                    .say(format!("\n{kind} count={}", items.len()))?;
                for item in items {
                    self.prompter.say(format!("  - {item}"))?;
                }
                Ok(())
            }
            Err(err) => self.prompter.say(format!("Inventory error: {err}")),
        }
    }

    /// Picks the parent entity a scoped inventory type is listed under and
    /// returns the options carrying its id. When the parent lookup fails the
    /// options are typed in by hand, and blank input passes none. `Break`
    /// means the flow was abandoned.
    fn parent_scope(&mut self, kind: &str) -> Result<ControlFlow<(), Option<Map<String, Value>>>> {
        let scope = self.workspace.settings().inventory.clone();
        let parent = scope.parent_type.as_str();
        self.prompter.say(format!(
            "\n{kind} listing requires a {parent}. Looking up available {parent} entries..."
        ))?;

        let parents = match invoke::inventory_list(self.driver.as_mut(), parent, true, None) {
            Ok(parents) => parents,
            Err(err) => {
                self.prompter
                    .say(format!("Error getting {parent} entries: {err}"))?;
                let text = self.prompter.ask(&format!(
                    "Options JSON ({} required): ",
                    scope.parent_option
                ))?;
                return match parse_options(&text) {
                    Ok(options) => Ok(ControlFlow::Continue(options)),
                    Err(err) => {
                        self.prompter.say(err.to_string())?;
                        Ok(ControlFlow::Break(()))
                    }
                };
            }
        };

        let label = |item: &InventoryItem| {
            format!(
                "{} ({})",
                item.name.as_deref().unwrap_or("Unknown"),
                item.external_id.as_deref().unwrap_or("")
            )
        };
        let chosen = match parents.as_slice() {
            [] => {
                self.prompter
                    .say(format!("No {parent} entries found. Cannot list {kind}."))?;
                return Ok(ControlFlow::Break(()));
            }
            [only] => {
                self.prompter.say(format!("Using {parent}: {}", label(only)))?;
                only
            }
            many => {
                self.prompter
                    .say(format!("Found {} {parent} entries:", many.len()))?;
                let labels: Vec<String> = many.iter().map(label).collect();
                match self.prompter.choose(&format!("Select {parent}"), &labels)? {
                    Some(index) => &many[index],
                    None => return Ok(ControlFlow::Break(())),
                }
            }
        };

        let mut options = Map::new();
        options.insert(
            scope.parent_option.clone(),
            chosen
                .external_id
                .clone()
                .map_or(Value::Null, Value::String),
        );
        Ok(ControlFlow::Continue(Some(options)))
    }

    fn action(&mut self) -> Result<()> {
        let caps: Vec<_> = self.manifest.actions().cloned().collect();
        if caps.is_empty() {
            return self.prompter.say("\nNo actionable capabilities.");
        }
        let labels: Vec<String> = caps
            .iter()
            .map(|cap| format!("{}  (verbs={:?}, targets={:?})", cap.id, cap.verbs, cap.targets))
            .collect();
        let Some(index) = self.prompter.choose("Select capability", &labels)? else {
            return Ok(());
        };
        let cap = &caps[index];

        if cap.verbs.is_empty() {
            return self.prompter.say("This capability defines no verbs.");
        }
        let Some(verb) = self.prompter.choose("Select verb", &cap.verbs)? else {
            return Ok(());
        };
        let verb = &cap.verbs[verb];

        let mut target = None;
        if !cap.targets.is_empty() {
            let Some(kind) = self.prompter.choose("Select target type", &cap.targets)? else {
                return Ok(());
            };
            let kind = &cap.targets[kind];
            let id = self.prompter.ask(&format!(
                "Enter target external_id for {kind} (or blank to skip): "
            ))?;
            if !id.is_empty() {
                target = Some(Target::new(kind.as_str(), id));
            }
        }

        let dry_run = self.prompter.confirm("Dry-run?")?;
        if dry_run && cap.dry_run_policy() == DryRunPolicy::Unsupported {
            self.prompter.say(format!(
                "warning: {} does not support dry-run; the driver decides what happens",
                cap.id
            ))?;
        }
        let text = self.prompter.ask("Options JSON (or blank): ")?;
        let options = match parse_options(&text) {
            Ok(options) => options.unwrap_or_default(),
            Err(err) => return self.prompter.say(err.to_string()),
        };

        match invoke::invoke(
            self.driver.as_mut(),
            &cap.id,
            verb,
            target.as_ref(),
            &options,
            dry_run,
        ) {
            Ok(outcome) => {
                let pretty = serde_json::to_string_pretty(&outcome.result)?;
                self.prompter.say(pretty)
            }
            Err(InvokeError::Action(message)) => {
                self.prompter.say(format!("Action error: {message}"))
            }
            Err(err) => self.prompter.say(err.to_string()),
        }
    }

    fn config(&mut self) -> Result<()> {
        self.prompter.say("\nCurrent config:")?;
        let pretty = serde_json::to_string_pretty(&self.workspace.connection)?;
        self.prompter.say(pretty)?;
        self.prompter.say(
            "\n1) Edit hostname  2) Edit username  3) Edit password  4) Save config & secrets  0) Back",
        )?;
        match self.prompter.ask("> ")?.as_str() {
            "1" => self.edit("hostname")?,
            "2" => self.edit("username")?,
            "3" => {
                let password = self.prompter.secret("password")?;
                self.workspace
                    .secrets
                    .insert(PASSWORD_FIELD.into(), Value::String(password));
            }
            "4" => {
                let (config, secrets) = self.workspace.save()?;
                self.prompter.say(format!(
                    "Saved {} and {}",
                    config.display(),
                    secrets.display()
                ))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn edit(&mut self, field: &str) -> Result<()> {
        let value = self.prompter.ask(&format!("{field}: "))?;
        self.workspace
            .connection
            .insert(field.to_string(), Value::String(value));
        Ok(())
    }
}

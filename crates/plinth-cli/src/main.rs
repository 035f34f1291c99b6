use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plinth_core::{conformance, invoke, Config, ManifestValidator, ValidationReport};
use plinth_plugin_sdk::{DryRunPolicy, Target, TEST_CONNECTION};
use regex::Regex;
use serde_json::{Map, Value};
use tracing_subscriber::{fmt, EnvFilter};

mod prompt;
mod shell;
mod workspace;

use prompt::{InputClosed, Prompter};
use workspace::PluginWorkspace;

/// Harness configuration looked up in the plugin directory when `--config`
/// is not given.
const CONFIG_FILE: &str = "plinth.toml";

#[derive(Parser, Debug)]
#[command(
    name = "plinth",
    author,
    version,
    about = "Load, validate and exercise driver plugins outside the host platform"
)]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Plugin directory holding plugin.yaml and the driver module.
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    plugin_dir: PathBuf,

    /// Harness configuration file (defaults to <plugin-dir>/plinth.toml if present).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive menu (the default).
    Shell,
    /// Validate the manifest against the host schema.
    Validate {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate, load the driver and check capability conformance.
    Check,
    /// Load the driver and run test_connection.
    Probe,
    /// Load the driver and invoke one capability.
    Invoke {
        #[arg(long, value_name = "ID")]
        capability: String,
        #[arg(long)]
        verb: String,
        #[arg(long, value_name = "TYPE", requires = "target_id")]
        target_type: Option<String>,
        #[arg(long, value_name = "ID", requires = "target_type")]
        target_id: Option<String>,
        /// Options object as JSON.
        #[arg(long, value_name = "JSON")]
        options: Option<String>,
        /// Pass dry_run=false to the driver.
        #[arg(long)]
        execute: bool,
    },
    /// Load the driver and list inventory of one type.
    Inventory {
        #[arg(value_name = "TYPE")]
        kind: String,
        /// Include inactive entries.
        #[arg(long)]
        all: bool,
        /// Options object as JSON.
        #[arg(long, value_name = "JSON")]
        options: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    let config = resolve_config(cli.config.as_deref(), &cli.plugin_dir)?;
    let mut workspace = PluginWorkspace::open(&cli.plugin_dir, config)?;
    match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => handle_shell(&mut workspace),
        Commands::Validate { json } => handle_validate(&workspace, json),
        Commands::Check => handle_check(&workspace),
        Commands::Probe => handle_probe(&workspace),
        Commands::Invoke {
            capability,
            verb,
            target_type,
            target_id,
            options,
            execute,
        } => {
            let target = target_type.zip(target_id).map(|(kind, id)| Target::new(kind, id));
            handle_invoke(&workspace, &capability, &verb, target, options.as_deref(), !execute)
        }
        Commands::Inventory { kind, all, options } => {
            handle_inventory(&workspace, &kind, !all, options.as_deref())
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
    Ok(())
}

fn resolve_config(explicit: Option<&Path>, plugin_dir: &Path) -> Result<Config> {
    let config = match explicit {
        Some(path) => load_config(path)?,
        None => {
            let candidate = plugin_dir.join(CONFIG_FILE);
            if candidate.is_file() {
                load_config(&candidate)?
            } else {
                Config::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

fn handle_shell(workspace: &mut PluginWorkspace) -> Result<ExitCode> {
    let mut prompter = Prompter::stdio();
    match shell::run(&mut prompter, workspace) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) if err.is::<InputClosed>() => {
            println!("\nBye.");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Err(err),
    }
}

fn handle_validate(workspace: &PluginWorkspace, json: bool) -> Result<ExitCode> {
    let document = workspace.manifest_document()?;
    let report = ManifestValidator::default().validate(&document);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(exit_status(report.valid))
}

fn handle_check(workspace: &PluginWorkspace) -> Result<ExitCode> {
    let document = workspace.manifest_document()?;
    let report = ManifestValidator::default().validate(&document);
    print_report(&report);
    let mut ok = report.valid;

    let manifest = workspace.manifest()?;
    if !manifest.min_core_version.is_empty() {
        match workspace
            .settings()
            .core_compatibility(&manifest.min_core_version)
        {
            Ok(Some(false)) => println!(
                "warning: host core {} is older than min_core_version {}",
                workspace.settings().core_version.as_deref().unwrap_or_default(),
                manifest.min_core_version
            ),
            Ok(_) => {}
            Err(err) => println!("warning: {err:#}"),
        }
    }

    let loaded = match workspace.load() {
        Ok(loaded) => loaded,
        Err(err) => {
            println!("load failed: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let conformance = conformance::check(&manifest.capabilities, &loaded.driver.methods());
    if conformance.conformant {
        println!(
            "conformance OK: {} capabilities mapped",
            manifest.capabilities.len()
        );
    } else {
        ok = false;
        for error in &conformance.errors {
            println!("  - {error}");
        }
    }
    if !loaded.driver.has_method(TEST_CONNECTION) {
        println!("warning: driver has no {TEST_CONNECTION}() method; probes will report unknown");
    }
    Ok(exit_status(ok))
}

fn handle_probe(workspace: &PluginWorkspace) -> Result<ExitCode> {
    let mut loaded = workspace.load()?;
    let report = invoke::probe(loaded.driver.as_mut())?;
    println!("{report}");
    Ok(ExitCode::SUCCESS)
}

fn handle_invoke(
    workspace: &PluginWorkspace,
    capability: &str,
    verb: &str,
    target: Option<Target>,
    options: Option<&str>,
    dry_run: bool,
) -> Result<ExitCode> {
    let options = parse_options(options)?.unwrap_or_default();
    let mut loaded = workspace.load()?;
    match loaded.manifest.capability(capability) {
        None => tracing::warn!(%capability, "capability not declared in the manifest"),
        Some(cap) if dry_run && cap.dry_run_policy() == DryRunPolicy::Unsupported => {
            eprintln!("warning: {capability} does not support dry-run; the driver decides what happens");
        }
        Some(_) => {}
    }
    let outcome = invoke::invoke(
        loaded.driver.as_mut(),
        capability,
        verb,
        target.as_ref(),
        &options,
        dry_run,
    )?;
    tracing::info!(convention = %outcome.convention, "capability invoked");
    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    Ok(ExitCode::SUCCESS)
}

fn handle_inventory(
    workspace: &PluginWorkspace,
    kind: &str,
    active_only: bool,
    options: Option<&str>,
) -> Result<ExitCode> {
    let options = parse_options(options)?;
    let mut loaded = workspace.load()?;
    let items = invoke::inventory_list(loaded.driver.as_mut(), kind, active_only, options.as_ref())?;
    println!("{kind} count={}", items.len());
    for item in items {
        println!("  - {item}");
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &ValidationReport) {
    if report.valid {
        println!("manifest OK");
        return;
    }
    println!("manifest invalid ({} errors):", report.errors.len());
    for error in &report.errors {
        let path = if error.path.is_empty() {
            "<root>"
        } else {
            &error.path
        };
        println!("  - {path}: {}", error.message);
    }
}

fn exit_status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn parse_options(raw: Option<&str>) -> Result<Option<Map<String, Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw).context("--options is not valid JSON")? {
        Value::Object(map) => Ok(Some(map)),
        other => anyhow::bail!("--options must be a JSON object, got {other}"),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let expanded = interpolate_env(&raw)?;
    let cfg = toml::from_str::<Config>(&expanded)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(cfg)
}

fn interpolate_env(input: &str) -> Result<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)(?::([^}]+))?\}").unwrap());
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    });
    Ok(result.into_owned())
}

//! Process-hosted driver modules.
//!
//! [`ProcessRuntime`] runs a driver file in a child process, exports the
//! module search list through an environment variable, and talks to it with
//! the JSONL protocol from [`crate::protocol`]. The child stays alive for as
//! long as any module, class or driver handle refers to it.
//!
//! With `bootstrap` on (the default) the interpreter runs [`HOST_SCRIPT`],
//! which imports a plain driver class from the file and answers the protocol
//! on its behalf. Otherwise the file itself must speak the protocol.

use std::{
    cell::RefCell,
    collections::BTreeSet,
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    rc::Rc,
    sync::Arc,
};

use plinth_plugin_sdk::{CallArgs, CallError, Driver};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::RuntimeSettings,
    error::RuntimeError,
    plugin::{DriverClass, DriverModule, DriverRuntime},
    protocol::{self, Reply, Request},
};

/// Tracing target for driver process operations.
const PROCESS_TARGET: &str = "plinth_core::process";

/// Python module host passed to the interpreter with `-c`.
pub const HOST_SCRIPT: &str = include_str!("host.py");

#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    settings: RuntimeSettings,
}

impl ProcessRuntime {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }

    fn command(&self, source: &Path, search_path: &[PathBuf]) -> Result<Command, RuntimeError> {
        let module = module_name(source);
        let mut command = match &self.settings.interpreter {
            Some(program) => {
                let mut command = Command::new(program);
                command.args(&self.settings.interpreter_args);
                if self.settings.bootstrap {
                    command.arg("-c").arg(HOST_SCRIPT);
                }
                command.arg(source);
                command
            }
            None if self.settings.bootstrap => {
                return Err(RuntimeError::Module {
                    module,
                    message: "bootstrap needs an interpreter".into(),
                });
            }
            None => Command::new(source),
        };
        let joined = std::env::join_paths(search_path).map_err(|err| RuntimeError::Module {
            module: module.clone(),
            message: format!("cannot export module search path: {err}"),
        })?;
        command
            .env(&self.settings.path_env, joined)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = source.parent() {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

impl DriverRuntime for ProcessRuntime {
    fn extension(&self) -> &str {
        &self.settings.extension
    }

    fn load_module(
        &self,
        source: &Path,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn DriverModule>, RuntimeError> {
        let module = module_name(source);
        // The child runs from the plugin directory, so hand it an absolute path.
        let source = source.canonicalize().map_err(|err| RuntimeError::Io {
            module: module.clone(),
            source: Arc::new(err),
        })?;
        let mut command = self.command(&source, search_path)?;
        debug!(
            target: PROCESS_TARGET,
            module = %module,
            source = %source.display(),
            search_path = search_path.len(),
            "spawning driver module"
        );
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command.spawn().map_err(|err| RuntimeError::Spawn {
            program,
            source: Arc::new(err),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            drop(child.kill());
            drop(child.wait());
            return Err(RuntimeError::Protocol {
                module,
                message: "failed to capture stdio".into(),
            });
        };
        let mut session = Session {
            module,
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let value = match session.request(&Request::Describe)? {
            Reply::Ok { value } => value,
            Reply::Mismatch { message } | Reply::Error { message } => {
                return Err(RuntimeError::Module {
                    module: session.module.clone(),
                    message,
                });
            }
        };
        let classes = protocol::names(&value, "classes").ok_or_else(|| RuntimeError::Protocol {
            module: session.module.clone(),
            message: "describe reply lacks a `classes` list".into(),
        })?;
        debug!(target: PROCESS_TARGET, module = %session.module, ?classes, "driver module ready");

        Ok(Box::new(ProcessModule {
            session: Rc::new(RefCell::new(session)),
            classes,
        }))
    }
}

fn module_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A running driver module process.
struct Session {
    module: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    fn request(&mut self, request: &Request<'_>) -> Result<Reply, RuntimeError> {
        let mut line = serde_json::to_string(request).map_err(|err| RuntimeError::Protocol {
            module: self.module.clone(),
            message: format!("failed to serialise request: {err}"),
        })?;
        line.push('\n');
        if let Err(err) = self
            .stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
        {
            return Err(if err.kind() == ErrorKind::BrokenPipe {
                self.exited()
            } else {
                self.io_error(err)
            });
        }

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .map_err(|err| self.io_error(err))?;
        if read == 0 {
            return Err(self.exited());
        }
        serde_json::from_str(reply.trim()).map_err(|err| RuntimeError::Protocol {
            module: self.module.clone(),
            message: format!("invalid reply `{}`: {err}", reply.trim()),
        })
    }

    fn exited(&mut self) -> RuntimeError {
        let status = self
            .child
            .wait()
            .map(|status| status.to_string())
            .unwrap_or_else(|err| err.to_string());
        RuntimeError::Module {
            module: self.module.clone(),
            message: format!("process exited ({status}) without replying"),
        }
    }

    fn io_error(&self, err: std::io::Error) -> RuntimeError {
        RuntimeError::Io {
            module: self.module.clone(),
            source: Arc::new(err),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        debug!(target: PROCESS_TARGET, module = %self.module, "stopping driver module");
        if let Err(err) = self.child.kill() {
            warn!(target: PROCESS_TARGET, module = %self.module, error = %err, "failed to stop driver module");
        }
        drop(self.child.wait());
    }
}

type SharedSession = Rc<RefCell<Session>>;

fn send(session: &SharedSession, request: &Request<'_>) -> Result<Value, CallError> {
    session
        .borrow_mut()
        .request(request)
        .map_err(|err| CallError::Failed(err.to_string()))?
        .into_result()
}

struct ProcessModule {
    session: SharedSession,
    classes: BTreeSet<String>,
}

impl DriverModule for ProcessModule {
    fn class(&self, name: &str) -> Option<Box<dyn DriverClass>> {
        self.classes.contains(name).then(|| {
            Box::new(ProcessClass {
                session: Rc::clone(&self.session),
                name: name.to_string(),
            }) as Box<dyn DriverClass>
        })
    }
}

struct ProcessClass {
    session: SharedSession,
    name: String,
}

impl DriverClass for ProcessClass {
    fn construct(&self, args: CallArgs) -> Result<Box<dyn Driver>, CallError> {
        let value = send(
            &self.session,
            &Request::Construct {
                class: &self.name,
                args: &args,
            },
        )?;
        let methods = protocol::names(&value, "methods").ok_or_else(|| {
            CallError::Failed("construct reply lacks a `methods` list".to_string())
        })?;
        Ok(Box::new(ProcessDriver {
            session: Rc::clone(&self.session),
            methods,
        }))
    }
}

/// Driver instance living in a module process.
struct ProcessDriver {
    session: SharedSession,
    methods: BTreeSet<String>,
}

impl Driver for ProcessDriver {
    fn methods(&self) -> BTreeSet<String> {
        self.methods.clone()
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    fn call(&mut self, method: &str, args: CallArgs) -> Result<Option<Value>, CallError> {
        let value = send(
            &self.session,
            &Request::Call {
                method,
                args: &args,
            },
        )?;
        Ok((!value.is_null()).then_some(value))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use plinth_plugin_sdk::Target;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        error::InvokeError,
        invoke::{inventory_list, invoke, probe, Convention},
        loader::DriverLoader,
        search_path::SearchPath,
    };

    /// Writes a shell "driver" that records its search path and answers each
    /// request line with the next canned reply.
    fn scripted_module(dir: &Path, replies: &[&str]) -> PathBuf {
        let mut script = String::from("echo \"$PLINTH_TEST_PATH\" > search_path.txt\n");
        for reply in replies {
            script.push_str("read -r line || exit 0\n");
            script.push_str(&format!("echo '{reply}'\n"));
        }
        let path = dir.join("driver.sh");
        fs::write(&path, script).unwrap();
        path
    }

    fn runtime() -> ProcessRuntime {
        ProcessRuntime::new(RuntimeSettings {
            interpreter: Some("sh".into()),
            interpreter_args: Vec::new(),
            extension: "sh".into(),
            path_env: "PLINTH_TEST_PATH".into(),
            bootstrap: false,
        })
    }

    #[test]
    fn describes_constructs_and_calls() {
        let dir = TempDir::new().unwrap();
        let source = scripted_module(
            dir.path(),
            &[
                r#"{"status":"ok","value":{"classes":["Driver"]}}"#,
                r#"{"status":"mismatch","message":"unexpected keyword argument 'instance'"}"#,
                r#"{"status":"ok","value":{"methods":["power_cycle"]}}"#,
                r#"{"status":"ok","value":null}"#,
                r#"{"status":"error","message":"PDU unreachable"}"#,
            ],
        );
        let vendor = dir.path().join("vendor");
        let module = runtime().load_module(&source, &[vendor.clone()]).unwrap();
        assert!(module.class("Other").is_none());

        let class = module.class("Driver").unwrap();
        let err = class
            .construct(CallArgs::named([("instance", json!({}))]))
            .err()
            .unwrap();
        assert!(err.is_mismatch());

        let mut driver = class.construct(CallArgs::positional([json!({})])).unwrap();
        assert!(driver.has_method("power_cycle"));
        assert_eq!(driver.call("power_cycle", CallArgs::new()).unwrap(), None);
        assert_eq!(
            driver.call("power_cycle", CallArgs::new()).unwrap_err(),
            CallError::Failed("PDU unreachable".into())
        );

        let exported = fs::read_to_string(dir.path().join("search_path.txt")).unwrap();
        assert_eq!(exported.trim(), vendor.to_string_lossy());
    }

    #[test]
    fn host_entries_stay_behind_plugin_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plugin.yaml"), "id: acme.pdu\n").unwrap();
        fs::create_dir(dir.path().join("vendor")).unwrap();
        scripted_module(
            dir.path(),
            &[
                r#"{"status":"ok","value":{"classes":["Driver"]}}"#,
                r#"{"status":"ok","value":{"methods":[]}}"#,
            ],
        );
        let search_path = Arc::new(SearchPath::with_entries(["/host/site-packages"]));
        let loader = DriverLoader::new(runtime()).with_search_path(Arc::clone(&search_path));
        loader.load(dir.path(), &Map::new(), &Map::new()).unwrap();

        let exported = fs::read_to_string(dir.path().join("search_path.txt")).unwrap();
        let expected = std::env::join_paths([
            dir.path().join("vendor"),
            PathBuf::from("/host/site-packages"),
        ])
        .unwrap();
        assert_eq!(exported.trim(), expected.to_string_lossy());
        assert_eq!(search_path.snapshot(), vec![PathBuf::from("/host/site-packages")]);
    }

    fn python3_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    const CLASS_DRIVER: &str = r#"
import helper


class Driver:
    def __init__(self, instance, secrets):
        self.host = instance.config.hostname
        self.password = secrets["password"]
        print("connected to", self.host)

    def test_connection(self):
        return {"status": "ok", "latency_ms": 7, "message": helper.greet(self.host)}

    def power_cycle(self, verb, target, options=None, dry_run=False):
        return {"verb": verb, "target": target.external_id, "dry_run": dry_run}

    def power_off(self, verb, target, dry_run, /):
        return None

    async def firmware_upgrade(self, verb, target, options, dry_run):
        raise RuntimeError("flash failed")

    def inventory_list(self, target_type, active_only=True, options=None):
        return [{"id": "s1", "name": "Main"}]
"#;

    #[test]
    fn plain_class_driver_loads_under_module_host() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plugin.yaml"), "id: acme.pdu\ndriver: null\n").unwrap();
        fs::write(dir.path().join("driver.py"), CLASS_DRIVER).unwrap();
        fs::create_dir(dir.path().join("vendor")).unwrap();
        fs::write(
            dir.path().join("vendor").join("helper.py"),
            "def greet(host):\n    return 'reached ' + host\n",
        )
        .unwrap();

        let loader = DriverLoader::new(ProcessRuntime::new(RuntimeSettings::default()))
            .with_search_path(Arc::new(SearchPath::new()));
        let config = json!({"hostname": "pdu-1"}).as_object().cloned().unwrap();
        let secrets = json!({"password": "hunter2"}).as_object().cloned().unwrap();
        let mut loaded = loader.load(dir.path(), &config, &secrets).unwrap();
        let driver = loaded.driver.as_mut();
        assert!(driver.has_method("power_cycle"));
        assert!(!driver.has_method("__init__"));

        let report = probe(driver).unwrap();
        assert_eq!(report.to_string(), "status=ok latency_ms=7 msg=reached pdu-1");

        let target = Target::new("host", "h1");
        let cycled = invoke(driver, "power.cycle", "reboot", Some(&target), &Map::new(), true).unwrap();
        assert_eq!(cycled.convention, Convention::KeywordWithOptions);
        assert_eq!(cycled.result, json!({"verb": "reboot", "target": "h1", "dry_run": true}));

        let off = invoke(driver, "power.off", "off", None, &Map::new(), false).unwrap();
        assert_eq!(off.convention, Convention::Positional);
        assert_eq!(off.result, json!({"success": true}));

        let err = invoke(driver, "firmware.upgrade", "apply", None, &Map::new(), false).unwrap_err();
        assert!(matches!(&err, InvokeError::Action(message) if message.contains("flash failed")), "{err}");

        let sites = inventory_list(driver, "site", true, None).unwrap();
        assert_eq!(sites[0].external_id.as_deref(), Some("s1"));
    }

    #[test]
    fn module_that_exits_early_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("driver.sh");
        fs::write(&source, "echo 'ImportError: no module named requests' >&2\nexit 3\n").unwrap();
        let err = runtime().load_module(&source, &[]).err().unwrap();
        assert!(matches!(err, RuntimeError::Module { .. }), "{err}");
        assert!(err.to_string().contains("without replying"));
    }

    #[test]
    fn garbage_reply_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let source = scripted_module(dir.path(), &["hello there"]);
        let err = runtime().load_module(&source, &[]).err().unwrap();
        assert!(matches!(err, RuntimeError::Protocol { .. }), "{err}");
    }

    #[test]
    fn missing_interpreter_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let source = scripted_module(dir.path(), &[]);
        let mut settings = runtime().settings;
        settings.interpreter = Some("plinth-no-such-interpreter".into());
        let err = ProcessRuntime::new(settings)
            .load_module(&source, &[])
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Spawn { .. }), "{err}");
    }
}

//! Test engine session and the process-backed engine.
//!
//! An [`EngineSession`] owns one [`EngineBackend`] and the listener
//! subscriptions for its lifecycle events. Runs are strictly sequential:
//! `run` takes `&mut self`, so a second run cannot start while one is in
//! flight.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::aggregate::CoverageMap;
use crate::core::events::{EventKind, RunEvent};
use crate::core::registry::{ModuleRecord, ModuleRegistry};
use crate::io::config::EngineConfig;
use crate::io::process::{command_from_argv, run_command};

pub const CONTEXT_FILE: &str = "context.json";
pub const REPORT_FILE: &str = "report.xml";
pub const COVERAGE_FILE: &str = "coverage.json";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to load modules: {0}")]
    Load(String),
    #[error("run ended without a complete event: {0}")]
    Incomplete(String),
    #[error("{0}")]
    Backend(String),
}

/// Modules handed to the engine for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Names the run starts from.
    pub entries: Vec<String>,
    /// Registry records of the entries and everything they require.
    pub modules: Vec<ModuleRecord>,
    /// Names absent from the registry; the engine resolves these itself.
    pub external: Vec<String>,
    pub coverage: bool,
}

impl ExecutionContext {
    pub fn resolve(registry: &ModuleRegistry, entries: &[String], coverage: bool) -> Self {
        let (modules, external) = registry.closure(entries);
        Self {
            entries: entries.to_vec(),
            modules: modules.into_iter().cloned().collect(),
            external,
            coverage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerFlow {
    Continue,
    /// Remove every subscription of this listener.
    Detach,
}

pub trait RunListener {
    fn on_event(&mut self, event: &RunEvent) -> ListenerFlow;
}

pub type SharedListener = Rc<RefCell<dyn RunListener>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    listener: SharedListener,
}

/// The engine proper: loads a context and emits lifecycle events.
pub trait EngineBackend {
    /// Forget the previously loaded context and its outputs.
    fn clear(&mut self);
    fn load(&mut self, context: &ExecutionContext) -> Result<(), EngineError>;
    /// Execute the loaded context, passing each event to `emit` in order.
    fn run(&mut self, emit: &mut dyn FnMut(RunEvent)) -> Result<(), EngineError>;
    /// Report document of the last run.
    fn report_fragment(&self) -> Result<String, EngineError>;
    /// Coverage records of the last run.
    fn coverage_fragment(&self) -> Result<CoverageMap, EngineError>;
}

pub struct EngineSession<B: EngineBackend> {
    backend: B,
    subscriptions: Vec<Subscription>,
    next_id: u64,
    loaded: bool,
}

impl<B: EngineBackend> EngineSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            subscriptions: Vec::new(),
            next_id: 0,
            loaded: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: SharedListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, kind, listener });
        id
    }

    /// Returns false if no such subscription exists.
    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| !(sub.id == id && sub.kind == kind));
        self.subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn clear(&mut self) {
        self.backend.clear();
        self.loaded = false;
    }

    pub fn load(&mut self, context: &ExecutionContext) -> Result<(), EngineError> {
        self.backend.load(context)?;
        self.loaded = true;
        Ok(())
    }

    pub fn run(&mut self) -> Result<(), EngineError> {
        if !self.loaded {
            return Err(EngineError::Backend("run called before load".to_string()));
        }
        let Self {
            backend,
            subscriptions,
            ..
        } = self;
        backend.run(&mut |event| dispatch(subscriptions, &event))
    }

    pub fn report_fragment(&self) -> Result<String, EngineError> {
        self.backend.report_fragment()
    }

    pub fn coverage_fragment(&self) -> Result<CoverageMap, EngineError> {
        self.backend.coverage_fragment()
    }
}

fn listener_key(listener: &SharedListener) -> *const () {
    Rc::as_ptr(listener) as *const ()
}

fn dispatch(subscriptions: &mut Vec<Subscription>, event: &RunEvent) {
    let kind = event.kind();
    let targets: Vec<(SubscriptionId, SharedListener)> = subscriptions
        .iter()
        .filter(|sub| sub.kind == kind)
        .map(|sub| (sub.id, Rc::clone(&sub.listener)))
        .collect();
    for (id, listener) in targets {
        // A listener detached earlier in this dispatch must not see the event.
        if !subscriptions.iter().any(|sub| sub.id == id) {
            continue;
        }
        let flow = listener.borrow_mut().on_event(event);
        if flow == ListenerFlow::Detach {
            let key = listener_key(&listener);
            subscriptions.retain(|sub| listener_key(&sub.listener) != key);
        }
    }
}

/// Engine that runs the configured command once per loaded context.
///
/// The command receives `context.json` and a run directory. It prints one JSON
/// event per stdout line and leaves `report.xml` and `coverage.json` in the
/// run directory.
pub struct ProcessBackend {
    argv: Vec<String>,
    output_limit_bytes: usize,
    tmp_root: Option<PathBuf>,
    run_dir: Option<tempfile::TempDir>,
}

#[derive(Serialize)]
struct ContextFile<'a> {
    #[serde(rename = "use")]
    entries: &'a [String],
    modules: BTreeMap<&'a str, &'a ModuleRecord>,
    external: &'a [String],
    coverage: bool,
}

impl ProcessBackend {
    pub fn new(config: &EngineConfig, tmp_root: Option<PathBuf>) -> Self {
        Self {
            argv: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
            tmp_root,
            run_dir: None,
        }
    }

    fn run_dir(&self) -> Result<&Path, EngineError> {
        self.run_dir
            .as_ref()
            .map(|dir| dir.path())
            .ok_or_else(|| EngineError::Backend("no context loaded".to_string()))
    }
}

impl EngineBackend for ProcessBackend {
    fn clear(&mut self) {
        self.run_dir = None;
    }

    #[instrument(
        skip_all,
        fields(entries = context.entries.len(), modules = context.modules.len())
    )]
    fn load(&mut self, context: &ExecutionContext) -> Result<(), EngineError> {
        if let Some(missing) = context.modules.iter().find(|m| !m.fullpath.is_file()) {
            return Err(EngineError::Load(format!(
                "module {} not found at {}",
                missing.name,
                missing.fullpath.display()
            )));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("modrunner-run-");
        let dir = match &self.tmp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| EngineError::Backend(format!("create run directory: {err}")))?;

        let file = ContextFile {
            entries: &context.entries,
            modules: context
                .modules
                .iter()
                .map(|module| (module.name.as_str(), module))
                .collect(),
            external: &context.external,
            coverage: context.coverage,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|err| EngineError::Backend(format!("serialize context: {err}")))?;
        let path = dir.path().join(CONTEXT_FILE);
        fs::write(&path, json)
            .map_err(|err| EngineError::Backend(format!("write {}: {err}", path.display())))?;
        debug!(run_dir = %dir.path().display(), "loaded context");
        self.run_dir = Some(dir);
        Ok(())
    }

    #[instrument(skip_all)]
    fn run(&mut self, emit: &mut dyn FnMut(RunEvent)) -> Result<(), EngineError> {
        let run_dir = self.run_dir()?.to_path_buf();
        let context_path = run_dir.join(CONTEXT_FILE);
        let cmd = command_from_argv(
            &self.argv,
            &[("context", context_path.as_path()), ("out", run_dir.as_path())],
        )
        .map_err(|err| EngineError::Backend(format!("{err:#}")))?;
        let output = run_command(cmd, None, self.output_limit_bytes)
            .map_err(|err| EngineError::Backend(format!("{err:#}")))?;

        let mut completed = false;
        for line in output.stdout_lossy().lines() {
            match parse_wire_line(line) {
                WireLine::Event(event) => {
                    completed |= event.kind() == EventKind::Complete;
                    emit(event);
                }
                WireLine::Error(message) => return Err(EngineError::Load(message)),
                WireLine::Console => debug!(line, "engine output"),
            }
        }
        if !completed {
            return Err(EngineError::Incomplete(format!(
                "exit status {:?}: {}",
                output.status.code(),
                output.stderr_tail(20)
            )));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "engine exited with failure after completing");
        }
        Ok(())
    }

    fn report_fragment(&self) -> Result<String, EngineError> {
        let path = self.run_dir()?.join(REPORT_FILE);
        if !path.exists() {
            warn!(path = %path.display(), "engine wrote no report");
            return Ok(String::new());
        }
        fs::read_to_string(&path)
            .map_err(|err| EngineError::Backend(format!("read {}: {err}", path.display())))
    }

    fn coverage_fragment(&self) -> Result<CoverageMap, EngineError> {
        let path = self.run_dir()?.join(COVERAGE_FILE);
        if !path.exists() {
            return Ok(CoverageMap::new());
        }
        let contents = fs::read(&path)
            .map_err(|err| EngineError::Backend(format!("read {}: {err}", path.display())))?;
        serde_json::from_slice(&contents)
            .map_err(|err| EngineError::Backend(format!("parse {}: {err}", path.display())))
    }
}

#[derive(Debug, PartialEq)]
enum WireLine {
    Event(RunEvent),
    Error(String),
    Console,
}

fn parse_wire_line(line: &str) -> WireLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return WireLine::Console;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return WireLine::Console;
    };
    if value.get("event").and_then(|v| v.as_str()) == Some("error") {
        let message = value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown load error");
        return WireLine::Error(message.to_string());
    }
    match serde_json::from_value::<RunEvent>(value) {
        Ok(event) => WireLine::Event(event),
        Err(_) => WireLine::Console,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::RunTotals;

    #[derive(Default)]
    struct FixedBackend {
        events: Vec<RunEvent>,
    }

    impl EngineBackend for FixedBackend {
        fn clear(&mut self) {}

        fn load(&mut self, _context: &ExecutionContext) -> Result<(), EngineError> {
            Ok(())
        }

        fn run(&mut self, emit: &mut dyn FnMut(RunEvent)) -> Result<(), EngineError> {
            for event in self.events.clone() {
                emit(event);
            }
            Ok(())
        }

        fn report_fragment(&self) -> Result<String, EngineError> {
            Ok(String::new())
        }

        fn coverage_fragment(&self) -> Result<CoverageMap, EngineError> {
            Ok(CoverageMap::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<EventKind>,
        detach_on: Option<EventKind>,
    }

    impl RunListener for Recorder {
        fn on_event(&mut self, event: &RunEvent) -> ListenerFlow {
            self.seen.push(event.kind());
            if Some(event.kind()) == self.detach_on {
                ListenerFlow::Detach
            } else {
                ListenerFlow::Continue
            }
        }
    }

    fn complete() -> RunEvent {
        RunEvent::Complete {
            results: RunTotals::default(),
            tests: Vec::new(),
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext {
            entries: vec!["a-tests".to_string()],
            modules: Vec::new(),
            external: Vec::new(),
            coverage: false,
        }
    }

    #[test]
    fn detached_listener_sees_nothing_after_detaching() {
        let backend = FixedBackend {
            events: vec![RunEvent::Begin, complete(), RunEvent::Begin, complete()],
        };
        let mut session = EngineSession::new(backend);
        let recorder = Rc::new(RefCell::new(Recorder {
            detach_on: Some(EventKind::Complete),
            ..Recorder::default()
        }));
        for kind in EventKind::ALL {
            session.subscribe(kind, recorder.clone());
        }
        session.load(&context()).expect("load");
        session.run().expect("run");

        assert_eq!(
            recorder.borrow().seen,
            vec![EventKind::Begin, EventKind::Complete]
        );
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_removes_only_that_kind() {
        let backend = FixedBackend {
            events: vec![RunEvent::Begin, complete()],
        };
        let mut session = EngineSession::new(backend);
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let begin = session.subscribe(EventKind::Begin, recorder.clone());
        session.subscribe(EventKind::Complete, recorder.clone());

        assert!(session.unsubscribe(EventKind::Begin, begin));
        assert!(!session.unsubscribe(EventKind::Begin, begin));
        session.load(&context()).expect("load");
        session.run().expect("run");
        assert_eq!(recorder.borrow().seen, vec![EventKind::Complete]);
    }

    #[test]
    fn run_requires_load() {
        let mut session = EngineSession::new(FixedBackend::default());
        assert!(session.run().is_err());
        session.load(&context()).expect("load");
        session.clear();
        assert!(session.run().is_err());
    }

    #[test]
    fn wire_lines_are_classified() {
        assert_eq!(parse_wire_line("plain console text"), WireLine::Console);
        assert_eq!(parse_wire_line(r#"{"not":"an event"}"#), WireLine::Console);
        assert_eq!(
            parse_wire_line(r#"{"event":"error","message":"bad module"}"#),
            WireLine::Error("bad module".to_string())
        );
        assert_eq!(
            parse_wire_line(r#"  {"event":"suite-begin","suite":"s"}"#),
            WireLine::Event(RunEvent::SuiteBegin {
                suite: "s".to_string()
            })
        );
    }

    #[test]
    fn load_rejects_missing_module_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut backend = ProcessBackend::new(&EngineConfig::default(), Some(temp.path().into()));
        let mut ctx = context();
        ctx.modules.push(ModuleRecord {
            name: "a-tests".to_string(),
            fullpath: temp.path().join("missing.js"),
            requires: Vec::new(),
        });
        let err = backend.load(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[cfg(unix)]
    fn sh_engine(script: &str) -> EngineConfig {
        EngineConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "engine".to_string(),
                "{context}".to_string(),
                "{out}".to_string(),
            ],
            ..EngineConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_backend_streams_events_and_reads_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"
test -f "$1" || exit 9
echo "console noise"
echo '{"event":"begin"}'
echo '{"event":"case-failure","case":"c","test":"t","message":"m"}'
echo '{"event":"complete","results":{"passed":2,"failed":1}}'
printf '<testsuites><testsuite name="s"/></testsuites>' > "$2/report.xml"
printf '{"a.js":{"lines":1}}' > "$2/coverage.json"
"#;
        let mut backend = ProcessBackend::new(&sh_engine(script), Some(temp.path().into()));
        backend.load(&context()).expect("load");
        let mut events = Vec::new();
        backend.run(&mut |event| events.push(event)).expect("run");

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            RunEvent::Complete {
                results: RunTotals {
                    passed: 2,
                    failed: 1,
                    ..RunTotals::default()
                },
                tests: Vec::new(),
            }
        );
        assert!(backend.report_fragment().expect("report").contains("name=\"s\""));
        assert!(backend.coverage_fragment().expect("coverage").contains_key("a.js"));
    }

    #[cfg(unix)]
    #[test]
    fn process_backend_reports_load_errors_and_missing_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut failing = ProcessBackend::new(
            &sh_engine(r#"echo '{"event":"error","message":"cannot load x"}'"#),
            Some(temp.path().into()),
        );
        failing.load(&context()).expect("load");
        let err = failing.run(&mut |_| {}).unwrap_err();
        assert_eq!(err, EngineError::Load("cannot load x".to_string()));

        let mut crashing = ProcessBackend::new(
            &sh_engine("echo '{\"event\":\"begin\"}'; echo died >&2; exit 1"),
            Some(temp.path().into()),
        );
        crashing.load(&context()).expect("load");
        let err = crashing.run(&mut |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::Incomplete(ref msg) if msg.contains("died")));
    }
}

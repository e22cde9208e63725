//! Session orchestration: startup, the execution lock, interrupts, and the
//! path every run request takes.
//!
//! ```text
//! Init -> Starting -> Ready <-> Running
//!                       \-> Terminating
//! ```
//!
//! Every request, interactive or remote, goes through [`Session::submit`]:
//! refresh changed files, run, replay the configuration snapshot. The whole
//! sequence holds the execution lock, so runs never overlap.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::args::expand_globs;
use crate::core::cancel::CancelToken;
use crate::core::result::{RunHistory, RunResult};
use crate::io::config::Profile;
use crate::io::history::append_history;
use crate::io::output::{BufferSink, Sink, SharedSink, ThreadRouter};
use crate::io::server::{RequestHandler, ServerHandle, serve};
use crate::io::watcher::{FileTracker, WorldLoader};
use crate::runner::{RunContext, RunError, Runner};
use crate::snapshot::{ConfigCache, ReplayError};
use crate::suite::config::{ConfigOp, ConfigOpKind, Configuration, Configure};
use crate::suite::world::{LoadError, RegisteredShared, World, display_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Starting,
    Ready,
    Running,
    Terminating,
}

/// Channel a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Interactive,
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Interactive => write!(f, "interactive"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

/// One run request.
pub struct ExecutionRequest {
    /// Arguments as typed; globs are expanded on submission.
    pub args: Vec<String>,
    pub origin: Origin,
    /// Where the run's report goes.
    pub out: SharedSink,
    pub cancel: CancelToken,
}

impl ExecutionRequest {
    pub fn new(args: Vec<String>, origin: Origin, out: SharedSink) -> Self {
        Self {
            args,
            origin,
            out,
            cancel: CancelToken::new(),
        }
    }
}

/// What an interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// The active run was asked to stop after its current group.
    Cancelled,
    /// No run was active; the caller should end the process.
    Terminate,
}

/// Called for every shared group (re)defined by a refresh.
pub type TypeHook = Box<dyn Fn(&RegisteredShared) + Send + Sync>;

pub struct SessionOptions {
    /// Project root; relative paths in the profile resolve against it.
    pub root: PathBuf,
    pub profile: Profile,
    /// The terminal.
    pub console: SharedSink,
}

/// State guarded by the execution lock.
struct Engine {
    config: Configuration,
    world: World,
    cache: ConfigCache,
    tracker: Option<FileTracker>,
    history: RunHistory,
}

struct Shared {
    root: PathBuf,
    profile: Profile,
    router: Arc<ThreadRouter>,
    engine: Mutex<Engine>,
    /// Cancellation token of the run holding the execution lock.
    active: RwLock<Option<CancelToken>>,
    state: Mutex<SessionState>,
    startup: Mutex<Option<JoinHandle<()>>>,
    startup_output: Arc<BufferSink>,
    hooks: Mutex<Vec<TypeHook>>,
    server: Mutex<Option<ServerHandle>>,
}

/// Handle to the warm session. Clones share the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let SessionOptions {
            root,
            profile,
            console,
        } = options;
        let router = Arc::new(ThreadRouter::new(console));
        let engine = Engine {
            config: Configuration::new(router.clone()),
            world: World::new(),
            cache: ConfigCache::new(profile.replay_exclusions.clone()),
            tracker: None,
            history: RunHistory::new(profile.results_retained),
        };
        Self {
            shared: Arc::new(Shared {
                root,
                profile,
                router,
                engine: Mutex::new(engine),
                active: RwLock::new(None),
                state: Mutex::new(SessionState::Init),
                startup: Mutex::new(None),
                startup_output: Arc::new(BufferSink::new()),
                hooks: Mutex::new(Vec::new()),
                server: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn profile(&self) -> &Profile {
        &self.shared.profile
    }

    /// Output router; the calling thread's route, else the console.
    pub fn router(&self) -> &Arc<ThreadRouter> {
        &self.shared.router
    }

    /// Register a hook for shared groups (re)defined by refreshes.
    pub fn on_type_defined(&self, hook: TypeHook) {
        self.shared.hooks.lock().push(hook);
    }

    /// Record the configuration snapshot and install the file tracker in the
    /// background, then start the remote server if a port is configured.
    ///
    /// Startup output is buffered and shown before the first command.
    pub fn boot(&self) -> Result<()> {
        self.set_state(SessionState::Starting);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("warmspec-startup".to_string())
            .spawn(move || startup(&shared))
            .context("spawn startup thread")?;
        *self.shared.startup.lock() = Some(handle);

        if let Some(port) = self.shared.profile.server_port {
            let handler = Arc::new(RemoteHandler {
                session: self.clone(),
            });
            let server = serve(port, handler).with_context(|| format!("start server on port {port}"))?;
            info!(addr = %server.local_addr(), "remote command server listening");
            *self.shared.server.lock() = Some(server);
        }
        Ok(())
    }

    /// Boot, run the interactive shell on `input` until it exits, then stop.
    pub fn start(&self, input: &mut impl std::io::BufRead) -> Result<i32> {
        self.boot()?;
        let code = crate::shell::run_shell(self, input);
        self.stop();
        Ok(code)
    }

    /// Address of the remote server, if running.
    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared
            .server
            .lock()
            .as_ref()
            .map(ServerHandle::local_addr)
    }

    /// Wait for the startup thread, then show what it printed.
    pub fn await_startup(&self) {
        let mut startup = self.shared.startup.lock();
        let Some(handle) = startup.take() else {
            return;
        };
        if handle.join().is_err() {
            error!("startup thread panicked");
        }
        let buffered = self.shared.startup_output.take();
        if !buffered.is_empty() {
            self.shared.router.default_slot().print(&buffered);
        }
    }

    /// Run a request from the shell. The report goes to this thread's route
    /// (the console, normally). A run that executed is appended to the
    /// history file.
    pub fn submit_interactive_request(&self, args: Vec<String>) -> Result<RunResult, RunError> {
        let line = shlex::try_join(std::iter::once("run").chain(args.iter().map(String::as_str)))
            .unwrap_or_else(|_| format!("run {}", args.join(" ")));
        let out: SharedSink = self.shared.router.clone();
        let result = self.submit(ExecutionRequest::new(args, Origin::Interactive, out))?;

        let history_path = Profile::resolve(&self.shared.root, &self.shared.profile.history_path);
        if let Err(err) = append_history(&history_path, &line) {
            warn!(error = %format!("{err:#}"), "could not append to history");
        }
        Ok(result)
    }

    /// Run one request under the execution lock: refresh, run, replay.
    pub fn submit(&self, request: ExecutionRequest) -> Result<RunResult, RunError> {
        self.await_startup();
        let ExecutionRequest {
            args,
            origin,
            out,
            cancel,
        } = request;
        let args = expand_globs(&self.shared.root, &args);
        let runner = Runner::new(&args)?.with_cancel_token(cancel.clone());

        let mut engine = self.shared.engine.lock();
        debug!(%origin, ?args, "run starting");
        self.set_state(SessionState::Running);
        *self.shared.active.write() = Some(cancel);

        let outcome = self.execute(&mut engine, &runner, out);

        *self.shared.active.write() = None;
        let replayed = reset_engine(&mut engine);
        if let Ok(result) = &outcome {
            engine.history.push(result.clone());
        }
        drop(engine);
        self.set_state_unless_terminating(SessionState::Ready);

        let result = outcome?;
        replayed?;
        info!(%origin, exit_code = result.exit_code, success = result.success, "run finished");
        Ok(result)
    }

    fn execute(&self, engine: &mut Engine, runner: &Runner, out: SharedSink) -> Result<RunResult, RunError> {
        self.refresh_locked(engine)?;
        let Engine { config, world, .. } = engine;
        runner.run(RunContext {
            root: &self.shared.root,
            config,
            world,
            out,
        })
    }

    /// Reload changed files now. Idempotent: nothing pending, nothing loaded.
    pub fn refresh(&self) -> Result<usize, LoadError> {
        self.await_startup();
        let mut engine = self.shared.engine.lock();
        self.refresh_locked(&mut engine)
    }

    fn refresh_locked(&self, engine: &mut Engine) -> Result<usize, LoadError> {
        let Engine {
            config,
            world,
            cache,
            tracker,
            ..
        } = engine;
        let Some(tracker) = tracker.as_mut() else {
            return Ok(0);
        };
        let hooks = self.shared.hooks.lock();
        let mut redefined = Vec::new();
        let mut loader = WorldLoader {
            root: &self.shared.root,
            world,
            config,
        };
        let reloaded = tracker.refresh(&mut loader, &mut |registration: &RegisteredShared| {
            for hook in hooks.iter() {
                hook(registration);
            }
            redefined.push(registration.clone());
        });
        // Files loaded before a failure are not retried; keep what they defined.
        for registration in redefined {
            cache.restash_shared(registration);
        }
        reloaded
    }

    /// Cancel the active run, or report that the session should end.
    pub fn interrupt(&self) -> InterruptAction {
        match self.shared.active.read().as_ref() {
            Some(token) => {
                info!("interrupt: cancelling active run");
                token.cancel();
                InterruptAction::Cancelled
            }
            None => InterruptAction::Terminate,
        }
    }

    /// Retained run results, oldest first.
    pub fn results(&self) -> Vec<RunResult> {
        self.shared.engine.lock().history.iter().cloned().collect()
    }

    pub fn has_snapshot(&self) -> bool {
        self.await_startup();
        self.shared.engine.lock().cache.has_snapshot()
    }

    /// Stop the server and the watcher. Waits for an active run to unwind.
    pub fn stop(&self) {
        self.set_state(SessionState::Terminating);
        if let Some(token) = self.shared.active.read().as_ref() {
            token.cancel();
        }
        if let Some(server) = self.shared.server.lock().take() {
            server.stop();
        }
        self.await_startup();
        self.shared.engine.lock().tracker = None;
        debug!("session stopped");
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.shared.state.lock();
        debug!(from = ?*current, to = ?state, "session state");
        *current = state;
    }

    fn set_state_unless_terminating(&self, state: SessionState) {
        let mut current = self.shared.state.lock();
        if *current != SessionState::Terminating {
            *current = state;
        }
    }
}

/// Startup thread body. Output is routed to the startup buffer.
fn startup(shared: &Shared) {
    let buffer: SharedSink = shared.startup_output.clone();
    let _route = shared.router.route(buffer);

    let mut engine = shared.engine.lock();
    let Engine {
        config,
        world,
        cache,
        tracker,
        ..
    } = &mut *engine;

    if let Err(err) = record_configuration(shared, config, world, cache) {
        error!(error = %format!("{err:#}"), "configuration setup failed");
        shared
            .router
            .writeln(&format!("An error occurred while running the init script.\n{err:#}"));
    }

    let profile = &shared.profile;
    let dirs = profile
        .watch_dirs
        .iter()
        .map(|dir| Profile::resolve(&shared.root, dir))
        .collect();
    match FileTracker::new(
        dirs,
        profile.extensions.clone(),
        profile.watch_strategy,
        Duration::from_millis(profile.poll_interval_ms),
    ) {
        Ok(installed) => *tracker = Some(installed),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "file watcher unavailable");
            shared
                .router
                .writeln(&format!("warning: file watcher unavailable: {err:#}"));
        }
    }
    drop(engine);

    let mut state = shared.state.lock();
    if *state == SessionState::Starting {
        *state = SessionState::Ready;
    }
    debug!("startup complete");
}

/// Load the init script through the snapshot recorder. The profile's
/// results path becomes the persistence path unless the script set one.
fn record_configuration(
    shared: &Shared,
    config: &mut Configuration,
    world: &mut World,
    cache: &mut ConfigCache,
) -> Result<()> {
    let profile = &shared.profile;
    cache.record(config, world, |recorder, world| {
        if let Some(script) = &profile.init_script {
            let path = Profile::resolve(&shared.root, script);
            let display = display_path(&script.to_string_lossy());
            world
                .load_source(&path, &display, recorder)
                .with_context(|| format!("load init script {}", path.display()))?;
        }
        let has_persistence_path = recorder
            .log()
            .iter()
            .any(|op| op.kind() == ConfigOpKind::SetPersistencePath);
        if !has_persistence_path {
            recorder.apply(&ConfigOp::SetPersistencePath(profile.results_path.clone()))?;
        }
        Ok(())
    })
}

/// Back to the recorded baseline after a run.
fn reset_engine(engine: &mut Engine) -> Result<(), ReplayError> {
    match engine.cache.replay(&mut engine.config, &mut engine.world) {
        Ok(_) => Ok(()),
        Err(ReplayError::NoSnapshot) => {
            engine.config.reset();
            engine.world.reset();
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "configuration replay failed");
            Err(err)
        }
    }
}

/// Runs remote requests with the connection thread routed to its socket.
struct RemoteHandler {
    session: Session,
}

impl RequestHandler for RemoteHandler {
    fn handle(&self, args: Vec<String>, sink: SharedSink) {
        let router = Arc::clone(self.session.router());
        let _route = router.route(sink);
        let out: SharedSink = router.clone();
        match self.session.submit(ExecutionRequest::new(args, Origin::Remote, out)) {
            Ok(result) => debug!(exit_code = result.exit_code, "remote run finished"),
            Err(err) => router.writeln(&err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;
    use std::fs;

    fn session_in(temp: &tempfile::TempDir, profile: Profile) -> (Session, Arc<BufferSink>) {
        let console = Arc::new(BufferSink::new());
        let session = Session::new(SessionOptions {
            root: temp.path().to_path_buf(),
            profile,
            console: console.clone(),
        });
        (session, console)
    }

    fn write(temp: &tempfile::TempDir, name: &str, contents: &str) {
        let path = temp.path().join(name);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn init_script_becomes_snapshot_and_survives_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp, "spec/helper.ws", "config formatter documentation\nconfig failure_exit_code 5\n");
        write(&temp, "spec/a_spec.ws", "describe a\n  it works\n    expect 1 == 1\n");
        let profile = Profile {
            init_script: Some(PathBuf::from("spec/helper.ws")),
            ..Profile::default()
        };
        let (session, console) = session_in(&temp, profile);
        session.boot().expect("boot");
        assert!(session.has_snapshot());

        for _ in 0..2 {
            let result = session
                .submit_interactive_request(vec!["--format".into(), "progress".into(), "spec/a_spec.ws".into()])
                .expect("run");
            assert!(result.success);
        }
        let engine = session.shared.engine.lock();
        assert_eq!(engine.config.failure_exit_code, 5);
        assert_eq!(engine.config.formatter, crate::suite::config::Formatter::Documentation);
        assert_eq!(
            engine.config.persistence_path,
            Some(PathBuf::from(".warmspec_results"))
        );
        drop(engine);
        assert!(console.contents().contains("1 example, 0 failures"));
        assert_eq!(session.results().len(), 2);
        session.stop();
    }

    #[test]
    fn broken_init_script_is_shown_before_first_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp, "spec/helper.ws", "config no_such_directive\n");
        let profile = Profile {
            init_script: Some(PathBuf::from("spec/helper.ws")),
            ..Profile::default()
        };
        let (session, console) = session_in(&temp, profile);
        session.boot().expect("boot");
        assert!(!session.has_snapshot());
        assert!(console.contents().contains("An error occurred while running the init script."));
        session.stop();
    }

    #[test]
    fn interrupt_without_run_terminates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (session, _) = session_in(&temp, Profile::default());
        assert_eq!(session.interrupt(), InterruptAction::Terminate);
    }

    #[test]
    fn options_error_is_returned_and_session_stays_usable() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp, "spec/a_spec.ws", "describe a\n  it works\n    expect 1 == 1\n");
        let (session, _) = session_in(&temp, Profile::default());
        session.boot().expect("boot");

        let err = session
            .submit_interactive_request(vec!["--bogus".into()])
            .expect_err("bad flag");
        assert!(matches!(err, RunError::Options(_)));
        assert_eq!(session.state(), SessionState::Ready);

        let result = session.submit_interactive_request(Vec::new()).expect("run");
        assert_eq!(result.exit_code, exit_codes::OK);
        session.stop();
        assert_eq!(session.state(), SessionState::Terminating);
    }

    #[test]
    fn successful_interactive_runs_are_appended_to_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp, "spec/a_spec.ws", "describe a\n  it works\n    expect 1 == 1\n");
        let (session, _) = session_in(&temp, Profile::default());
        session.boot().expect("boot");

        session
            .submit_interactive_request(vec!["spec/a_spec.ws".into()])
            .expect("run");
        let _ = session.submit_interactive_request(vec!["--bogus".into()]);

        let history = crate::io::history::read_history(&temp.path().join(".warmspec_history"))
            .expect("history");
        assert_eq!(history, vec!["run spec/a_spec.ws"]);
        session.stop();
    }

    #[test]
    fn refresh_reloads_changed_shared_groups_and_calls_hooks() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp, "spec/a_spec.ws", "describe a\n  include greeting\n");
        write(&temp, "spec/support/shared.ws", "shared greeting\n  it greets\n    expect hi == hi\n");
        let profile = Profile {
            init_script: Some(PathBuf::from("spec/support/shared.ws")),
            ..Profile::default()
        };
        let (session, _) = session_in(&temp, profile);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_type_defined(Box::new(move |registration: &RegisteredShared| {
            sink.lock().push(registration.def.name.clone());
        }));
        session.boot().expect("boot");

        assert!(session.submit_interactive_request(Vec::new()).expect("run").success);

        write(&temp, "spec/support/shared.ws", "shared greeting\n  it greets\n    expect hi == bye\n");
        let file = fs::File::options()
            .write(true)
            .open(temp.path().join("spec/support/shared.ws"))
            .expect("open");
        file.set_modified(std::time::SystemTime::now() + Duration::from_secs(5))
            .expect("mtime");

        assert_eq!(session.refresh().expect("refresh"), 1);
        assert_eq!(session.refresh().expect("refresh"), 0);
        assert_eq!(*seen.lock(), vec!["greeting"]);

        let result = session.submit_interactive_request(Vec::new()).expect("run");
        assert!(!result.success, "reloaded shared group is used");
        session.stop();
    }
}

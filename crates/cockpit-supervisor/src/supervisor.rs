use crate::geometry::GeometrySync;
use crate::platform::{terminate_process, ProcessTable, Termination, WindowHandle, WindowSystem};
use crate::SupervisorError;
use cockpit_core::{Bus, LaunchSpec, PeriodicTask};
use cockpit_storage::JournalStore;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const EXITED_DETAIL: &str = "Process exited.";
pub const TERMINATED_DETAIL: &str = "Process terminated.";
pub const WINDOW_CLOSED_DETAIL: &str = "Window closed.";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub embed_timeout: Duration,
    pub watchdog_interval: Duration,
    pub terminate_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            embed_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(1),
            terminate_grace: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Idle,
    Starting,
    Running,
    Embedded,
    Exiting,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitDetail {
    pub exit_code: Option<i32>,
    pub detail: String,
}

impl ExitDetail {
    fn from_status(status: ExitStatus, detail: &str) -> Self {
        Self {
            exit_code: status.code(),
            detail: detail.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Started { pid: u32 },
    Embedded { pid: u32, window: WindowHandle },
    EmbedTimedOut { elapsed: Duration },
    /// The adopted window disappeared; carries the launcher's exit if it
    /// already happened.
    CloseRequested { exit: Option<ExitDetail> },
    Finished(ExitDetail),
    /// Sent once per shutdown that had to kill something.
    ForceTerminated { pids: Vec<u32> },
    GeometrySync { final_sync: bool },
}

impl SupervisorEvent {
    fn run_log_line(&self) -> Option<String> {
        match self {
            SupervisorEvent::Started { pid } => Some(format!("[supervisor] started pid={pid}")),
            SupervisorEvent::Embedded { pid, window } => {
                Some(format!("[supervisor] embedded pid={pid} window={}", window.0))
            }
            SupervisorEvent::EmbedTimedOut { elapsed } => Some(format!(
                "[supervisor] no window after {}ms",
                elapsed.as_millis()
            )),
            SupervisorEvent::CloseRequested { .. } => Some("[supervisor] window lost".to_string()),
            SupervisorEvent::Finished(exit) => Some(format!(
                "[supervisor] finished exit_code={} {}",
                exit.exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                exit.detail
            )),
            SupervisorEvent::ForceTerminated { pids } => {
                Some(format!("[supervisor] force terminated {pids:?}"))
            }
            SupervisorEvent::GeometrySync { .. } => None,
        }
    }
}

struct Inner {
    state: ProcessState,
    child: Option<Child>,
    launcher_pid: Option<u32>,
    tracked_pid: Option<u32>,
    window: Option<WindowHandle>,
    pending_exit: Option<ExitDetail>,
    started_at: Option<Instant>,
    adoption_abandoned: bool,
    last_watchdog: Instant,
    finished: Option<ExitDetail>,
}

struct Core {
    spec: LaunchSpec,
    config: SupervisorConfig,
    processes: Arc<dyn ProcessTable>,
    windows: Arc<dyn WindowSystem>,
    bus: Option<Bus>,
    journal: Option<Arc<JournalStore>>,
    candidates: RwLock<Vec<PathBuf>>,
    events: Sender<SupervisorEvent>,
    inner: Mutex<Inner>,
}

/// Launches one [`LaunchSpec`], adopts its visible window when the host has
/// one, and reports the lifecycle on a channel, the bus and the task run log.
pub struct ProcessSupervisor {
    core: Arc<Core>,
    poll: Option<PeriodicTask>,
    receiver: Option<Receiver<SupervisorEvent>>,
}

impl ProcessSupervisor {
    pub fn new(
        spec: LaunchSpec,
        config: SupervisorConfig,
        processes: Arc<dyn ProcessTable>,
        windows: Arc<dyn WindowSystem>,
    ) -> Self {
        let (events, receiver) = mpsc::channel();
        let candidates = vec![canonical(&spec.target_path), canonical(&spec.original_path)];
        let core = Core {
            spec,
            config,
            processes,
            windows,
            bus: None,
            journal: None,
            candidates: RwLock::new(candidates),
            events,
            inner: Mutex::new(Inner {
                state: ProcessState::Idle,
                child: None,
                launcher_pid: None,
                tracked_pid: None,
                window: None,
                pending_exit: None,
                started_at: None,
                adoption_abandoned: false,
                last_watchdog: Instant::now(),
                finished: None,
            }),
        };
        Self {
            core: Arc::new(core),
            poll: None,
            receiver: Some(receiver),
        }
    }

    /// Must be called before [`ProcessSupervisor::start`].
    pub fn with_bus(mut self, bus: Bus) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.bus = Some(bus);
        }
        self
    }

    /// Must be called before [`ProcessSupervisor::start`].
    pub fn with_journal(mut self, journal: Arc<JournalStore>) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.journal = Some(journal);
        }
        self
    }

    /// Takes the event receiver; later calls return `None`.
    pub fn events(&mut self) -> Option<Receiver<SupervisorEvent>> {
        self.receiver.take()
    }

    /// Registers another executable image whose window may be adopted.
    pub fn add_candidate(&self, path: impl AsRef<Path>) {
        let path = canonical(path.as_ref());
        let mut candidates = self
            .core
            .candidates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.core.spec
    }

    pub fn state(&self) -> ProcessState {
        self.core.lock().state
    }

    /// The pid currently tracked; a descendant after adoption through one.
    pub fn pid(&self) -> Option<u32> {
        self.core.lock().tracked_pid
    }

    pub fn launcher_pid(&self) -> Option<u32> {
        self.core.lock().launcher_pid
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.core.lock().window
    }

    pub fn pending_exit(&self) -> Option<ExitDetail> {
        self.core.lock().pending_exit.clone()
    }

    pub fn finished(&self) -> Option<ExitDetail> {
        self.core.lock().finished.clone()
    }

    pub fn geometry_sync(&self, settle: Duration) -> std::io::Result<GeometrySync> {
        GeometrySync::new(self.core.events.clone(), settle)
    }

    pub fn start(&mut self) -> Result<u32, SupervisorError> {
        let (program, args) = self
            .core
            .spec
            .argv
            .split_first()
            .ok_or(SupervisorError::EmptyArgv)?;
        {
            let mut inner = self.core.lock();
            if inner.state != ProcessState::Idle {
                return Err(SupervisorError::AlreadyStarted);
            }
            inner.state = ProcessState::Starting;
        }

        let capture = self.core.journal.is_some() && self.core.spec.task_id.is_some();
        let mut command = Command::new(program);
        command.args(args).current_dir(&self.core.spec.cwd).stdin(Stdio::null());
        if capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let detail = format!("failed to start {program}: {source}");
                warn!(program = %program, "process_spawn_failed: {source}");
                let exit = ExitDetail {
                    exit_code: None,
                    detail,
                };
                {
                    let mut inner = self.core.lock();
                    inner.state = ProcessState::Released;
                    inner.finished = Some(exit.clone());
                }
                self.core.emit(SupervisorEvent::Finished(exit));
                return Err(SupervisorError::Spawn {
                    program: program.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        if capture {
            if let Some(stdout) = child.stdout.take() {
                self.core.capture_stream(stdout, "stdout");
            }
            if let Some(stderr) = child.stderr.take() {
                self.core.capture_stream(stderr, "stderr");
            }
        }
        {
            let mut inner = self.core.lock();
            inner.state = ProcessState::Running;
            inner.child = Some(child);
            inner.launcher_pid = Some(pid);
            inner.tracked_pid = Some(pid);
            inner.started_at = Some(Instant::now());
        }
        info!(pid, argv = ?self.core.spec.argv, "process_started");
        self.core.emit(SupervisorEvent::Started { pid });

        let core = Arc::clone(&self.core);
        let poll = PeriodicTask::start("supervisor-poll", self.core.config.poll_interval, move || {
            core.poll();
            Ok(())
        })
        .map_err(SupervisorError::Thread)?;
        self.poll = Some(poll);
        Ok(pid)
    }

    /// Terminates descendants, then the launcher, and releases any adopted
    /// window. Returns the final exit detail.
    pub fn shutdown(&mut self) -> Option<ExitDetail> {
        if let Some(mut poll) = self.poll.take() {
            poll.stop();
        }
        self.core.shutdown()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let released = self.core.lock().state == ProcessState::Released;
        if !released {
            self.shutdown();
        }
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_candidate(&self, image: Option<PathBuf>) -> bool {
        let Some(image) = image else {
            return false;
        };
        let image = canonical(&image);
        self.candidates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&image)
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(bus) = &self.bus {
            let published = match &event {
                SupervisorEvent::Started { pid } => Some((
                    "process.started",
                    json!({"pid": pid, "argv": self.spec.argv, "task_id": self.spec.task_id}),
                )),
                SupervisorEvent::Embedded { pid, window } => Some((
                    "process.embedded",
                    json!({"pid": pid, "window": window.0, "task_id": self.spec.task_id}),
                )),
                SupervisorEvent::Finished(exit) => Some((
                    "process.finished",
                    json!({
                        "exit_code": exit.exit_code,
                        "detail": exit.detail,
                        "task_id": self.spec.task_id,
                    }),
                )),
                _ => None,
            };
            if let Some((topic, payload)) = published {
                if let Err(err) = bus.publish(topic, payload) {
                    warn!(topic, "process_publish_failed: {err}");
                }
            }
        }
        if let (Some(journal), Some(task_id)) = (&self.journal, &self.spec.task_id) {
            if let Some(line) = event.run_log_line() {
                if let Err(err) = journal.append_run_log(task_id, &[line]) {
                    warn!(task_id = %task_id, "run_log_append_failed: {err}");
                }
            }
        }
        let _ = self.events.send(event);
    }

    fn capture_stream<R: Read + Send + 'static>(self: &Arc<Self>, stream: R, label: &'static str) {
        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("cockpit-{label}-capture"))
            .spawn(move || {
                let (Some(journal), Some(task_id)) = (&core.journal, &core.spec.task_id) else {
                    return;
                };
                for line in BufReader::new(stream).lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    let (stdout, stderr) = if label == "stdout" {
                        (line.as_str(), "")
                    } else {
                        ("", line.as_str())
                    };
                    if let Err(err) = journal.append_run_output(task_id, stdout, stderr) {
                        warn!(task_id = %task_id, "run_output_append_failed: {err}");
                    }
                }
            });
        if let Err(err) = spawned {
            warn!("capture_thread_failed: {err}");
        }
    }

    fn reap(inner: &mut Inner) {
        if inner.pending_exit.is_some() {
            return;
        }
        let Some(child) = inner.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(code = ?status.code(), "launcher_exited");
                inner.pending_exit = Some(ExitDetail::from_status(status, EXITED_DETAIL));
            }
            Ok(None) => {}
            Err(err) => debug!("launcher_wait_failed: {err}"),
        }
    }

    fn poll(&self) {
        let mut events = Vec::new();
        let mut lost_window = false;
        {
            let mut inner = self.lock();
            match inner.state {
                ProcessState::Running => self.poll_running(&mut inner, &mut events),
                ProcessState::Embedded => lost_window = self.poll_embedded(&mut inner, &mut events),
                _ => {}
            }
        }
        for event in events {
            self.emit(event);
        }
        if lost_window {
            self.finish_after_window_loss();
        }
    }

    fn poll_running(&self, inner: &mut Inner, events: &mut Vec<SupervisorEvent>) {
        Self::reap(inner);
        if !inner.adoption_abandoned {
            if let Some((pid, window)) = self.find_window(inner) {
                info!(pid, window = window.0, "process_embedded");
                inner.state = ProcessState::Embedded;
                inner.tracked_pid = Some(pid);
                inner.window = Some(window);
                inner.last_watchdog = Instant::now();
                events.push(SupervisorEvent::Embedded { pid, window });
                return;
            }
            let elapsed = inner.started_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed < self.config.embed_timeout {
                return;
            }
            inner.adoption_abandoned = true;
            if self.windows.is_available() {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "embed_timed_out");
            }
            events.push(SupervisorEvent::EmbedTimedOut { elapsed });
        }
        if let Some(exit) = inner.pending_exit.clone() {
            inner.state = ProcessState::Released;
            inner.child = None;
            inner.finished = Some(exit.clone());
            events.push(SupervisorEvent::Finished(exit));
        }
    }

    fn poll_embedded(&self, inner: &mut Inner, events: &mut Vec<SupervisorEvent>) -> bool {
        Self::reap(inner);
        if inner.last_watchdog.elapsed() < self.config.watchdog_interval {
            return false;
        }
        inner.last_watchdog = Instant::now();
        let Some(window) = inner.window else {
            return false;
        };
        if self.windows.is_window(window) {
            return false;
        }
        info!(window = window.0, "embedded_window_lost");
        inner.state = ProcessState::Exiting;
        inner.window = None;
        events.push(SupervisorEvent::CloseRequested {
            exit: inner.pending_exit.clone(),
        });
        true
    }

    fn finish_after_window_loss(&self) {
        let (tracked, launcher) = {
            let inner = self.lock();
            (inner.tracked_pid, inner.launcher_pid)
        };
        if let Some(pid) = tracked.filter(|pid| Some(*pid) != launcher) {
            if terminate_process(self.processes.as_ref(), pid, self.config.terminate_grace) == Termination::Forced {
                warn!(pid, "process_force_terminated");
            }
        }
        let stopped = self.stop_launcher();
        let exit = {
            let mut inner = self.lock();
            let exit = inner
                .pending_exit
                .clone()
                .or(stopped)
                .unwrap_or_else(|| ExitDetail {
                    exit_code: None,
                    detail: WINDOW_CLOSED_DETAIL.to_string(),
                });
            inner.state = ProcessState::Released;
            inner.finished = Some(exit.clone());
            exit
        };
        self.emit(SupervisorEvent::Finished(exit));
    }

    fn find_window(&self, inner: &Inner) -> Option<(u32, WindowHandle)> {
        if !self.windows.is_available() {
            return None;
        }
        let launcher = inner.launcher_pid?;
        if inner.pending_exit.is_none() {
            if let Some(window) = self.windows.main_window(launcher) {
                return Some((launcher, window));
            }
        }
        for pid in self.processes.descendants(launcher) {
            if self.is_candidate(self.processes.image_path(pid)) {
                if let Some(window) = self.windows.main_window(pid) {
                    return Some((pid, window));
                }
            }
        }
        self.windows
            .top_level_windows()
            .into_iter()
            .find(|(_, owner)| self.is_candidate(self.processes.image_path(*owner)))
            .map(|(window, owner)| (owner, window))
    }

    /// Stops the launcher if it is still running and reaps it. Returns its
    /// exit when this call observed it.
    fn stop_launcher(&self) -> Option<ExitDetail> {
        let (child, pid) = {
            let mut inner = self.lock();
            (inner.child.take(), inner.launcher_pid)
        };
        let mut child = child?;
        if let Ok(Some(status)) = child.try_wait() {
            return Some(ExitDetail::from_status(status, EXITED_DETAIL));
        }
        if let Some(pid) = pid {
            self.processes.request_terminate(pid);
        }
        let deadline = Instant::now() + self.config.terminate_grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => return Some(ExitDetail::from_status(status, TERMINATED_DETAIL)),
                Ok(None) => thread::sleep(Duration::from_millis(25)),
                Err(_) => break,
            }
        }
        warn!(pid = ?pid, "launcher_force_killed");
        let _ = child.kill();
        child
            .wait()
            .ok()
            .map(|status| ExitDetail::from_status(status, TERMINATED_DETAIL))
    }

    fn shutdown(&self) -> Option<ExitDetail> {
        let (launcher, tracked, window, already) = {
            let mut inner = self.lock();
            if inner.state == ProcessState::Idle {
                inner.state = ProcessState::Released;
                return None;
            }
            if inner.state != ProcessState::Released {
                inner.state = ProcessState::Exiting;
            }
            (
                inner.launcher_pid,
                inner.tracked_pid,
                inner.window.take(),
                inner.finished.clone(),
            )
        };

        // Enumerate before anything dies so orphans are not missed.
        let mut targets = Vec::new();
        if let Some(pid) = launcher {
            targets.extend(self.processes.descendants(pid));
        }
        if let Some(pid) = tracked.filter(|pid| Some(*pid) != launcher) {
            if !targets.contains(&pid) {
                targets.push(pid);
            }
            for descendant in self.processes.descendants(pid) {
                if !targets.contains(&descendant) {
                    targets.push(descendant);
                }
            }
        }

        let mut forced = Vec::new();
        for pid in targets.iter().rev() {
            if terminate_process(self.processes.as_ref(), *pid, self.config.terminate_grace)
                == Termination::Forced
            {
                forced.push(*pid);
            }
        }
        let stopped = self.stop_launcher();
        if let Some(window) = window {
            self.windows.release(window);
        }
        if !forced.is_empty() {
            warn!(pids = ?forced, "process_force_terminated");
            self.emit(SupervisorEvent::ForceTerminated { pids: forced });
        }

        if already.is_some() {
            self.lock().state = ProcessState::Released;
            return already;
        }
        let exit = {
            let mut inner = self.lock();
            let exit = inner.pending_exit.clone().or(stopped).unwrap_or_else(|| ExitDetail {
                exit_code: None,
                detail: TERMINATED_DETAIL.to_string(),
            });
            inner.state = ProcessState::Released;
            inner.finished = Some(exit.clone());
            exit
        };
        self.emit(SupervisorEvent::Finished(exit.clone()));
        Some(exit)
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

//! Host abstractions the supervisor needs: process enumeration and
//! termination, plus top-level window discovery. Hosts without a window
//! system use [`NoWindows`].

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowHandle(pub u64);

pub trait ProcessTable: Send + Sync {
    /// Every live descendant of `pid`, children before grandchildren.
    fn descendants(&self, pid: u32) -> Vec<u32>;

    fn image_path(&self, pid: u32) -> Option<PathBuf>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Polite termination request (SIGTERM on unix).
    fn request_terminate(&self, pid: u32) -> bool;

    fn force_kill(&self, pid: u32) -> bool;
}

pub trait WindowSystem: Send + Sync {
    /// False when there is nothing to adopt on this host.
    fn is_available(&self) -> bool {
        true
    }

    fn main_window(&self, pid: u32) -> Option<WindowHandle>;

    /// Visible top-level windows with their owning process ids.
    fn top_level_windows(&self) -> Vec<(WindowHandle, u32)>;

    fn is_window(&self, window: WindowHandle) -> bool;

    /// Hands an adopted window back to the desktop.
    fn release(&self, window: WindowHandle);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoWindows;

impl WindowSystem for NoWindows {
    fn is_available(&self) -> bool {
        false
    }

    fn main_window(&self, _pid: u32) -> Option<WindowHandle> {
        None
    }

    fn top_level_windows(&self) -> Vec<(WindowHandle, u32)> {
        Vec::new()
    }

    fn is_window(&self, _window: WindowHandle) -> bool {
        false
    }

    fn release(&self, _window: WindowHandle) {}
}

/// Process table backed by `sysinfo`.
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_process<T>(&self, pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        system.process(pid).map(f)
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::everything());

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (child, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent.as_u32()).or_default().push(child.as_u32());
            }
        }
        for list in children.values_mut() {
            list.sort_unstable();
        }

        let mut found = Vec::new();
        let mut seen = HashSet::from([pid]);
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            for child in children.get(&current).into_iter().flatten() {
                if seen.insert(*child) {
                    found.push(*child);
                    queue.push_back(*child);
                }
            }
        }
        found
    }

    fn image_path(&self, pid: u32) -> Option<PathBuf> {
        self.with_process(pid, |process| process.exe().map(|path| path.to_path_buf()))
            .flatten()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.with_process(pid, |process| process.status() != ProcessStatus::Zombie)
            .unwrap_or(false)
    }

    fn request_terminate(&self, pid: u32) -> bool {
        self.with_process(pid, |process| {
            process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill())
        })
        .unwrap_or(false)
    }

    fn force_kill(&self, pid: u32) -> bool {
        self.with_process(pid, |process| process.kill())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AlreadyGone,
    Exited,
    Forced,
}

/// Requests termination, waits up to `grace`, then kills.
pub fn terminate_process(table: &dyn ProcessTable, pid: u32, grace: Duration) -> Termination {
    if !table.is_alive(pid) {
        return Termination::AlreadyGone;
    }
    table.request_terminate(pid);
    if wait_until_gone(table, pid, grace) {
        return Termination::Exited;
    }
    table.force_kill(pid);
    wait_until_gone(table, pid, grace);
    Termination::Forced
}

fn wait_until_gone(table: &dyn ProcessTable, pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !table.is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

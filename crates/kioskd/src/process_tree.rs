//! Process table access: liveness, process trees and signals.
//!
//! Trees are never tracked incrementally. Callers take a [`ProcessTable`]
//! snapshot from `/proc` at the moment they need one and compute
//! [`descendants_of`] over it.
//!
//! Functions that read `/proc` perform blocking I/O; they are cheap, but
//! full snapshots should go through `spawn_blocking`.

use std::collections::{BTreeSet, HashMap};
use std::io;

use tracing::{debug, trace, warn};

/// Signals the supervisor delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM, the graceful request
    Terminate,
    /// SIGKILL, only used when escalation is enabled
    Kill,
}

impl StopSignal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Snapshot of parent links for every live process.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    /// pid -> parent pid
    parents: HashMap<u32, u32>,
}

impl ProcessTable {
    /// Reads the current process table from `/proc`.
    ///
    /// Processes that vanish while being read, and zombies, are left out.
    pub fn snapshot() -> Self {
        let processes = match procfs::process::all_processes() {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "Failed to read process table");
                return Self::default();
            }
        };

        let mut parents = HashMap::new();
        for process in processes.flatten() {
            let Ok(stat) = process.stat() else { continue };
            if is_dead_state(stat.state) {
                continue;
            }
            let (Ok(pid), Ok(ppid)) = (u32::try_from(stat.pid), u32::try_from(stat.ppid)) else {
                continue;
            };
            parents.insert(pid, ppid);
        }

        trace!(processes = parents.len(), "Captured process table");
        Self { parents }
    }

    /// Builds a table from `(pid, parent_pid)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            parents: entries.into_iter().collect(),
        }
    }

    /// Returns true if the snapshot contains `pid`.
    pub fn contains(&self, pid: u32) -> bool {
        self.parents.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Every process transitively parented by `root` in `table`.
///
/// `root` itself is not included. Cycles in corrupt input terminate.
pub fn descendants_of(table: &ProcessTable, root: u32) -> BTreeSet<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, &ppid) in &table.parents {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut found = BTreeSet::new();
    let mut pending = vec![root];
    while let Some(parent) = pending.pop() {
        for &child in children.get(&parent).into_iter().flatten() {
            if child != root && found.insert(child) {
                pending.push(child);
            }
        }
    }

    found
}

/// Returns true if `pid` names a running (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };

    procfs::process::Process::new(raw_pid)
        .and_then(|process| process.stat())
        .map(|stat| !is_dead_state(stat.state))
        .unwrap_or(false)
}

/// Zombie (`Z`) and dead (`X`/`x`) processes have already exited.
fn is_dead_state(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

/// Sends `signal` to `pid`.
///
/// Returns `Ok(false)` if the process no longer exists. Refuses pid 0,
/// pid 1 and the daemon itself, which would never be meant.
pub fn send_signal(pid: u32, signal: StopSignal) -> io::Result<bool> {
    if pid <= 1 || pid == std::process::id() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }
    let raw_pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;

    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(raw_pid, signal.as_raw()) };
    if result == 0 {
        debug!(pid, signal = ?signal, "Signal delivered");
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(err)
}

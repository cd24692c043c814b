//! Process tree termination
//!
//! The tool under test starts its own children (the dev server), so killing
//! only the direct child would leave a listener behind on the app port.
//! Every spawned command leads its own process group and the group is what
//! gets signalled first. Descendants that moved to a group or session of
//! their own (`setsid`, detached spawns) are found through parent links in
//! the process table and signalled one by one.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::process::SpawnedProcess;
use crate::wait::deadline_after;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signal to deliver to a process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSignal {
    Terminate,
    Kill,
}

impl TreeSignal {
    fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;

        match self {
            TreeSignal::Terminate => Signal::SIGTERM,
            TreeSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// Send a signal to every process in the group led by `pid`.
///
/// A group that no longer exists is not an error.
pub fn signal_tree(pid: u32, signal: TreeSignal) -> E2eResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let sig = signal.as_nix();
    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(E2eError::Termination {
            pid,
            reason: format!("{:?} to group failed: {}", sig, e),
        }),
    }
}

fn signal_pid(leader: u32, pid: u32, signal: TreeSignal) -> E2eResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let sig = signal.as_nix();
    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(E2eError::Termination {
            pid: leader,
            reason: format!("{:?} to descendant {} failed: {}", sig, pid, e),
        }),
    }
}

/// Whether any process of the group led by `pid` is still running
pub fn tree_alive(pid: u32) -> E2eResult<bool> {
    ProcessTree::new(pid).alive()
}

/// One row of the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: u32,
    pub state: char,
    pub ppid: u32,
    pub pgrp: u32,
}

impl ProcEntry {
    /// Zombies hold no resources; reparented ones may linger unreaped
    pub fn running(&self) -> bool {
        self.state != 'Z' && self.state != 'X'
    }
}

/// Snapshot of `/proc`; empty where it cannot be read
#[cfg(target_os = "linux")]
pub fn process_table() -> Vec<ProcEntry> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false)
        })
        // Processes can vanish between listing and reading
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub fn process_table() -> Vec<ProcEntry> {
    Vec::new()
}

/// Parse a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are read after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<ProcEntry> {
    let pid = stat.split_whitespace().next()?.parse().ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some(ProcEntry {
        pid,
        state,
        ppid,
        pgrp,
    })
}

fn group_signalable(pid: u32) -> E2eResult<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        // Exists but belongs to someone else
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(E2eError::Termination {
            pid,
            reason: format!("probing process group failed: {}", e),
        }),
    }
}

/// A spawned command's tree: the leader's process group plus every process
/// reached through parent links from the leader, wherever its group is.
///
/// Parent links break once a parent dies and its children are reparented,
/// so `refresh` has to run while the tree is still intact and members are
/// remembered from then on.
#[derive(Debug, Clone)]
pub struct ProcessTree {
    leader: u32,
    members: BTreeSet<u32>,
}

impl ProcessTree {
    pub fn new(leader: u32) -> Self {
        Self {
            leader,
            members: BTreeSet::new(),
        }
    }

    pub fn leader(&self) -> u32 {
        self.leader
    }

    /// Descendants found so far, excluding the leader
    pub fn members(&self) -> &BTreeSet<u32> {
        &self.members
    }

    /// Pick up new descendants and forget members that have exited
    pub fn refresh(&mut self) {
        let table = process_table();
        self.absorb(&table);
    }

    fn absorb(&mut self, table: &[ProcEntry]) {
        self.members
            .retain(|pid| table.iter().any(|e| e.pid == *pid && e.running()));

        loop {
            let before = self.members.len();
            for entry in table {
                if entry.pid != self.leader
                    && entry.running()
                    && (entry.ppid == self.leader || self.members.contains(&entry.ppid))
                {
                    self.members.insert(entry.pid);
                }
            }
            if self.members.len() == before {
                break;
            }
        }
    }

    /// Signal the group, then every known descendant outside it
    pub fn signal(&self, signal: TreeSignal) -> E2eResult<()> {
        signal_tree(self.leader, signal)?;
        for pid in &self.members {
            signal_pid(self.leader, *pid, signal)?;
        }
        Ok(())
    }

    /// Whether the group or any known descendant is still running
    pub fn alive(&mut self) -> E2eResult<bool> {
        let table = process_table();
        if table.is_empty() {
            return group_signalable(self.leader);
        }

        self.absorb(&table);
        Ok(table
            .iter()
            .any(|e| e.running() && (e.pgrp == self.leader || self.members.contains(&e.pid))))
    }
}

/// Kills spawned process trees and waits until they are gone
#[derive(Debug, Clone)]
pub struct ProcessTerminator {
    grace: Duration,
    confirm_timeout: Duration,
}

impl Default for ProcessTerminator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

impl ProcessTerminator {
    pub fn new(grace: Duration, confirm_timeout: Duration) -> Self {
        Self {
            grace,
            confirm_timeout,
        }
    }

    /// SIGTERM the tree, escalate to SIGKILL after the grace period, and
    /// resolve once the whole tree has exited.
    pub async fn terminate(&self, process: &mut SpawnedProcess) -> E2eResult<()> {
        let pid = process.pid();
        info!("Terminating process tree {} (`{}`)", pid, process.command());

        let mut tree = ProcessTree::new(pid);
        tree.refresh();
        debug!("Process tree {} descendants: {:?}", pid, tree.members());
        tree.signal(TreeSignal::Terminate)?;

        if !self.wait_gone(process, &mut tree, self.grace).await? {
            warn!(
                "Process tree {} still alive after {:?}, sending SIGKILL",
                pid, self.grace
            );
            tree.refresh();
            tree.signal(TreeSignal::Kill)?;

            if !self.wait_gone(process, &mut tree, self.confirm_timeout).await? {
                return Err(E2eError::Termination {
                    pid,
                    reason: format!(
                        "process tree still present {:?} after SIGKILL",
                        self.confirm_timeout
                    ),
                });
            }
        }

        process.mark_released();
        debug!("Process tree {} is gone", pid);
        Ok(())
    }

    /// Reap the leader and poll the tree until it is empty or `within` passes
    async fn wait_gone(
        &self,
        process: &mut SpawnedProcess,
        tree: &mut ProcessTree,
        within: Duration,
    ) -> E2eResult<bool> {
        let deadline = deadline_after(within);
        let mut leader_exited = false;

        loop {
            if !leader_exited {
                leader_exited = process.try_wait()?.is_some();
            }
            if leader_exited && !tree.alive()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

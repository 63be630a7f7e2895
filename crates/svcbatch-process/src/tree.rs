//! Process tree termination.
//!
//! A single snapshot of the process table is taken per sweep. The tree below
//! the root is walked breadth-first with an explicit worklist; draining the
//! resulting list in reverse kills every child before its parent.

use std::collections::{HashMap, HashSet, VecDeque};
use svcbatch_common::{Error, Result};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Console host processes share the service console and must survive the sweep.
const SKIPPED_IMAGES: &[&str] = &["conhost.exe"];

/// One row of a process table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
}

impl ProcessEntry {
    pub fn new(pid: u32, parent: Option<u32>, name: impl Into<String>) -> Self {
        Self {
            pid,
            parent,
            name: name.into(),
        }
    }
}

/// Snapshot of all processes currently running on the host.
pub fn snapshot() -> Vec<ProcessEntry> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    system
        .processes()
        .iter()
        // Linux lists threads as tasks; only real processes are interesting
        .filter(|(_, process)| process.thread_kind().is_none())
        .map(|(pid, process)| ProcessEntry {
            pid: pid.as_u32(),
            parent: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string_lossy().into_owned(),
        })
        .collect()
}

/// Order in which the descendants of `root` must be terminated.
///
/// Every process appears after all of its own descendants. `root` itself is not
/// part of the result. Descendants deeper than `max_depth` (root's children are
/// depth 1) are ignored when a limit is given.
pub fn kill_order(entries: &[ProcessEntry], root: u32, max_depth: Option<usize>) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for entry in entries {
        if SKIPPED_IMAGES
            .iter()
            .any(|name| entry.name.eq_ignore_ascii_case(name))
        {
            continue;
        }
        if let Some(parent) = entry.parent {
            if parent != entry.pid {
                children.entry(parent).or_default().push(entry.pid);
            }
        }
    }

    let mut visited: HashSet<u32> = HashSet::from([root]);
    let mut worklist: VecDeque<(u32, usize)> = VecDeque::from([(root, 0)]);
    let mut order = Vec::new();

    while let Some((pid, depth)) = worklist.pop_front() {
        if max_depth.is_some_and(|limit| depth >= limit) {
            continue;
        }
        let Some(kids) = children.get(&pid) else {
            continue;
        };
        for &child in kids {
            // Recycled PIDs can fabricate cycles
            if visited.insert(child) {
                order.push(child);
                worklist.push_back((child, depth + 1));
            }
        }
    }

    order.reverse();
    order
}

/// Terminate `root` and all of its live descendants.
///
/// `primary` is the supervised child; it is never terminated here because its
/// owner does that itself. Per-process failures do not stop the sweep; the
/// first one is returned once every process has been attempted.
///
/// Returns the number of processes that were terminated.
pub fn kill_tree(root: u32, primary: Option<u32>, exit_code: u32, max_depth: Option<usize>) -> Result<usize> {
    let entries = snapshot();
    kill_tree_with(&entries, root, primary, max_depth, |pid| terminate_checked(pid, exit_code))
}

/// Terminate the leftover descendants of a root that was already reaped.
///
/// `root` itself is never terminated. When its pid shows up in the snapshot it
/// has been reused by an unrelated process, and nothing below it is ours.
pub fn kill_descendants(root: u32, exit_code: u32, max_depth: Option<usize>) -> Result<usize> {
    let entries = snapshot();
    kill_descendants_with(&entries, root, max_depth, |pid| terminate_checked(pid, exit_code))
}

pub fn kill_descendants_with<F>(
    entries: &[ProcessEntry],
    root: u32,
    max_depth: Option<usize>,
    terminate: F,
) -> Result<usize>
where
    F: FnMut(u32) -> Result<bool>,
{
    if entries.iter().any(|entry| entry.pid == root) {
        debug!(pid = root, "Reaped pid was reused, skipping leftover sweep");
        return Ok(0);
    }
    kill_tree_with(entries, root, Some(root), max_depth, terminate)
}

/// [`kill_tree`] over a given snapshot and terminate function.
pub fn kill_tree_with<F>(
    entries: &[ProcessEntry],
    root: u32,
    primary: Option<u32>,
    max_depth: Option<usize>,
    mut terminate: F,
) -> Result<usize>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut targets = kill_order(entries, root, max_depth);
    targets.push(root);

    let mut killed = 0;
    let mut first_error: Option<Error> = None;

    for pid in targets {
        if Some(pid) == primary {
            continue;
        }
        match terminate(pid) {
            Ok(true) => {
                debug!(pid, "Terminated process");
                killed += 1;
            }
            Ok(false) => debug!(pid, "Process already gone"),
            Err(e) => {
                warn!(pid, "Failed to terminate process: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(killed),
    }
}

fn terminate_checked(pid: u32, exit_code: u32) -> Result<bool> {
    if !crate::process_exists(pid)? {
        return Ok(false);
    }
    crate::terminate(pid, exit_code)
}

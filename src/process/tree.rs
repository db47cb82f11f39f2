//! Process tree enumeration over a `sysinfo` process table.

use std::collections::{HashMap, VecDeque};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

/// Refreshes the whole process table with memory counters.
///
/// Dead entries are dropped, so a descendant that exited since the last
/// refresh simply disappears from the tree.
pub fn refresh_table(system: &mut System) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
}

/// All live descendants of `root`, breadth first, excluding `root` itself.
///
/// Threads are listed as processes on some platforms; they share their
/// owner's memory and are skipped.
pub fn descendants(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                // Guards against pid reuse producing a cycle.
                if *kid != root && !found.contains(kid) {
                    found.push(*kid);
                    queue.push_back(*kid);
                }
            }
        }
    }
    found
}

/// Sends SIGKILL to every pid in `pids` that is still in the table.
///
/// Returns how many signals were delivered.
pub fn kill_all(system: &System, pids: &[Pid]) -> usize {
    pids.iter()
        .filter_map(|pid| system.process(*pid))
        .filter(|process| process.kill_with(Signal::Kill).unwrap_or(false))
        .count()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_descendants_of_nonexistent_root_is_empty() {
        let mut system = System::new();
        refresh_table(&mut system);
        assert!(descendants(&system, Pid::from_u32(u32::MAX - 1)).is_empty());
    }

    #[test]
    fn test_descendants_finds_grandchild_and_kill_all_stops_it() {
        // sh -> sh -> sleep, so the sleep is a grandchild of the spawned root.
        let mut child = Command::new("/bin/sh")
            .args(["-c", "/bin/sh -c 'sleep 30; true' & wait"])
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let root = Pid::from_u32(child.id());

        let mut system = System::new();
        let mut found = Vec::new();
        for _ in 0..50 {
            refresh_table(&mut system);
            found = descendants(&system, root);
            if found.len() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(found.len() >= 2, "expected grandchild, found {:?}", found);

        assert!(kill_all(&system, &found) >= 1);
        child.kill().unwrap();
        child.wait().unwrap();

        thread::sleep(Duration::from_millis(100));
        refresh_table(&mut system);
        for pid in &found {
            let alive = system
                .process(*pid)
                .map(|p| p.status() != sysinfo::ProcessStatus::Zombie)
                .unwrap_or(false);
            assert!(!alive, "descendant {} survived", pid);
        }
    }
}

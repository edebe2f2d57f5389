use std::collections::HashSet;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

// Guards the parent walk against cycles in a racy process table snapshot.
const MAX_ANCESTRY_DEPTH: usize = 64;

/// Sends SIGTERM (or a hard kill where unsupported) to every process whose
/// name matches `process_names` and which is neither a tracked pid nor a
/// descendant of one. Returns how many processes were signalled.
pub fn terminate_untracked(process_names: &[String], tracked: &HashSet<u32>) -> usize {
    if process_names.is_empty() {
        return 0;
    }

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let own_pid = sysinfo::get_current_pid().ok();

    let mut terminated = 0;
    for (pid, process) in system.processes() {
        let name = process.name().to_string_lossy();
        if !matches_process_name(&name, process_names) {
            continue;
        }
        if Some(*pid) == own_pid || descends_from_tracked(&system, *pid, tracked) {
            continue;
        }

        let signalled = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if signalled {
            tracing::warn!("Terminated orphaned browser process {} ({})", pid, name);
            terminated += 1;
        }
    }

    terminated
}

/// Case-insensitive prefix match, so `chrome` also covers `chrome_crashpad`.
pub fn matches_process_name(name: &str, process_names: &[String]) -> bool {
    let name = name.to_lowercase();
    process_names
        .iter()
        .any(|candidate| name.starts_with(&candidate.to_lowercase()))
}

fn descends_from_tracked(system: &System, pid: Pid, tracked: &HashSet<u32>) -> bool {
    let mut current = Some(pid);
    let mut depth = 0;

    while let Some(pid) = current {
        if tracked.contains(&pid.as_u32()) {
            return true;
        }
        depth += 1;
        if depth > MAX_ANCESTRY_DEPTH {
            break;
        }
        current = system.process(pid).and_then(|p| p.parent());
    }

    false
}

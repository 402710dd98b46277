//! Platform-specific termination and PID-tree force-kill.

use crate::error::SupervisorError;

#[cfg(unix)]
pub fn send_terminate(pid: u32) -> Result<(), SupervisorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| SupervisorError::StartFailed(e.to_string()))
}

#[cfg(windows)]
pub fn send_terminate(pid: u32) -> Result<(), SupervisorError> {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        return Err(SupervisorError::StartFailed("GenerateConsoleCtrlEvent failed".into()));
    }
    Ok(())
}

/// Force-kill a PID and every descendant. Used after `stop()`'s grace
/// period expires.
#[cfg(target_os = "linux")]
pub fn kill_tree(pid: u32) {
    let descendants = collect_descendants_linux(pid);
    for p in descendants.into_iter().chain(std::iter::once(pid)) {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(p as i32), nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(target_os = "linux")]
fn collect_descendants_linux(root: u32) -> Vec<u32> {
    let mut children_of: std::collections::HashMap<u32, Vec<u32>> = std::collections::HashMap::new();

    let Ok(entries) = std::fs::read_dir("/proc") else { return Vec::new() };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
        let stat_path = entry.path().join("stat");
        let Ok(stat) = std::fs::read_to_string(&stat_path) else { continue };
        // Format: "pid (comm) state ppid ...". `comm` may itself contain
        // spaces or parens, so split on the last ')' before reading ppid.
        let Some(after_comm) = stat.rsplit_once(')') else { continue };
        let fields: Vec<&str> = after_comm.1.split_whitespace().collect();
        let Some(ppid_str) = fields.get(1) else { continue };
        let Ok(ppid) = ppid_str.parse::<u32>() else { continue };
        children_of.entry(ppid).or_default().push(pid);
    }

    let mut out = Vec::new();
    let mut queue = std::collections::VecDeque::from([root]);
    while let Some(p) = queue.pop_front() {
        if let Some(children) = children_of.get(&p) {
            for &c in children {
                out.push(c);
                queue.push_back(c);
            }
        }
    }
    out
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn kill_tree(pid: u32) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL);
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill").args(["/PID", &pid.to_string(), "/T", "/F"]).status();
}

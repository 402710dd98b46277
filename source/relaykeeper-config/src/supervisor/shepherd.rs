//! Privileged Launch Path, used only when the authored configuration
//! contains a "tun" entry. macOS-only: the elevated-execute
//! primitive and credential prompting are themselves platform black boxes
//! out of scope here, so they sit behind the injectable [`ElevatedExecutor`]
//! trait.

use std::any::Any;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::SupervisorError;

/// Abstraction over the platform's elevated-execute primitive. A real
/// implementation shells out to `AuthorizationExecuteWithPrivileges` (or its
/// modern replacement); tests substitute a fake that replays canned output.
pub trait ElevatedExecutor: Send + Sync {
    /// Run `command` with elevated privileges. `cached` is the
    /// authorization handle from a prior call, if any is being reused, so
    /// the implementation can skip a second credential prompt.
    fn execute(&self, command: &str, cached: Option<&(dyn Any + Send)>) -> Result<ElevatedRun, SupervisorError>;

    /// Release a cached authorization handle on graceful exit.
    fn release(&self, handle: Box<dyn Any + Send>);
}

pub struct ElevatedRun {
    pub stdout_lines: Vec<String>,
    pub authorization: Box<dyn Any + Send>,
}

fn shepherd_script(bin_dir: &Path, core_binary: &Path, config_name: &str, log_path: &Path) -> String {
    format!(
        "echo $$\ncd {}\n{} run -c {} >> {} 2>&1 &\necho $!\nexec 1>>\"{}\" 2>&1\nwait\n",
        shell_quote(&bin_dir.display().to_string()),
        shell_quote(&core_binary.display().to_string()),
        shell_quote(config_name),
        shell_quote(&log_path.display().to_string()),
        log_path.display(),
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Writes the shepherd script into the binary directory with `0700`
/// permissions and returns its path.
pub fn write_shepherd_script(bin_dir: &Path, core_binary: &Path, config_name: &str, log_path: &Path) -> Result<PathBuf, SupervisorError> {
    let script_path = bin_dir.join("relaykeeper-shepherd.sh");
    let body = shepherd_script(bin_dir, core_binary, config_name, log_path);
    std::fs::write(&script_path, body).map_err(|e| SupervisorError::StartFailed(e.to_string()))?;
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| SupervisorError::StartFailed(e.to_string()))?;
    Ok(script_path)
}

/// Holds the two PIDs from a privileged launch and the reusable
/// authorization handle. Released on drop.
pub struct PrivilegedLaunch {
    executor: Box<dyn ElevatedExecutor>,
    authorization: Option<Box<dyn Any + Send>>,
    pub shepherd_pid: Option<u32>,
    pub child_pid: Option<u32>,
    pid_file: PathBuf,
}

impl PrivilegedLaunch {
    pub fn new(executor: Box<dyn ElevatedExecutor>, pid_file: PathBuf) -> Self {
        Self { executor, authorization: None, shepherd_pid: None, child_pid: None, pid_file }
    }

    /// Starts the shepherd. The first call prompts for credentials; later
    /// calls within the process lifetime reuse the cached handle.
    pub fn start(&mut self, script_path: &Path) -> Result<(u32, u32), SupervisorError> {
        let run = self.executor.execute(&script_path.display().to_string(), self.authorization.as_deref())?;

        let [shepherd_line, child_line] = run
            .stdout_lines
            .get(0..2)
            .and_then(|s| <&[String; 2]>::try_from(s).ok())
            .ok_or_else(|| SupervisorError::StartFailed("elevated primitive did not yield two pid lines".into()))?
            .clone();

        let shepherd_pid: u32 = shepherd_line.trim().parse().map_err(|_| SupervisorError::StartFailed("invalid shepherd pid".into()))?;
        let child_pid: u32 = child_line.trim().parse().map_err(|_| SupervisorError::StartFailed("invalid child pid".into()))?;

        std::fs::write(&self.pid_file, format!("{shepherd_pid}\n{child_pid}\n")).map_err(|e| SupervisorError::StartFailed(e.to_string()))?;

        self.authorization = Some(run.authorization);
        self.shepherd_pid = Some(shepherd_pid);
        self.child_pid = Some(child_pid);
        Ok((shepherd_pid, child_pid))
    }

    /// Stop without a second credential prompt, reusing the cached handle.
    pub fn stop(&mut self) -> Result<(), SupervisorError> {
        let (Some(shepherd_pid), Some(child_pid)) = (self.shepherd_pid, self.child_pid) else {
            return Ok(());
        };
        let command = format!(
            "kill -TERM {shepherd_pid}; kill -TERM {child_pid}; rm -f {}",
            shell_quote(&self.pid_file.display().to_string())
        );
        self.executor.execute(&command, self.authorization.as_deref())?;
        self.shepherd_pid = None;
        self.child_pid = None;
        Ok(())
    }
}

impl Drop for PrivilegedLaunch {
    fn drop(&mut self) {
        if let Some(handle) = self.authorization.take() {
            self.executor.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeExecutor {
        prompts: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    struct FakeAuthorization;

    impl ElevatedExecutor for FakeExecutor {
        fn execute(&self, _command: &str, cached: Option<&(dyn Any + Send)>) -> Result<ElevatedRun, SupervisorError> {
            if cached.is_none() {
                self.prompts.fetch_add(1, Ordering::SeqCst);
            }
            Ok(ElevatedRun { stdout_lines: vec!["111".into(), "222".into()], authorization: Box::new(FakeAuthorization) })
        }

        fn release(&self, _handle: Box<dyn Any + Send>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn shepherd_script_quotes_every_path_segment() {
        let script = shepherd_script(Path::new("/opt/bin dir"), Path::new("/opt/bin dir/core"), "config.json", Path::new("/var/log/core.log"));
        assert!(script.contains("'/opt/bin dir'"));
        assert!(script.starts_with("echo $$\n"));
        assert!(script.trim_end().ends_with("wait"));
    }

    #[test]
    fn reuses_authorization_handle_across_start_and_stop() {
        let prompts = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let executor = FakeExecutor { prompts: prompts.clone(), releases: releases.clone() };

        let pid_file = std::env::temp_dir().join("relaykeeper-test-pidfile");
        let mut launch = PrivilegedLaunch::new(Box::new(executor), pid_file.clone());

        let (shepherd, child) = launch.start(Path::new("/opt/bin/relaykeeper-shepherd.sh")).unwrap();
        assert_eq!((shepherd, child), (111, 222));
        assert_eq!(prompts.load(Ordering::SeqCst), 1);

        launch.stop().unwrap();
        assert_eq!(prompts.load(Ordering::SeqCst), 1, "stop must not prompt a second time");

        drop(launch);
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_file(pid_file);
    }
}

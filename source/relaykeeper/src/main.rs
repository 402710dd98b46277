mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use relaykeeper_config::control::ControlClient;
use relaykeeper_config::logsink::LogSinks;
use relaykeeper_config::service::ConfigurationService;
use relaykeeper_config::supervisor::{killtree, Supervisor, SupervisorConfig};

use cli::{Cli, Command};

const USER_AGENT: &str = concat!("relaykeeper/", env!("CARGO_PKG_VERSION"));
const PID_FILE_NAME: &str = "relaykeeper.pid";

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_target(false).init();

    let sinks = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).into_diagnostic().wrap_err("failed to create log directory")?;
            LogSinks::files(dir)
        }
        None => LogSinks::stdout(),
    };

    let rt = tokio::runtime::Runtime::new().into_diagnostic().wrap_err("failed to build Tokio runtime")?;
    rt.block_on(dispatch(cli, sinks))
}

async fn dispatch(cli: Cli, sinks: LogSinks) -> miette::Result<()> {
    match cli.command {
        Command::Refresh => refresh(&cli.config, sinks).await,
        Command::Start { core_binary, working_dir, args } => start(&cli.config, core_binary, working_dir, args, sinks).await,
        Command::Stop => stop(&cli.config).await,
        Command::Status => status(&cli.config, cli.json).await,
        Command::Groups { base_url, token } => groups(base_url, token, cli.json, sinks).await,
        Command::Members { base_url, token, group } => members(base_url, token, &group, cli.json, sinks).await,
        Command::Switch { base_url, token, group, member } => switch(base_url, token, &group, &member, sinks).await,
        Command::Probe { base_url, token, reference_url, member } => probe(base_url, token, &member, &reference_url, cli.json, sinks).await,
    }
}

async fn refresh(config_path: &PathBuf, sinks: LogSinks) -> miette::Result<()> {
    let service = ConfigurationService::new(config_path.clone(), USER_AGENT)
        .into_diagnostic()
        .wrap_err("failed to build configuration service")?
        .with_sink(sinks.main);
    service
        .refresh(|percent| tracing::info!(percent, "refresh progress"))
        .await
        .into_diagnostic()
        .wrap_err("configuration refresh failed")?;
    println!("configuration refreshed");
    Ok(())
}

fn pid_file_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name(PID_FILE_NAME)
}

/// Runs in the foreground: spawns the core, records its PID so a separate
/// `stop`/`status` invocation can find it, then blocks until interrupted.
async fn start(config_path: &Path, core_binary: PathBuf, working_dir: Option<PathBuf>, args: Vec<String>, sinks: LogSinks) -> miette::Result<()> {
    let working_dir = working_dir.unwrap_or(std::env::current_dir().into_diagnostic().wrap_err("failed to resolve current directory")?);
    let supervisor = Supervisor::new(SupervisorConfig { binary_path: core_binary, args, working_dir }).with_child_sink(sinks.child);

    supervisor.start().await.into_diagnostic().wrap_err("failed to start core process")?;
    if let Some(pid) = supervisor.child_pid().await {
        std::fs::write(pid_file_path(config_path), pid.to_string()).into_diagnostic().wrap_err("failed to write pid file")?;
        tracing::info!(pid, "core process supervised; press Ctrl+C to stop");
    }

    tokio::signal::ctrl_c().await.into_diagnostic().wrap_err("failed to install interrupt handler")?;
    tracing::info!("interrupt received; stopping core process");
    supervisor.stop().await.into_diagnostic().wrap_err("failed to stop core process")?;
    let _ = std::fs::remove_file(pid_file_path(config_path));
    Ok(())
}

/// Signals the core process recorded by a previous `start` invocation.
/// There is no supervisor in this process to hand the stop grace period to,
/// so this sends the terminate signal directly and force-kills if the
/// process is still alive after the same grace period the supervisor uses.
async fn stop(config_path: &Path) -> miette::Result<()> {
    let pid_path = pid_file_path(config_path);
    let Ok(contents) = std::fs::read_to_string(&pid_path) else {
        println!("no supervised core process is recorded for this configuration");
        return Ok(());
    };
    let pid: u32 = contents.trim().parse().into_diagnostic().wrap_err("pid file contents are not a valid process id")?;

    killtree::send_terminate(pid).into_diagnostic().wrap_err("failed to signal core process")?;
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    if process_is_alive(pid) {
        tracing::warn!(pid, "grace period expired; force-killing process tree");
        killtree::kill_tree(pid);
    }

    let _ = std::fs::remove_file(&pid_path);
    println!("stopped core process {pid}");
    Ok(())
}

async fn status(config_path: &Path, json: bool) -> miette::Result<()> {
    let pid_path = pid_file_path(config_path);
    let running_pid = std::fs::read_to_string(&pid_path).ok().and_then(|s| s.trim().parse::<u32>().ok()).filter(|pid| process_is_alive(*pid));

    if json {
        println!("{}", serde_json::json!({ "running": running_pid.is_some(), "pid": running_pid }));
    } else {
        match running_pid {
            Some(pid) => println!("running (pid {pid})"),
            None => println!("stopped"),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
fn process_is_alive(_pid: u32) -> bool {
    // Best-effort: without a direct handle we can't probe liveness cheaply
    // from the CLI, so a recorded pid file is treated as still running.
    true
}

async fn groups(base_url: String, token: String, json: bool, sinks: LogSinks) -> miette::Result<()> {
    let client = ControlClient::new(base_url, token).into_diagnostic().wrap_err("failed to build control client")?.with_sink(sinks.control);
    let groups = client.list_groups().await.into_diagnostic().wrap_err("failed to list proxy groups")?;

    if json {
        println!("{}", serde_json::json!(groups.iter().map(|g| serde_json::json!({ "name": g.name, "type": g.kind })).collect::<Vec<_>>()));
    } else {
        for group in &groups {
            println!("{}\t{}", group.name, group.kind);
        }
    }
    Ok(())
}

async fn members(base_url: String, token: String, group: &str, json: bool, sinks: LogSinks) -> miette::Result<()> {
    let client = ControlClient::new(base_url, token).into_diagnostic().wrap_err("failed to build control client")?.with_sink(sinks.control);
    let result = client.list_members(group).await.into_diagnostic().wrap_err("failed to list group members")?;

    if json {
        println!("{}", serde_json::json!({ "now": result.now, "all": result.members }));
    } else {
        for member in &result.members {
            let marker = if *member == result.now { "*" } else { " " };
            println!("{marker} {member}");
        }
    }
    Ok(())
}

async fn switch(base_url: String, token: String, group: &str, member: &str, sinks: LogSinks) -> miette::Result<()> {
    let client = ControlClient::new(base_url, token).into_diagnostic().wrap_err("failed to build control client")?.with_sink(sinks.control);
    let sessions = tokio::sync::Mutex::new(std::collections::HashMap::new());
    client.switch_active(group, member, &sessions).await.into_diagnostic().wrap_err("failed to switch active member")?;
    println!("switched {group} to {member}");
    Ok(())
}

async fn probe(base_url: String, token: String, member: &str, reference_url: &str, json: bool, sinks: LogSinks) -> miette::Result<()> {
    let client = ControlClient::new(base_url, token).into_diagnostic().wrap_err("failed to build control client")?.with_sink(sinks.control);
    let delay_ms = client.probe_latency(member, reference_url).await.into_diagnostic().wrap_err("failed to probe latency")?;

    if json {
        println!("{}", serde_json::json!({ "member": member, "delay_ms": delay_ms }));
    } else {
        println!("{member}: {delay_ms} ms");
    }
    Ok(())
}

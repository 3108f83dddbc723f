use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::info;

/// Terminates every other process started from one of `executables`.
pub fn kill_previous_servers(executables: &[PathBuf]) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get current pid {e}"))?;

    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| executables.iter().any(|name| name.as_path() == *v))
            .is_some()
        {
            info!("Stopping {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

/// Stops running daemons and starts a new one. The daemon binary detaches itself, so this only
/// waits for the launcher to exit.
pub fn restart_server(
    daemon: &Path,
    known_executables: &[PathBuf],
    app_dir: Option<&Path>,
    config: &Path,
) -> Result<()> {
    kill_previous_servers(known_executables)?;

    let mut command = std::process::Command::new(daemon);
    command.arg("--config").arg(config);
    if let Some(app_dir) = app_dir {
        command.arg("--dir").arg(app_dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    info!("Spawning {daemon:?}");
    let status = command.status()?;
    if !status.success() {
        return Err(anyhow!("Daemon launcher exited with {status}"));
    }
    println!("Started onloq daemon");
    Ok(())
}

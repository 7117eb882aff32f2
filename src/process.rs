//! Runs one shell command line and collects what it printed.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The shell sends stderr to the stdout pipe so the output keeps the order
/// the command printed in.
#[cfg(unix)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(format!("exec 2>&1\n{}", cmdline));
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}

/// Describe how a process died from a signal, if it did.
#[cfg(unix)]
fn killed_by(status: &std::process::ExitStatus) -> Option<(Termination, String)> {
    use std::os::unix::process::ExitStatusExt;
    let sig = status.signal()?;
    Some(match sig {
        libc::SIGINT => (Termination::Interrupted, "interrupted".to_string()),
        _ => (Termination::Failure, format!("signal {}", sig)),
    })
}

#[cfg(not(unix))]
fn killed_by(_status: &std::process::ExitStatus) -> Option<(Termination, String)> {
    None
}

/// Run `cmdline` through the shell in `cwd`, with `env` added to the inherited
/// environment.  On unix the output holds stdout and stderr interleaved as
/// printed; elsewhere it holds stdout followed by stderr.
/// Returns an Err() if we failed outside of the process itself.
pub fn run_command(
    cmdline: &str,
    cwd: &Path,
    env: &[(&str, &OsStr)],
) -> anyhow::Result<(Termination, Vec<u8>)> {
    let mut cmd = shell(cmdline);
    cmd.current_dir(cwd);
    for (key, val) in env {
        cmd.env(key, val);
    }
    let mut out = cmd.output()?;
    let mut output = Vec::new();
    output.append(&mut out.stdout);
    output.append(&mut out.stderr);

    let mut termination = Termination::Success;
    if !out.status.success() {
        termination = Termination::Failure;
        if let Some((how, msg)) = killed_by(&out.status) {
            termination = how;
            output.extend_from_slice(msg.as_bytes());
        }
    }
    Ok((termination, output))
}

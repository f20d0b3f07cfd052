//! Shared helpers used by both the setup phase and toolexec subprocesses.

pub mod gocmd;
pub mod paths;

use std::process::Command;

/// Run a command with inherited stdio, returning its exit code. A missing
/// exit code (killed by signal) maps to 1.
pub fn run_cmd(args: &[String]) -> Result<i32, String> {
    run_cmd_with_env(args, &[])
}

/// Run a command with additional environment variables.
pub fn run_cmd_with_env(args: &[String], env: &[(String, String)]) -> Result<i32, String> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;
    let mut cmd = Command::new(program);
    cmd.args(rest);
    for (k, v) in env {
        cmd.env(k, v);
    }
    let status = cmd
        .status()
        .map_err(|e| format!("Failed to run {}: {}", program, e))?;
    Ok(status.code().unwrap_or(1))
}

/// Run a command and fail unless it exits zero.
pub fn run_cmd_checked(args: &[String]) -> Result<(), String> {
    let code = run_cmd(args)?;
    if code != 0 {
        return Err(format!("command {:?} exited with code {}", args, code));
    }
    Ok(())
}

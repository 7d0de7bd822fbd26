//! Condition command execution

use std::time::Duration;

/// Captured output of one condition command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, -1 when the process died without one
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// How long the command took
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Stdout and stderr joined, for extractors that scan both streams
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run a condition command through the shell in the given working directory
///
/// Timeouts and spawn failures surface as errors; the caller decides how a
/// failed spawn maps onto the condition verdict.
pub async fn run_shell(command: &str, workdir: &std::path::Path, timeout: Duration) -> eyre::Result<CommandOutput> {
    let start = std::time::Instant::now();

    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .output(),
    )
    .await??;

    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
    })
}

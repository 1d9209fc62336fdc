use serde_json::json;

use crate::error::ExecutorError;

/// Runs `description` as a shell command and returns a JSON summary.
/// Shared by every concrete executor kind: provisioning a real container
/// or cloud sandbox is explicitly out of scope here (spec Non-goals name
/// "sandbox/container plugin internals"), so each kind differs only in
/// how it labels its environment, not in how it runs a task.
pub async fn run_command(command: &str) -> Result<serde_json::Value, ExecutorError> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|err| ExecutorError::Execution(err.to_string()))?;

    Ok(json!({
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "exitCode": output.status.code(),
    }))
}

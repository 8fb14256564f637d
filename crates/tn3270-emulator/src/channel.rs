//! The command channel to a running emulator.
//!
//! Commands are relayed by a control-client executable: one short-lived
//! child process per command, told which control port to talk to with
//! `-t <port>`. Output-returning commands capture the child's stdout;
//! fire-and-forget commands pass `-S` to suppress the status line.
//!
//! The trait seam exists so the driver can be exercised against a scripted
//! fake in tests; production code always uses [`X3270ifChannel`].

use crate::provision::{BinaryKind, BinaryProvisioner};
use async_trait::async_trait;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tn3270_common::{Attempt, EmulatorError, EmulatorResult, RetryError, RetryPolicy};
use tokio::process::Command;
use tracing::debug;

/// Issues scripting commands to one emulator instance.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Issues a command, discarding any output.
    async fn execute(&self, command: &str) -> EmulatorResult<()>;

    /// Issues a command and returns its captured stdout.
    async fn execute_output(&self, command: &str) -> EmulatorResult<String>;
}

/// Budget for absorbing "text file busy" while concurrently extracted
/// binaries settle on tmpfs.
const BUSY_RETRY: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(1));

/// Control channel backed by the extracted control-client executable.
pub struct X3270ifChannel {
    provisioner: Arc<BinaryProvisioner>,
    control_port: u16,
}

impl X3270ifChannel {
    pub fn new(provisioner: Arc<BinaryProvisioner>, control_port: u16) -> Self {
        Self {
            provisioner,
            control_port,
        }
    }

    /// Runs one control-client invocation, classifying "text file busy"
    /// as retriable and everything else as final.
    async fn invoke(&self, command: &str, suppress_status: bool) -> EmulatorResult<Output> {
        let binary = self.provisioner.ensure(BinaryKind::Control)?;
        let port = self.control_port.to_string();

        let result = BUSY_RETRY
            .run("control client", |_| {
                let binary = binary.clone();
                let port = port.clone();
                async move {
                    let mut cmd = Command::new(&binary);
                    if suppress_status {
                        cmd.arg("-S");
                    }
                    cmd.arg("-t").arg(&port).arg(command);
                    debug!(control_port = %port, command, "Issuing control command");
                    match cmd.output().await {
                        Ok(output) => Attempt::Ok(output),
                        Err(e) if is_text_file_busy(&e) => Attempt::Transient(e),
                        Err(e) => Attempt::Fatal(e),
                    }
                }
            })
            .await;

        let output = match result {
            Ok(output) => output,
            Err(RetryError::Fatal(e)) => {
                return Err(EmulatorError::command_failed(command, e.to_string()))
            }
            Err(RetryError::Exhausted { attempts, .. }) => {
                return Err(EmulatorError::retries_exhausted("command execution", attempts))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmulatorError::command_failed(
                command,
                format!("exit status {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(output)
    }
}

#[async_trait]
impl ControlChannel for X3270ifChannel {
    async fn execute(&self, command: &str) -> EmulatorResult<()> {
        self.invoke(command, true).await.map(|_| ())
    }

    async fn execute_output(&self, command: &str) -> EmulatorResult<String> {
        let output = self.invoke(command, false).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// ETXTBSY shows up when the control client is spawned while a sibling
/// workflow is still writing the freshly extracted binary.
fn is_text_file_busy(err: &std::io::Error) -> bool {
    err.to_string().to_lowercase().contains("text file busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_file_busy_detection() {
        let busy = std::io::Error::new(std::io::ErrorKind::Other, "Text file busy (os error 26)");
        assert!(is_text_file_busy(&busy));

        let other = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        assert!(!is_text_file_busy(&other));
    }
}

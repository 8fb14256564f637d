//! The emulator driver.
//!
//! One [`EmulatorDriver`] owns one external emulator process, bound to a
//! control port that is unique within this process. Scripted commands go
//! through a [`ControlChannel`]; every command runs under a finite retry
//! budget because the host side of a 3270 session unlocks the keyboard on
//! its own schedule.
//!
//! Lifecycle: `Closed --connect()--> Connecting --probe ok--> Connected`,
//! back to `Closed` on `disconnect()` or when the connect budget runs out.
//! Commands on one instance are strictly serialized by an instance lock.

use crate::channel::{ControlChannel, X3270ifChannel};
use crate::keys::AidKey;
use crate::provision::{BinaryKind, BinaryProvisioner};
use crate::script::ScriptCommand;
use parking_lot::Mutex;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tn3270_common::{Attempt, EmulatorError, EmulatorResult, RetryError, RetryPolicy};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default terminal model identifier passed to the emulator.
pub const DEFAULT_MODEL: &str = "3279-2";

/// Budget for connect probing, field waits, and full-screen grabs.
const CONNECT_RETRY: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(1));

/// Budget for cursor and string operations.
const INPUT_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

/// Connection parameters for one emulator instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Mainframe host to connect to.
    pub host: String,
    /// Mainframe port.
    pub port: u16,
    /// TCP port the emulator accepts scripted commands on.
    pub control_port: u16,
    /// Terminal model identifier.
    pub model: String,
}

impl DriverConfig {
    pub fn new(host: impl Into<String>, port: u16, control_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            control_port,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// `host:port` as the emulator expects it on its command line.
    fn hostname(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Closed,
    Connecting,
    Connected,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Closed => write!(f, "closed"),
            DriverState::Connecting => write!(f, "connecting"),
            DriverState::Connected => write!(f, "connected"),
        }
    }
}

/// Drives one external emulator process over its control port.
pub struct EmulatorDriver {
    config: DriverConfig,
    provisioner: Option<Arc<BinaryProvisioner>>,
    channel: Box<dyn ControlChannel>,
    child: Mutex<Option<Child>>,
    state: Mutex<DriverState>,
    /// Serializes public operations on this instance.
    op_lock: tokio::sync::Mutex<()>,
}

impl EmulatorDriver {
    /// Creates a driver that spawns the provisioned emulator binary and
    /// relays commands through the provisioned control client.
    pub fn new(config: DriverConfig, provisioner: Arc<BinaryProvisioner>) -> Self {
        let channel = Box::new(X3270ifChannel::new(
            Arc::clone(&provisioner),
            config.control_port,
        ));
        Self {
            config,
            provisioner: Some(provisioner),
            channel,
            child: Mutex::new(None),
            state: Mutex::new(DriverState::Closed),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a driver over an explicit control channel.
    ///
    /// Used when the emulator process is managed elsewhere (or faked): the
    /// driver will talk to whatever answers on the channel and never spawn.
    pub fn with_channel(config: DriverConfig, channel: Box<dyn ControlChannel>) -> Self {
        Self {
            config,
            provisioner: None,
            channel,
            child: Mutex::new(None),
            state: Mutex::new(DriverState::Closed),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    /// The control port this instance owns.
    pub fn control_port(&self) -> u16 {
        self.config.control_port
    }

    /// Opens the connection: spawns the emulator bound to the control port
    /// and polls `Query(ConnectionState)` until it answers.
    ///
    /// A no-op when the instance is already connected.
    pub async fn connect(&self) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;

        if self.config.host.is_empty() {
            return Err(EmulatorError::MissingHost);
        }

        if self.probe_connected().await {
            *self.state.lock() = DriverState::Connected;
            return Ok(());
        }

        *self.state.lock() = DriverState::Connecting;
        self.spawn_emulator()?;

        let probe = CONNECT_RETRY
            .run("connect", |_| async {
                if self.probe_connected().await {
                    Attempt::Ok(())
                } else {
                    Attempt::Transient(EmulatorError::NotConnected)
                }
            })
            .await;

        match probe {
            Ok(()) => {
                *self.state.lock() = DriverState::Connected;
                debug!(control_port = self.config.control_port, "Emulator connected");
                Ok(())
            }
            Err(_) => {
                self.kill_child();
                *self.state.lock() = DriverState::Closed;
                Err(EmulatorError::retries_exhausted("connect", CONNECT_RETRY.attempts))
            }
        }
    }

    /// Closes the connection. Best-effort: safe on an already-closed
    /// instance.
    pub async fn disconnect(&self) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;

        if self.probe_connected().await {
            if let Err(e) = self.channel.execute(&ScriptCommand::Quit.to_string()).await {
                debug!(error = %e, "Quit command failed during disconnect");
            }
        }
        self.kill_child();
        *self.state.lock() = DriverState::Closed;
        Ok(())
    }

    /// Blocks until the screen is ready, the cursor sits on a modifiable
    /// field, and the keyboard is unlocked.
    pub async fn wait_for_field(&self, timeout: Duration) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;
        let command = ScriptCommand::WaitInputField {
            seconds: timeout.as_secs(),
        }
        .to_string();

        let result = CONNECT_RETRY
            .run("WaitForField", |_| async {
                match self.channel.execute_output(&command).await {
                    Err(e) => Attempt::Transient(e),
                    Ok(output) => {
                        // First whitespace-separated token is the keyboard
                        // state; `U` means unlocked. An empty reply also
                        // counts as ready.
                        match output.split_whitespace().next() {
                            None => Attempt::Ok(()),
                            Some("U") => Attempt::Ok(()),
                            Some(state) => Attempt::Fatal(EmulatorError::KeyboardLocked {
                                state: state.to_string(),
                            }),
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, .. }) => {
                Err(EmulatorError::retries_exhausted("WaitForField", attempts))
            }
        }
    }

    /// Moves the cursor to a 1-based (row, column) position.
    pub async fn move_cursor(&self, row: u16, col: u16) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;
        self.move_cursor_inner(row, col).await
    }

    /// Types `text` at the current cursor position.
    pub async fn set_string(&self, text: &str) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;
        self.set_string_inner(text).await
    }

    /// Types `text` at the 1-based (row, column) position. When both
    /// coordinates are zero the string goes to the current cursor position.
    pub async fn fill_string(&self, row: u16, col: u16, text: &str) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;
        if row > 0 && col > 0 {
            self.move_cursor_inner(row, col).await?;
        }
        self.set_string_inner(text).await
    }

    /// Reads `length` characters at the 1-based (row, column) position.
    pub async fn get_value(&self, row: u16, col: u16, length: u16) -> EmulatorResult<String> {
        let _guard = self.op_lock.lock().await;
        let command = ScriptCommand::AsciiAt {
            row: row.saturating_sub(1),
            col: col.saturating_sub(1),
            length,
        }
        .to_string();
        self.retry_output("GetValue", INPUT_RETRY, &command).await
    }

    /// Returns the full screen buffer.
    pub async fn grab_screen(&self) -> EmulatorResult<String> {
        let _guard = self.op_lock.lock().await;
        let command = ScriptCommand::AsciiAll.to_string();
        self.retry_output("screen capture", CONNECT_RETRY, &command).await
    }

    /// Presses a key by name. Keys outside Enter/Tab/PF1..PF24 fail
    /// without touching the emulator.
    pub async fn press(&self, key: &str) -> EmulatorResult<()> {
        let key = AidKey::parse(key)?;
        self.press_key(key).await
    }

    /// Presses a validated attention key.
    pub async fn press_key(&self, key: AidKey) -> EmulatorResult<()> {
        let _guard = self.op_lock.lock().await;
        self.channel
            .execute(&ScriptCommand::Key(key).to_string())
            .await
    }

    /// True iff a `ConnectionState` query returns a non-empty response.
    pub async fn is_connected(&self) -> bool {
        let _guard = self.op_lock.lock().await;
        self.probe_connected().await
    }

    /// Number of rows in the saved screen image.
    pub async fn rows(&self) -> EmulatorResult<u16> {
        let _guard = self.op_lock.lock().await;
        self.snap_dimension("GetRows", ScriptCommand::SnapRows).await
    }

    /// Number of columns in the saved screen image.
    pub async fn columns(&self) -> EmulatorResult<u16> {
        let _guard = self.op_lock.lock().await;
        self.snap_dimension("GetColumns", ScriptCommand::SnapCols).await
    }

    /// Current cursor position as reported by the emulator.
    pub async fn cursor_position(&self) -> EmulatorResult<String> {
        let _guard = self.op_lock.lock().await;
        self.channel
            .execute_output(&ScriptCommand::QueryCursor.to_string())
            .await
    }

    // ===== internal =====

    async fn move_cursor_inner(&self, row: u16, col: u16) -> EmulatorResult<()> {
        let command = ScriptCommand::MoveCursor {
            row: row.saturating_sub(1),
            col: col.saturating_sub(1),
        }
        .to_string();
        self.retry_execute("MoveCursor", INPUT_RETRY, &command).await
    }

    async fn set_string_inner(&self, text: &str) -> EmulatorResult<()> {
        let command = ScriptCommand::SetString(text.to_string()).to_string();
        self.retry_execute("SetString", INPUT_RETRY, &command).await
    }

    async fn snap_dimension(&self, operation: &str, command: ScriptCommand) -> EmulatorResult<u16> {
        let command = command.to_string();
        let result = INPUT_RETRY
            .run(operation, |_| async {
                match self.channel.execute_output(&command).await {
                    Err(e) => Attempt::Transient(e),
                    Ok(output) => match output.trim().parse::<u16>() {
                        Ok(n) => Attempt::Ok(n),
                        Err(e) => Attempt::Transient(EmulatorError::command_failed(
                            &command,
                            e.to_string(),
                        )),
                    },
                }
            })
            .await;
        result.map_err(|e| flatten_retry(operation, e))
    }

    async fn retry_execute(
        &self,
        operation: &str,
        policy: RetryPolicy,
        command: &str,
    ) -> EmulatorResult<()> {
        policy
            .run(operation, |_| async {
                match self.channel.execute(command).await {
                    Ok(()) => Attempt::Ok(()),
                    Err(e) => Attempt::Transient(e),
                }
            })
            .await
            .map_err(|e| flatten_retry(operation, e))
    }

    async fn retry_output(
        &self,
        operation: &str,
        policy: RetryPolicy,
        command: &str,
    ) -> EmulatorResult<String> {
        policy
            .run(operation, |_| async {
                match self.channel.execute_output(command).await {
                    Ok(output) => Attempt::Ok(output),
                    Err(e) => Attempt::Transient(e),
                }
            })
            .await
            .map_err(|e| flatten_retry(operation, e))
    }

    async fn probe_connected(&self) -> bool {
        match self
            .channel
            .execute_output(&ScriptCommand::QueryConnectionState.to_string())
            .await
        {
            Ok(output) => !output.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Spawns the emulator process bound to this instance's control port.
    fn spawn_emulator(&self) -> EmulatorResult<()> {
        let provisioner = self.provisioner.as_ref().ok_or_else(|| {
            EmulatorError::spawn(self.config.control_port, "no emulator binary configured")
        })?;
        let binary = provisioner.ensure(BinaryKind::Emulator)?;

        let resource = if cfg!(windows) {
            "wc3270.unlockDelay: False"
        } else {
            "x3270.unlockDelay: False"
        };
        let control_port = self.config.control_port.to_string();

        let mut cmd = Command::new(&binary);
        if provisioner.headless() {
            cmd.arg("-scriptport").arg(&control_port).arg("-xrm").arg(resource);
        } else {
            cmd.arg("-xrm").arg(resource).arg("-scriptport").arg(&control_port);
        }
        cmd.arg("-model")
            .arg(&self.config.model)
            .arg(self.config.hostname())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            binary = %binary.display(),
            control_port = self.config.control_port,
            host = %self.config.hostname(),
            "Spawning emulator"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| EmulatorError::spawn(self.config.control_port, e.to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let control_port = self.config.control_port;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(control_port, "emulator stderr: {line}");
                }
            });
        }

        *self.child.lock() = Some(child);
        Ok(())
    }

    fn kill_child(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                warn!(
                    control_port = self.config.control_port,
                    error = %e,
                    "Failed to kill emulator process"
                );
            }
        }
    }
}

fn flatten_retry(operation: &str, err: RetryError<EmulatorError>) -> EmulatorError {
    match err {
        RetryError::Fatal(e) => e,
        RetryError::Exhausted { attempts, .. } => {
            EmulatorError::retries_exhausted(operation, attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;

    /// Control channel fake with canned replies, recording every command.
    struct ScriptedChannel {
        sent: PlMutex<Vec<String>>,
        replies: HashMap<String, String>,
        connected: bool,
    }

    impl ScriptedChannel {
        fn connected() -> Self {
            Self {
                sent: PlMutex::new(Vec::new()),
                replies: HashMap::new(),
                connected: true,
            }
        }

        fn with_reply(mut self, command: &str, reply: &str) -> Self {
            self.replies.insert(command.to_string(), reply.to_string());
            self
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn execute(&self, command: &str) -> EmulatorResult<()> {
            self.sent.lock().push(command.to_string());
            Ok(())
        }

        async fn execute_output(&self, command: &str) -> EmulatorResult<String> {
            self.sent.lock().push(command.to_string());
            if command == "Query(ConnectionState)" {
                return Ok(if self.connected {
                    "CONNECTED host".to_string()
                } else {
                    String::new()
                });
            }
            Ok(self.replies.get(command).cloned().unwrap_or_default())
        }
    }

    fn driver_with(channel: ScriptedChannel) -> (EmulatorDriver, Arc<ScriptedChannel>) {
        let channel = Arc::new(channel);
        let shared = Arc::clone(&channel);

        struct Fwd(Arc<ScriptedChannel>);
        #[async_trait]
        impl ControlChannel for Fwd {
            async fn execute(&self, command: &str) -> EmulatorResult<()> {
                self.0.execute(command).await
            }
            async fn execute_output(&self, command: &str) -> EmulatorResult<String> {
                self.0.execute_output(command).await
            }
        }

        let driver = EmulatorDriver::with_channel(
            DriverConfig::new("mainframe.example", 3270, 5001),
            Box::new(Fwd(channel)),
        );
        (driver, shared)
    }

    #[tokio::test]
    async fn test_connect_is_noop_when_already_connected() {
        let (driver, channel) = driver_with(ScriptedChannel::connected());

        driver.connect().await.unwrap();
        assert_eq!(driver.state(), DriverState::Connected);

        // Second connect probes and returns without further commands.
        driver.connect().await.unwrap();
        let sent = channel.sent();
        assert!(sent.iter().all(|c| c == "Query(ConnectionState)"));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn test_fill_string_with_coordinates_moves_then_types() {
        let (driver, channel) = driver_with(ScriptedChannel::connected());

        driver.fill_string(10, 44, "b0001").await.unwrap();

        assert_eq!(channel.sent(), vec!["MoveCursor(9,43)", "String(b0001)"]);
    }

    #[tokio::test]
    async fn test_fill_string_at_origin_reduces_to_set_string() {
        let (driver, channel) = driver_with(ScriptedChannel::connected());

        driver.fill_string(0, 0, "mypass").await.unwrap();

        assert_eq!(channel.sent(), vec!["String(mypass)"]);
    }

    #[tokio::test]
    async fn test_fill_string_matches_explicit_move_and_set() {
        let (a, chan_a) = driver_with(ScriptedChannel::connected());
        let (b, chan_b) = driver_with(ScriptedChannel::connected());

        a.fill_string(5, 7, "x").await.unwrap();
        b.move_cursor(5, 7).await.unwrap();
        b.set_string("x").await.unwrap();

        assert_eq!(chan_a.sent(), chan_b.sent());
    }

    #[tokio::test]
    async fn test_get_value_converts_to_zero_based_wire() {
        let channel =
            ScriptedChannel::connected().with_reply("Ascii(0,1,12)", "Scrn: BANK10");
        let (driver, channel) = driver_with(channel);

        let value = driver.get_value(1, 2, 12).await.unwrap();

        assert_eq!(value, "Scrn: BANK10");
        assert_eq!(channel.sent(), vec!["Ascii(0,1,12)"]);
    }

    #[tokio::test]
    async fn test_press_invalid_key_never_reaches_emulator() {
        let (driver, channel) = driver_with(ScriptedChannel::connected());

        let err = driver.press("F25").await.unwrap_err();

        assert!(matches!(err, EmulatorError::InvalidKey { .. }));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_press_valid_keys() {
        let (driver, channel) = driver_with(ScriptedChannel::connected());

        driver.press("Enter").await.unwrap();
        driver.press("Tab").await.unwrap();
        driver.press("PF12").await.unwrap();

        assert_eq!(channel.sent(), vec!["Enter", "Tab", "PF(12)"]);
    }

    #[tokio::test]
    async fn test_wait_for_field_accepts_unlocked_and_empty() {
        let channel = ScriptedChannel::connected()
            .with_reply("Wait(30, InputField)", "U F U C(mainframe.example) ...");
        let (driver, _) = driver_with(channel);
        driver.wait_for_field(Duration::from_secs(30)).await.unwrap();

        let channel = ScriptedChannel::connected().with_reply("Wait(30, InputField)", "");
        let (driver, _) = driver_with(channel);
        driver.wait_for_field(Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_field_rejects_locked_keyboard() {
        let channel =
            ScriptedChannel::connected().with_reply("Wait(30, InputField)", "L F U");
        let (driver, _) = driver_with(channel);

        let err = driver.wait_for_field(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, EmulatorError::KeyboardLocked { ref state } if state == "L"));
    }

    #[tokio::test]
    async fn test_grab_screen_issues_bare_ascii() {
        let channel = ScriptedChannel::connected().with_reply("Ascii()", "full screen\nbuffer");
        let (driver, channel) = driver_with(channel);

        let screen = driver.grab_screen().await.unwrap();

        assert_eq!(screen, "full screen\nbuffer");
        assert_eq!(channel.sent(), vec!["Ascii()"]);
    }

    #[tokio::test]
    async fn test_disconnect_on_closed_instance_is_safe() {
        struct Dead;
        #[async_trait]
        impl ControlChannel for Dead {
            async fn execute(&self, command: &str) -> EmulatorResult<()> {
                Err(EmulatorError::command_failed(command, "connection refused"))
            }
            async fn execute_output(&self, command: &str) -> EmulatorResult<String> {
                Err(EmulatorError::command_failed(command, "connection refused"))
            }
        }

        let driver = EmulatorDriver::with_channel(
            DriverConfig::new("mainframe.example", 3270, 5001),
            Box::new(Dead),
        );
        driver.disconnect().await.unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
    }
}

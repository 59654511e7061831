use crate::registry::Target;
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// SSH handshake budget. Connect attempts fail fast instead of hanging;
/// the outer tokio timeout leaves a little slack for process startup.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },
    #[error("Connection to {host} timed out")]
    Timeout { host: String },
    #[error("Host {host} unreachable: {detail}")]
    Unreachable { host: String, detail: String },
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("SSH I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// One line of live output from a streaming remote command.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub text: String,
    pub stderr: bool,
}

/// A running remote command with live output.
///
/// Drain `next_chunk()` until it returns None, then call `wait()` for the
/// exit code. The ssh child is spawned with kill_on_drop, so dropping the
/// stream (a log viewer disconnecting) tears the remote process down;
/// `cancel()` does the same explicitly.
pub struct CommandStream {
    rx: mpsc::Receiver<OutputChunk>,
    child: Child,
}

impl CommandStream {
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }

    /// Kill the local ssh process (and with it the remote foreground command).
    pub fn cancel(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Wait for the remote command to finish. The exit code is data, not an
    /// error — callers decide what non-zero means.
    pub async fn wait(mut self) -> Result<i32, SessionError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// An authenticated SSH session to one target.
///
/// Private key material lives in a 0600 temp file for the session's
/// lifetime and is removed on drop. Exactly one credential is used:
/// the key wins when both are present.
pub struct Session {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    key_file: Option<NamedTempFile>,
}

impl Session {
    /// Open a session: materialize credentials, then probe the host with a
    /// trivial command so auth and reachability fail fast and typed.
    pub async fn connect(target: &Target) -> Result<Self, SessionError> {
        let key_file = match &target.private_key {
            Some(key) if !key.trim().is_empty() => Some(write_key_file(key)?),
            _ => None,
        };
        let password = if key_file.is_some() {
            None
        } else {
            target.password.clone()
        };

        let session = Self {
            host: target.host.clone(),
            port: target.port,
            username: target.username.clone(),
            password,
            key_file,
        };

        let probe = session.run_with_timeout("true", CONNECT_TIMEOUT_SECS + 5).await?;
        if probe.exit_code != 0 {
            return Err(session.classify_failure(&probe.stderr, probe.exit_code));
        }
        Ok(session)
    }

    /// Run a command to completion. Never interprets the exit code — some
    /// callers run diagnostics like `command -v docker || echo not_installed`.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let output = self
            .base_command(false)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run a long command, streaming stdout/stderr line by line.
    ///
    /// `tty` allocates a remote pty — used for log follows so the remote
    /// process dies the moment the connection does. Deployment scripts run
    /// without one.
    pub async fn run_streaming(
        &self,
        command: &str,
        tty: bool,
    ) -> Result<CommandStream, SessionError> {
        let mut child = self
            .base_command(tty)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::channel::<OutputChunk>(256);

        let stdout = child.stdout.take().expect("stdout was piped");
        let tx_out = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx_out
                    .send(OutputChunk {
                        text: line,
                        stderr: false,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let stderr = child.stderr.take().expect("stderr was piped");
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx
                    .send(OutputChunk {
                        text: line,
                        stderr: true,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(CommandStream { rx, child })
    }

    /// Copy a local file to the target via scp.
    pub async fn upload(
        &self,
        local: &std::path::Path,
        remote: &str,
    ) -> Result<(), SessionError> {
        let mut cmd = self.wrap_auth("scp");
        for opt in self.common_options() {
            cmd.arg("-o").arg(opt);
        }
        if self.port > 0 && self.port != 22 {
            cmd.arg("-P").arg(self.port.to_string());
        }
        if let Some(key) = &self.key_file {
            cmd.arg("-i").arg(key.path());
        }
        cmd.arg(local);
        cmd.arg(format!("{}@{}:{}", self.username, self.host, remote));

        let output = cmd.stdin(Stdio::null()).output().await?;
        if !output.status.success() {
            return Err(SessionError::Upload(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn run_with_timeout(
        &self,
        command: &str,
        secs: u64,
    ) -> Result<CommandOutput, SessionError> {
        match timeout(Duration::from_secs(secs), self.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout {
                host: self.host.clone(),
            }),
        }
    }

    fn classify_failure(&self, stderr: &str, exit_code: i32) -> SessionError {
        classify_connect_failure(&self.username, &self.host, stderr, exit_code)
    }

    /// Wrap the given binary in `sshpass -e` when password auth is in play.
    /// The password travels via the SSHPASS env var, never argv.
    fn wrap_auth(&self, bin: &str) -> Command {
        match &self.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e");
                cmd.env("SSHPASS", password);
                cmd.arg(bin);
                cmd
            }
            None => Command::new(bin),
        }
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            // Targets are freshly provisioned VMs; host keys churn constantly
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            "LogLevel=ERROR".to_string(),
        ]
    }

    fn base_command(&self, tty: bool) -> Command {
        let mut cmd = self.wrap_auth("ssh");
        for opt in self.common_options() {
            cmd.arg("-o").arg(opt);
        }
        if self.password.is_none() {
            cmd.arg("-o").arg("BatchMode=yes");
        }
        if self.port > 0 && self.port != 22 {
            cmd.arg("-p").arg(self.port.to_string());
        }
        if let Some(key) = &self.key_file {
            cmd.arg("-i").arg(key.path());
        }
        if tty {
            cmd.arg("-tt");
        }
        cmd.arg(format!("{}@{}", self.username, self.host));
        cmd
    }
}

/// Map a failed connect probe onto the session error taxonomy.
pub(crate) fn classify_connect_failure(
    user: &str,
    host: &str,
    stderr: &str,
    exit_code: i32,
) -> SessionError {
    let lower = stderr.to_lowercase();
    // sshpass exits 5 on a rejected password
    if exit_code == 5
        || lower.contains("permission denied")
        || lower.contains("authentication failed")
    {
        SessionError::Auth {
            user: user.to_string(),
            host: host.to_string(),
        }
    } else if lower.contains("timed out") {
        SessionError::Timeout {
            host: host.to_string(),
        }
    } else {
        SessionError::Unreachable {
            host: host.to_string(),
            detail: stderr.trim().to_string(),
        }
    }
}

fn write_key_file(key: &str) -> Result<NamedTempFile, SessionError> {
    let mut file = tempfile::Builder::new()
        .prefix(".meshforge-key-")
        .tempfile()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(key.as_bytes())?;
    if !key.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

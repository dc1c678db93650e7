//! Run commands through the system `ssh` client.

use crate::{as_superuser, Error, Executor, Output};
use std::{
    fs::File,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{process::Command, time};
use tracing::{debug, warn};

/// Exit status reserved by `ssh` for its own failures.
const SSH_FAILURE: i32 = 255;

/// Fragments of `ssh`/`sudo` diagnostics that indicate the caller is not allowed in.
const AUTHENTICATION_FAILURES: [&str; 4] = [
    "Permission denied",
    "Host key verification failed",
    "Too many authentication failures",
    "a password is required",
];

/// Configuration for [Ssh].
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// The `ssh` binary to invoke.
    pub binary: PathBuf,

    /// `ssh_config` used to resolve host names (users, keys, addresses).
    pub config_file: Option<PathBuf>,

    /// Login user, if not set by `config_file`.
    pub user: Option<String>,

    /// Private key, if not set by `config_file`.
    pub identity_file: Option<PathBuf>,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    /// Attempts made when a host is unreachable (at least one).
    pub attempts: usize,

    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            config_file: None,
            user: None,
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
            attempts: 3,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Serial [Executor] that spawns one `ssh` subprocess per call.
#[derive(Clone, Debug)]
pub struct Ssh {
    cfg: SshConfig,
}

impl Ssh {
    /// Create a new executor, failing if a configured file cannot be read.
    pub fn new(cfg: SshConfig) -> Result<Self, Error> {
        if let Some(path) = &cfg.config_file {
            readable(path, "ssh_config")?;
        }
        if let Some(path) = &cfg.identity_file {
            readable(path, "identity_file")?;
        }
        Ok(Self { cfg })
    }

    fn command(&self, host: &str, command: &str, superuser: bool) -> Command {
        let remote = if superuser {
            as_superuser(command)
        } else {
            command.to_string()
        };
        let mut cmd = Command::new(&self.cfg.binary);
        if let Some(config_file) = &self.cfg.config_file {
            cmd.arg("-F").arg(config_file);
        }
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.cfg.connect_timeout.as_secs().max(1)
            ));
        if let Some(identity_file) = &self.cfg.identity_file {
            cmd.arg("-i").arg(identity_file);
        }
        if let Some(user) = &self.cfg.user {
            cmd.arg("-l").arg(user);
        }
        cmd.arg(host)
            .arg(remote)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn attempt(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> Result<Output, Error> {
        let mut cmd = self.command(host, command, superuser);
        let output = match time::timeout(timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                // Dropping the future kills the subprocess
                return Err(Error::Timeout {
                    host: host.to_string(),
                    timeout,
                });
            }
        };
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if AUTHENTICATION_FAILURES.iter().any(|f| stderr.contains(f))
            && (exit_code == SSH_FAILURE || superuser)
        {
            return Err(Error::Authentication {
                host: host.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        if exit_code == SSH_FAILURE {
            return Err(Error::Unreachable {
                host: host.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        Ok(Output {
            exit_code,
            stdout,
            stderr,
        })
    }
}

impl Executor for Ssh {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> Result<Output, Error> {
        debug!(%host, %command, superuser, "executing");
        let attempts = self.cfg.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(host, command, superuser, timeout).await {
                Err(Error::Unreachable { reason, .. }) if attempt < attempts => {
                    warn!(%host, attempt, %reason, "host unreachable, retrying");
                    time::sleep(self.cfg.retry_interval).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%host, %command, error = ?err, "remote command failed");
                    return Err(err);
                }
                Ok(output) => return Ok(output),
            }
        }
    }
}

/// Ensure `path` is a regular file this process can open.
fn readable(path: &Path, kind: &'static str) -> Result<(), Error> {
    let unreadable = || Error::UnreadableFile {
        kind,
        path: path.to_path_buf(),
    };
    if !path.is_file() {
        return Err(unreadable());
    }
    File::open(path).map_err(|_| unreadable())?;
    Ok(())
}

//! Run fixed shell commands on named hosts.
//!
//! [Executor] is the only seam between chaos actions and the machines they disturb: run a command
//! on a host (optionally as superuser), bounded by a timeout, and return its exit code and output.
//!
//! Two behaviors are provided:
//! * [Ssh] runs one `ssh` subprocess per call and visits hosts one at a time.
//! * [Parallel] wraps any [Executor] and fans a command out to many hosts with bounded
//!   concurrency (sized to the available cores by default), collecting one result per host.
//!
//! # Errors
//!
//! Every call is bounded by a timeout. A call that outlives it fails with [Error::Timeout] and the
//! underlying subprocess is killed. Authentication failures ([Error::Authentication]) are never
//! retried. Transport errors are returned to the caller, never swallowed.
//!
//! # Example
//!
//! ```no_run
//! use indy_remote::{Executor, Parallel, Ssh, SshConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), indy_remote::Error> {
//! let ssh = Ssh::new(SshConfig::default())?;
//! let output = ssh
//!     .execute("Node1", "systemctl status indy-node", true, Duration::from_secs(10))
//!     .await?;
//! assert_eq!(output.exit_code, 0);
//!
//! let parallel = Parallel::new(ssh);
//! let hosts = vec!["Node1".to_string(), "Node2".to_string()];
//! let results = parallel
//!     .execute_all(&hosts, "uptime", false, Duration::from_secs(10))
//!     .await;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, future::Future, path::PathBuf, time::Duration};
use thiserror::Error;

pub mod mocks;
mod parallel;
pub use parallel::Parallel;
mod ssh;
pub use ssh::{Ssh, SshConfig};

/// Errors that can occur when running a command on a remote host.
#[derive(Debug, Error)]
pub enum Error {
    #[error("command on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
    #[error("authentication to {host} failed: {reason}")]
    Authentication { host: String, reason: String },
    #[error("{host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },
    #[error("failed to spawn transport: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("file not readable ({kind}): {path:?}")]
    UnreadableFile { kind: &'static str, path: PathBuf },
}

impl Error {
    /// Returns true if retrying the same call cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::UnreadableFile { .. }
        )
    }
}

/// Result of a command that ran to completion on a remote host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Interface to run a command on a named host.
///
/// Hosts are opaque names resolved by the transport (for SSH, via the configured `ssh_config`).
pub trait Executor: Clone + Send + Sync + 'static {
    /// Run `command` on `host`, as superuser if requested, failing with [Error::Timeout] if it
    /// does not complete within `timeout`.
    fn execute(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> impl Future<Output = Result<Output, Error>> + Send;

    /// Run `command` on every host in `hosts`, returning exactly one result per host.
    ///
    /// The default implementation visits hosts one at a time, in order.
    fn execute_all(
        &self,
        hosts: &[String],
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> impl Future<Output = BTreeMap<String, Result<Output, Error>>> + Send {
        async move {
            let mut results = BTreeMap::new();
            for host in hosts {
                let result = self.execute(host, command, superuser, timeout).await;
                results.insert(host.clone(), result);
            }
            results
        }
    }
}

/// Quote `s` so a POSIX shell treats it as a single word.
pub fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Wrap `command` so it runs as superuser without prompting for a password.
pub fn as_superuser(command: &str) -> String {
    format!("sudo -n sh -c {}", quote(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        // Plain words are wrapped
        assert_eq!(quote("systemctl"), "'systemctl'");

        // Whitespace and metacharacters survive untouched inside quotes
        assert_eq!(quote("a b | c $HOME"), "'a b | c $HOME'");

        // Embedded single quotes are closed, escaped, and reopened
        assert_eq!(quote("it's"), "'it'\\''s'");

        // Empty string is still a word
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_as_superuser() {
        assert_eq!(
            as_superuser("systemctl stop indy-node"),
            "sudo -n sh -c 'systemctl stop indy-node'"
        );
    }

    #[test]
    fn test_fatal_errors() {
        let auth = Error::Authentication {
            host: "Node1".into(),
            reason: "Permission denied".into(),
        };
        assert!(auth.is_fatal());
        let timeout = Error::Timeout {
            host: "Node1".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(!timeout.is_fatal());
    }
}

//! Experiment configuration, loaded from a YAML file.
//!
//! Every section (and every field within it) has a default, so an empty file (or no file at all)
//! describes a pool reachable through `~/.ssh/config` with the stock `indy-node` layout. Durations
//! are expressed in (possibly fractional) seconds.
//!
//! ```yaml
//! genesis: ~/pool_transactions_genesis
//! ssh:
//!   config_file: ~/.ssh/config
//!   concurrency: 8
//! validator_info:
//!   source: cli
//! ledger:
//!   client: client1
//! view_change:
//!   max_polls: 6
//!   interval: 10
//! ```

use crate::Error;
use indy_remote::SshConfig;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Command that generates ledger load from a client.
pub const DEFAULT_LOAD_COMMAND: &str = "python3 /home/ubuntu/indy-node/scripts/performance/perf_processes.py -c 20 -n 10 -k nym -g /home/ubuntu/pool_transactions_genesis";

/// Where validator snapshots are collected from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Run the status dump on every validator host (fast, up to a minute stale).
    #[default]
    Node,
    /// Query every validator through the ledger client (fresh, slow when nodes are down).
    Cli,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pool genesis transaction file.
    pub genesis: PathBuf,

    /// Directory under which each run keeps its state.
    pub state_directory: PathBuf,

    pub ssh: SshSection,
    pub validator_info: ValidatorInfoConfig,
    pub ledger: LedgerConfig,
    pub node: NodeConfig,
    pub view_change: PollConfig,

    /// Pause after demoting or promoting nodes so the pool can settle.
    #[serde(with = "seconds")]
    pub settle: Duration,

    pub load: LoadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            genesis: PathBuf::from("~/pool_transactions_genesis"),
            state_directory: env::temp_dir().join("indy-chaos"),
            ssh: SshSection::default(),
            validator_info: ValidatorInfoConfig::default(),
            ledger: LedgerConfig::default(),
            node: NodeConfig::default(),
            view_change: PollConfig::default(),
            settle: Duration::from_secs(60),
            load: LoadConfig::default(),
        }
    }
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(expand(path)?)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub binary: PathBuf,
    pub config_file: Option<PathBuf>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    pub attempts: usize,
    #[serde(with = "seconds")]
    pub retry_interval: Duration,

    /// Maximum hosts contacted at once (defaults to the available cores).
    pub concurrency: Option<usize>,
}

impl Default for SshSection {
    fn default() -> Self {
        let defaults = SshConfig::default();
        Self {
            binary: defaults.binary,
            config_file: Some(PathBuf::from("~/.ssh/config")),
            user: defaults.user,
            identity_file: defaults.identity_file,
            connect_timeout: defaults.connect_timeout,
            attempts: defaults.attempts,
            retry_interval: defaults.retry_interval,
            concurrency: None,
        }
    }
}

impl SshSection {
    /// Convert into an [SshConfig], expanding `~` and environment variables in paths.
    pub fn to_ssh_config(&self) -> Result<SshConfig, Error> {
        Ok(SshConfig {
            binary: self.binary.clone(),
            config_file: self.config_file.as_deref().map(expand).transpose()?,
            user: self.user.clone(),
            identity_file: self.identity_file.as_deref().map(expand).transpose()?,
            connect_timeout: self.connect_timeout,
            attempts: self.attempts,
            retry_interval: self.retry_interval,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorInfoConfig {
    pub source: Source,

    /// Status dump run (as superuser) on every validator when `source` is `node`.
    pub command: String,

    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for ValidatorInfoConfig {
    fn default() -> Self {
        Self {
            source: Source::Node,
            command: "validator-info -v --json".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Host with the ledger client installed.
    pub client: String,

    /// Ledger client binary on `client`.
    pub binary: String,

    /// Genesis file on `client`.
    pub genesis: String,

    pub pool: String,
    pub wallet_name: String,
    pub wallet_key: Option<String>,

    /// Trustee DID used to sign requests.
    pub did: String,

    /// Seed of `did`, used to (re)create it in the wallet.
    pub seed: Option<String>,

    /// Command run on `client` that prints the live services of every node as a JSON object
    /// (`{"Node1": ["VALIDATOR"], "Node2": []}`).
    pub services_command: String,

    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            client: "client1".to_string(),
            binary: "indy-cli".to_string(),
            genesis: "/home/ubuntu/pool_transactions_genesis".to_string(),
            pool: "chaosindy".to_string(),
            wallet_name: "chaosindy".to_string(),
            wallet_key: Some("chaosindy".to_string()),
            did: "V4SGRU86Z58d6TV7PBUe6f".to_string(),
            seed: Some("000000000000000000000000Trustee1".to_string()),
            services_command: "indy-validator-state".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Units started and stopped together.
    pub services: Vec<String>,

    /// Process name matched when checking liveness or killing.
    pub process: String,

    /// Checks of the process table after a graceful stop.
    pub stop_polls: usize,

    #[serde(with = "seconds")]
    pub stop_poll_interval: Duration,

    /// Bound on every node command.
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            services: vec!["indy-node".to_string()],
            process: "start_indy_node".to_string(),
            stop_polls: 10,
            stop_poll_interval: Duration::from_secs(6),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A bounded, fixed-interval poll.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub max_polls: usize,
    #[serde(with = "seconds")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: 6,
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub command: String,

    /// Run `command` as superuser on the client.
    pub superuser: bool,

    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_LOAD_COMMAND.to_string(),
            superuser: true,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Expand a leading `~` and any `$VAR` or `${VAR}` references in a local path.
pub fn expand(path: &Path) -> Result<PathBuf, Error> {
    let raw = path.to_string_lossy();
    shellexpand::full(&raw)
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(|err| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

mod seconds {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

//! Remove a node from consensus, and put it back.
//!
//! | Mechanism | Stop | Start |
//! |-----------|------|-------|
//! | [Mechanism::Service] | stop the services, then wait for the node process to exit | start the services |
//! | [Mechanism::Kill] | `SIGKILL` the node process | start the services |
//! | [Mechanism::Port] | firewall the client and node ports | remove the firewall rules |
//! | [Mechanism::Demote] | revoke the validator service on the ledger | grant it again, then restart the node |
//!
//! A successful stop returns an [Undo] descriptor. Its variant is the mechanism that was used (and
//! carries whatever the inverse needs), so a descriptor can only ever be replayed by the matching
//! start.

use crate::{
    ledger::{Ledger, Services},
    node::{self, Ports},
    Error, Pool,
};
use indy_remote::{Executor, Output};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tokio::time;
use tracing::{debug, info, warn};

/// How a node is removed from consensus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Graceful stop of the node services.
    Service,
    /// Block the client and node ports.
    Port,
    /// Revoke the validator service on the ledger (the process keeps running).
    Demote,
    /// `SIGKILL` the node process.
    Kill,
}

impl FromStr for Mechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "service" => Ok(Mechanism::Service),
            "port" => Ok(Mechanism::Port),
            "demote" => Ok(Mechanism::Demote),
            "kill" => Ok(Mechanism::Kill),
            _ => Err(Error::InvalidMechanism(s.to_string())),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mechanism::Service => "service",
            Mechanism::Port => "port",
            Mechanism::Demote => "demote",
            Mechanism::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// What must be done to start a stopped node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stop_strategy", rename_all = "lowercase")]
pub enum Undo {
    Service,
    Kill,
    Port { client_port: u16, node_port: u16 },
    Demote,
}

impl Undo {
    pub fn mechanism(&self) -> Mechanism {
        match self {
            Undo::Service => Mechanism::Service,
            Undo::Kill => Mechanism::Kill,
            Undo::Port { .. } => Mechanism::Port,
            Undo::Demote => Mechanism::Demote,
        }
    }
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    /// Run `command` on `alias` as superuser.
    pub(crate) async fn on_node(&self, alias: &str, command: &str) -> Result<Output, Error> {
        let output = self
            .executor
            .execute(alias, command, true, self.config.node.timeout)
            .await?;
        if !output.success() {
            debug!(
                %alias,
                %command,
                exit_code = output.exit_code,
                stderr = output.stderr.trim(),
                "node command failed"
            );
        }
        Ok(output)
    }

    /// Start the services of `alias`.
    pub async fn start_node(&self, alias: &str) -> Result<bool, Error> {
        let started = self
            .on_node(alias, &node::start(&self.config.node.services))
            .await?
            .success();
        if !started {
            warn!(%alias, "failed to start node");
        }
        Ok(started)
    }

    /// Stop the services of `alias` (without waiting for the process to exit).
    pub async fn stop_node(&self, alias: &str) -> Result<bool, Error> {
        let stopped = self
            .on_node(alias, &node::stop(&self.config.node.services))
            .await?
            .success();
        if !stopped {
            warn!(%alias, "failed to stop node");
        }
        Ok(stopped)
    }

    /// Number of node processes running on `alias`, if it could be read.
    pub async fn process_count(&self, alias: &str) -> Result<Option<usize>, Error> {
        let output = self
            .on_node(alias, &node::process_count(&self.config.node.process))
            .await?;
        Ok(output.stdout.trim().parse().ok())
    }

    /// Client and node ports of `alias`, from its last snapshot or else from genesis.
    pub fn ports(&self, alias: &str) -> Result<(u16, u16), Error> {
        let genesis = self.genesis()?;
        let node = genesis.require(alias)?;
        let info = self.snapshot(alias).map(|snapshot| snapshot.node_info);
        let client_port = info
            .as_ref()
            .and_then(|info| info.client_port)
            .unwrap_or(node.client_port);
        let node_port = info
            .as_ref()
            .and_then(|info| info.node_port)
            .unwrap_or(node.node_port);
        Ok((client_port, node_port))
    }

    /// Rebuild the descriptor a successful stop of `alias` by `mechanism` would have returned.
    pub fn undo_for(&self, alias: &str, mechanism: Mechanism) -> Result<Undo, Error> {
        Ok(match mechanism {
            Mechanism::Service => Undo::Service,
            Mechanism::Kill => Undo::Kill,
            Mechanism::Demote => Undo::Demote,
            Mechanism::Port => {
                let (client_port, node_port) = self.ports(alias)?;
                Undo::Port {
                    client_port,
                    node_port,
                }
            }
        })
    }

    /// Stop `alias` by `mechanism`, returning how to undo it (or `None` if the stop failed).
    pub async fn stop_by_strategy(
        &self,
        alias: &str,
        mechanism: Mechanism,
    ) -> Result<Option<Undo>, Error> {
        let genesis = self.genesis()?;
        let node = genesis.require(alias)?;
        info!(%alias, %mechanism, "stopping node");
        let undo = match mechanism {
            Mechanism::Service => {
                let exited = self.stop_node(alias).await? && self.wait_for_exit(alias).await?;
                if !exited {
                    // A failed stop must not leave the node half stopped
                    warn!(%alias, "node did not stop, restarting it");
                    self.start_node(alias).await?;
                    return Ok(None);
                }
                Undo::Service
            }
            Mechanism::Kill => {
                let output = self
                    .on_node(alias, &node::kill(&self.config.node.process))
                    .await?;
                if !output.success() {
                    warn!(%alias, "failed to kill node");
                    return Ok(None);
                }
                Undo::Kill
            }
            Mechanism::Port => {
                let (client_port, node_port) = self.ports(alias)?;
                let mut blocked = Vec::new();
                for port in [client_port, node_port] {
                    let output = self
                        .on_node(alias, &node::block(&Ports::Single(port)))
                        .await?;
                    if !output.success() {
                        warn!(%alias, port, "failed to block port");
                        self.unblock_all(alias, &blocked).await?;
                        return Ok(None);
                    }
                    blocked.push(port);
                }
                Undo::Port {
                    client_port,
                    node_port,
                }
            }
            Mechanism::Demote => {
                if !self.ledger.set_services(node, Services::None).await? {
                    warn!(%alias, "failed to demote node");
                    return Ok(None);
                }
                Undo::Demote
            }
        };
        Ok(Some(undo))
    }

    /// Remove the firewall rules for `ports` on `alias`, returning whether every rule was removed.
    async fn unblock_all(&self, alias: &str, ports: &[u16]) -> Result<bool, Error> {
        let mut unblocked = true;
        for &port in ports {
            let output = self
                .on_node(alias, &node::unblock(&Ports::Single(port)))
                .await?;
            if !output.success() {
                warn!(%alias, port, "failed to unblock port");
                unblocked = false;
            }
        }
        Ok(unblocked)
    }

    /// Poll the process table of `alias` until the node process is gone.
    async fn wait_for_exit(&self, alias: &str) -> Result<bool, Error> {
        let polls = self.config.node.stop_polls.max(1);
        for poll in 1..=polls {
            match self.process_count(alias).await? {
                Some(0) => return Ok(true),
                count => debug!(%alias, poll, polls, ?count, "node process still running"),
            }
            if poll < polls {
                time::sleep(self.config.node.stop_poll_interval).await;
            }
        }
        Ok(false)
    }

    /// Undo a stop of `alias` described by `undo`.
    ///
    /// With `best_effort`, a port that cannot be unblocked is logged and ignored.
    pub async fn start_by_strategy(
        &self,
        alias: &str,
        undo: &Undo,
        best_effort: bool,
    ) -> Result<bool, Error> {
        let genesis = self.genesis()?;
        let node = genesis.require(alias)?;
        info!(%alias, mechanism = %undo.mechanism(), "starting node");
        match undo {
            Undo::Service | Undo::Kill => self.start_node(alias).await,
            Undo::Port {
                client_port,
                node_port,
            } => {
                let unblocked = self.unblock_all(alias, &[*client_port, *node_port]).await?;
                if !unblocked && best_effort {
                    debug!(%alias, "ignoring ports that could not be unblocked");
                }
                Ok(unblocked || best_effort)
            }
            Undo::Demote => {
                if !self.ledger.set_services(node, Services::Validator).await? {
                    warn!(%alias, "failed to promote node");
                    return Ok(false);
                }

                // A promoted node resumes catch-up only after a restart
                let restarted = self
                    .on_node(alias, &node::restart(&self.config.node.services))
                    .await?
                    .success();
                if !restarted {
                    warn!(%alias, "failed to restart promoted node");
                }
                Ok(restarted)
            }
        }
    }
}

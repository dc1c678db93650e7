//! Node actions: start, stop, kill, and firewall nodes, and put load on the pool.
//!
//! Each action resolves its targets (all nodes, a random pick, or explicit aliases), acts on them
//! one at a time, and succeeds only if the number of nodes it managed to act on reaches the
//! requested count.

use crate::{
    batch::{StopSet, StoppedNode},
    ledger::Ledger,
    node::{self, Ports},
    selection::Selection,
    state::Key,
    strategy::Mechanism,
    Error, Pool,
};
use indy_remote::Executor;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, error, info, warn};

/// Nodes picked by [Pool::kill_random_nodes], and what was done to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomNodes {
    pub selected: Vec<String>,
    pub stopped: StopSet,
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    /// Start nodes in random order until `count` of them report started.
    ///
    /// A node that was already running counts.
    pub async fn ensure_nodes_up(&self, count: usize) -> Result<bool, Error> {
        let mut aliases = self.genesis()?.aliases();
        aliases.shuffle(&mut rand::thread_rng());
        let mut up = 0;
        let mut tried = 0;
        for alias in &aliases {
            if up >= count {
                break;
            }
            tried += 1;
            if self.start_node(alias).await? {
                up += 1;
            }
        }
        info!(up, count, tried, nodes = aliases.len(), "ensured nodes up");
        Ok(up >= count)
    }

    /// Start every node.
    pub async fn all_nodes_up(&self) -> Result<bool, Error> {
        let aliases = self.genesis()?.aliases();
        self.start_nodes(&aliases).await
    }

    /// Start the services of every node in `aliases`.
    pub async fn start_nodes(&self, aliases: &[String]) -> Result<bool, Error> {
        self.require_all(aliases)?;
        let mut started = 0;
        for alias in aliases {
            if self.start_node(alias).await? {
                started += 1;
            }
        }
        info!(started, requested = aliases.len(), "started nodes");
        Ok(started == aliases.len())
    }

    /// Stop the services of every node in `aliases`.
    pub async fn stop_nodes(&self, aliases: &[String]) -> Result<bool, Error> {
        self.require_all(aliases)?;
        let mut stopped = 0;
        for alias in aliases {
            if self.stop_node(alias).await? {
                stopped += 1;
            }
        }
        info!(stopped, requested = aliases.len(), "stopped nodes");
        Ok(stopped == aliases.len())
    }

    /// Start every node except `alias`.
    pub async fn start_all_but(&self, alias: &str) -> Result<bool, Error> {
        let genesis = self.genesis()?;
        genesis.require(alias)?;
        let others: Vec<String> = genesis
            .aliases()
            .into_iter()
            .filter(|other| other != alias)
            .collect();
        self.start_nodes(&others).await
    }

    fn require_all(&self, aliases: &[String]) -> Result<(), Error> {
        let genesis = self.genesis()?;
        for alias in aliases {
            genesis.require(alias)?;
        }
        Ok(())
    }

    /// Nodes recorded by the last [Pool::kill_random_nodes].
    pub fn random_nodes(&self) -> Result<Option<RandomNodes>, Error> {
        self.store.get(&Key::NodesRandom)
    }

    /// Stop `count` nodes picked at random, by `mechanism`.
    pub async fn kill_random_nodes(
        &self,
        count: usize,
        mechanism: Mechanism,
    ) -> Result<bool, Error> {
        let aliases = self.genesis()?.aliases();
        let mut random = RandomNodes {
            selected: Selection::Random.select(&aliases, count),
            stopped: StopSet::new(mechanism),
        };
        self.store.put(&Key::NodesRandom, &random)?;
        for alias in &random.selected {
            let Some(undo) = self.stop_by_strategy(alias, mechanism).await? else {
                continue;
            };
            random.stopped.stopped.push(StoppedNode {
                alias: alias.clone(),
                undo,
            });
            self.store.put(&Key::NodesRandom, &random)?;
        }
        let stopped = random.stopped.stopped.len();
        info!(stopped, count, selected = ?random.selected, %mechanism, "killed random nodes");
        Ok(stopped >= count)
    }

    /// Start the nodes stopped by [Pool::kill_random_nodes].
    pub async fn resurrect_random_nodes(&self, best_effort: bool) -> Result<bool, Error> {
        let Some(mut random) = self.random_nodes()? else {
            if best_effort {
                return Ok(true);
            }
            error!(key = %Key::NodesRandom, "no random nodes recorded");
            return Ok(false);
        };
        random.stopped.check(random.stopped.mechanism)?;
        random.stopped = self.start_set(random.stopped, best_effort).await?;
        self.store.put(&Key::NodesRandom, &random)?;
        Ok(best_effort || random.stopped.is_empty())
    }

    /// Block the node port of `count` nodes picked at random.
    pub async fn block_node_port_random(&self, count: usize) -> Result<bool, Error> {
        let genesis = self.genesis()?;
        let selected = Selection::Random.select(genesis.nodes(), count);
        let mut blocked = BTreeMap::new();
        for node in &selected {
            let ports = Ports::Single(node.node_port);
            if self.block_port(&node.alias, &ports).await? {
                blocked.insert(node.alias.clone(), node.node_port);
            }
        }
        self.store.put(&Key::BlockNodePortRandom, &blocked)?;
        info!(blocked = blocked.len(), count, tried = selected.len(), "blocked node ports");
        Ok(blocked.len() >= count)
    }

    /// Unblock the ports blocked by [Pool::block_node_port_random].
    ///
    /// Ports that stay blocked are kept on record for a later call.
    pub async fn unblock_node_port_random(&self, best_effort: bool) -> Result<bool, Error> {
        let Some(blocked) = self
            .store
            .get::<BTreeMap<String, u16>>(&Key::BlockNodePortRandom)?
        else {
            if best_effort {
                return Ok(true);
            }
            error!(key = %Key::BlockNodePortRandom, "no blocked ports recorded");
            return Ok(false);
        };
        let mut still_blocked = BTreeMap::new();
        for (alias, port) in &blocked {
            if !self.unblock_port(alias, &Ports::Single(*port)).await? {
                still_blocked.insert(alias.clone(), *port);
            }
        }
        info!(
            unblocked = blocked.len() - still_blocked.len(),
            recorded = blocked.len(),
            "unblocked node ports"
        );
        if !best_effort && !still_blocked.is_empty() {
            return Ok(false);
        }
        self.store.put(&Key::BlockNodePortRandom, &still_blocked)?;
        Ok(true)
    }

    /// Unblock the node port of every node.
    pub async fn unblock_node_port_all_nodes(&self, best_effort: bool) -> Result<bool, Error> {
        let genesis = self.genesis()?;
        for node in genesis.nodes() {
            if !self
                .unblock_port(&node.alias, &Ports::Single(node.node_port))
                .await?
                && !best_effort
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop inbound TCP traffic to `ports` on `alias`.
    pub async fn block_port(&self, alias: &str, ports: &Ports) -> Result<bool, Error> {
        self.genesis()?.require(alias)?;
        let blocked = self.on_node(alias, &node::block(ports)).await?.success();
        if !blocked {
            warn!(%alias, %ports, "failed to block port");
        }
        Ok(blocked)
    }

    /// Remove every rule dropping inbound TCP traffic to `ports` on `alias`.
    pub async fn unblock_port(&self, alias: &str, ports: &Ports) -> Result<bool, Error> {
        self.genesis()?.require(alias)?;
        let unblocked = self.on_node(alias, &node::unblock(ports)).await?.success();
        if !unblocked {
            warn!(%alias, %ports, "failed to unblock port");
        }
        Ok(unblocked)
    }

    /// Run the load generator on `client`.
    ///
    /// `command` and `timeout` default to the configured load.
    pub async fn generate_load(
        &self,
        client: &str,
        command: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool, Error> {
        let command = command.unwrap_or(&self.config.load.command);
        let timeout = timeout.unwrap_or(self.config.load.timeout);
        let output = self
            .executor
            .execute(client, command, self.config.load.superuser, timeout)
            .await?;
        if !output.success() {
            warn!(
                %client,
                exit_code = output.exit_code,
                stderr = output.stderr.trim(),
                "load generation failed"
            );
            return Ok(false);
        }
        debug!(%client, stdout = output.stdout.trim(), "load generated");
        Ok(true)
    }

    /// Run the load generator on every client at once.
    ///
    /// Every client runs to completion before a transport error is returned.
    pub async fn generate_load_parallel(
        &self,
        clients: &[String],
        command: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool, Error> {
        let command = command.unwrap_or(&self.config.load.command);
        let timeout = timeout.unwrap_or(self.config.load.timeout);
        let results = self
            .executor
            .execute_all(clients, command, self.config.load.superuser, timeout)
            .await;
        let mut succeeded = 0;
        let mut failure = None;
        for (client, result) in results {
            match result {
                Ok(output) if output.success() => succeeded += 1,
                Ok(output) => warn!(
                    %client,
                    exit_code = output.exit_code,
                    stderr = output.stderr.trim(),
                    "load generation failed"
                ),
                Err(err) => {
                    error!(%client, error = ?err, "load generation unavailable");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        info!(succeeded, clients = clients.len(), "generated load");
        if let Some(err) = failure {
            return Err(err.into());
        }
        Ok(succeeded == clients.len())
    }
}

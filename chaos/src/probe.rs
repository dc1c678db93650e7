//! Observe the pool: validator info, primary, mode, catch-up, and reachability.
//!
//! Every probe works from snapshots persisted by [Pool::refresh]. A snapshot is only as fresh as
//! the last refresh, so probes that need the current state refresh first.
//!
//! # Primary Detection
//!
//! Nodes report the primary they follow, and during a view change some of them lag behind. The
//! primary is therefore decided by vote: only nodes currently holding the validator service on the
//! ledger take part (a demoted node keeps reporting the primary it last knew), and a candidate is
//! elected only if more than half of the participants name it. Without a strict majority there is
//! no primary.

use crate::{
    batch::StopSet,
    config::Source,
    ledger::{Ledger, VALIDATOR},
    primary::StoppedPrimary,
    snapshot::{caught_up, demultiplex, Snapshot, TxnRange, UNKNOWN},
    state::Key,
    Error, Pool,
};
use indy_remote::Executor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::{net::TcpStream, time};
use tracing::{debug, error, info, warn};

/// Votes collected for (and by) one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Primary reported by this node (if it takes part in the vote).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    /// Nodes that report this node as their primary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is_primary_to: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_primary: bool,
}

/// Outcome of a primary vote, persisted under [Key::Primaries].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Primaries {
    #[serde(flatten)]
    pub votes: BTreeMap<String, Vote>,

    /// Number of nodes that took part in the vote.
    pub node_count: usize,

    /// Number of distinct nodes reported as primary by at least one participant.
    pub reported_primaries: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_primary: Option<String>,
}

/// Elect a primary from `reports` (participant -> reported primary).
///
/// Reports from nodes outside `participating`, reports of [UNKNOWN], and votes for nodes outside
/// `participating` are ignored.
pub fn elect(participating: &[String], reports: &BTreeMap<String, String>) -> Primaries {
    let mut primaries = Primaries {
        node_count: participating.len(),
        ..Primaries::default()
    };
    for alias in participating {
        let reported = reports
            .get(alias)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());
        primaries.votes.entry(alias.clone()).or_default().primary = Some(reported.clone());
        if reported == UNKNOWN {
            continue;
        }
        let vote = primaries.votes.entry(reported).or_default();
        if !vote.is_primary_to.contains(alias) {
            vote.is_primary_to.push(alias.clone());
        }
    }
    for alias in participating {
        let Some(vote) = primaries.votes.get_mut(alias) else {
            continue;
        };
        let tally = vote.is_primary_to.len();
        if tally > 0 {
            primaries.reported_primaries += 1;
        }
        if tally * 2 > primaries.node_count {
            vote.is_primary = true;
            primaries.current_primary = Some(alias.clone());
        }
    }
    primaries
}

#[derive(Serialize, Deserialize)]
struct ModeEntry {
    mode: String,
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    /// Last snapshot collected from `alias`, if it exists and can be read.
    pub fn snapshot(&self, alias: &str) -> Option<Snapshot> {
        let raw = match self.store.get_raw(&Key::ValidatorInfo(alias.to_string())) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                debug!(%alias, error = ?err, "failed to read snapshot");
                return None;
            }
        };
        match Snapshot::parse(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                debug!(%alias, error = ?err, "failed to parse snapshot");
                None
            }
        }
    }

    /// Collect and persist a snapshot from every node.
    ///
    /// Snapshots of nodes that did not respond are removed. Returns false if any node did not
    /// respond.
    pub async fn refresh(&self) -> Result<bool, Error> {
        let aliases = self.genesis()?.aliases();
        let cfg = &self.config.validator_info;
        let mut collected = BTreeMap::new();
        match cfg.source {
            Source::Node => {
                let results = self
                    .executor
                    .execute_all(&aliases, &cfg.command, true, cfg.timeout)
                    .await;
                for (alias, result) in results {
                    match result {
                        Ok(output) if output.success() => {
                            collected.insert(alias, output.stdout);
                        }
                        Ok(output) => {
                            warn!(%alias, exit_code = output.exit_code, "validator info failed")
                        }
                        Err(err) if err.is_fatal() => return Err(err.into()),
                        Err(err) => warn!(%alias, error = ?err, "validator info unavailable"),
                    }
                }
            }
            Source::Cli => {
                let output = self.ledger.validator_info().await?;
                for (alias, raw) in demultiplex(&output) {
                    if !aliases.contains(&alias) {
                        debug!(%alias, "ignoring validator info for unknown node");
                        continue;
                    }
                    collected.insert(alias, raw);
                }
            }
        }
        for alias in &aliases {
            let key = Key::ValidatorInfo(alias.clone());
            match collected.get(alias) {
                Some(raw) => self.store.put_raw(&key, raw)?,
                None => {
                    self.store.remove(&key)?;
                }
            }
        }
        info!(
            responded = collected.len(),
            nodes = aliases.len(),
            source = ?cfg.source,
            "refreshed validator info"
        );
        Ok(collected.len() == aliases.len())
    }

    /// Nodes holding the validator service on the ledger, in genesis order.
    pub async fn participating(&self) -> Result<Vec<String>, Error> {
        let services = self.ledger.validator_services().await?;
        Ok(self
            .genesis()?
            .aliases()
            .into_iter()
            .filter(|alias| {
                services
                    .get(alias)
                    .is_some_and(|services| services.iter().any(|s| s == VALIDATOR))
            })
            .collect())
    }

    /// Refresh snapshots, vote on the primary, and persist the outcome.
    pub async fn detect_primary(&self) -> Result<Primaries, Error> {
        self.refresh().await?;
        let participating = self.participating().await?;
        let reports = participating
            .iter()
            .map(|alias| {
                let primary = self
                    .snapshot(alias)
                    .and_then(|snapshot| snapshot.primary_of(alias, 0))
                    .unwrap_or_else(|| UNKNOWN.to_string());
                debug!(%alias, %primary, "reported primary");
                (alias.clone(), primary)
            })
            .collect();
        let primaries = elect(&participating, &reports);
        info!(
            node_count = primaries.node_count,
            reported_primaries = primaries.reported_primaries,
            primary = ?primaries.current_primary,
            "detected primary"
        );
        self.store.put(&Key::Primaries, &primaries)?;
        Ok(primaries)
    }

    /// Current primary, detected afresh if `recompute` (or if it was never detected).
    pub async fn current_primary(&self, recompute: bool) -> Result<Option<String>, Error> {
        let primaries = match self.store.get::<Primaries>(&Key::Primaries)? {
            Some(primaries) if !recompute => primaries,
            _ => self.detect_primary().await?,
        };
        Ok(primaries.current_primary)
    }

    /// Refresh snapshots and persist the mode reported by every node.
    pub async fn current_mode(&self) -> Result<BTreeMap<String, String>, Error> {
        self.refresh().await?;
        let modes: BTreeMap<String, String> = self
            .genesis()?
            .aliases()
            .into_iter()
            .map(|alias| {
                let mode = self
                    .snapshot(&alias)
                    .and_then(|snapshot| snapshot.mode().map(str::to_string))
                    .unwrap_or_else(|| UNKNOWN.to_string());
                (alias, mode)
            })
            .collect();
        let persisted: BTreeMap<&String, ModeEntry> = modes
            .iter()
            .map(|(alias, mode)| (alias, ModeEntry { mode: mode.clone() }))
            .collect();
        self.store.put(&Key::Mode, &persisted)?;
        Ok(modes)
    }

    /// Returns true if exactly `count` nodes report `mode`.
    pub async fn nodes_in_mode(&self, mode: &str, count: usize) -> Result<bool, Error> {
        let modes = self.current_mode().await?;
        let matching = modes.values().filter(|m| *m == mode).count();
        info!(%mode, matching, expected = count, "counted nodes in mode");
        Ok(matching == count)
    }

    /// Returns true if every node in `aliases` has a synced domain ledger whose last catch-up
    /// size lies in `range`.
    pub async fn is_caught_up(&self, aliases: &[String], range: &TxnRange) -> Result<bool, Error> {
        self.refresh().await?;
        let mut lagging = Vec::new();
        for alias in aliases {
            let snapshot = self.snapshot(alias);
            if caught_up(snapshot.as_ref(), range) {
                continue;
            }
            let (status, txns) = snapshot
                .as_ref()
                .map(|snapshot| snapshot.catchup())
                .unwrap_or((None, None));
            warn!(
                %alias,
                status = status.unwrap_or(UNKNOWN),
                ?txns,
                expected = %range,
                "node not caught up"
            );
            lagging.push(alias.clone());
        }
        info!(
            checked = aliases.len(),
            caught_up = aliases.len() - lagging.len(),
            "checked catch-up"
        );
        Ok(lagging.is_empty())
    }

    /// [Pool::is_caught_up] for the nodes last picked by [Pool::kill_random_nodes].
    pub async fn resurrected_nodes_are_caught_up(
        &self,
        range: &TxnRange,
        best_effort: bool,
    ) -> Result<bool, Error> {
        let Some(random) = self.random_nodes()? else {
            if best_effort {
                return Ok(true);
            }
            error!(key = %Key::NodesRandom, "no random nodes recorded");
            return Ok(false);
        };
        self.is_caught_up(&random.selected, range).await
    }

    /// Returns true if the node services are running on every node.
    pub async fn all_nodes_are_up(&self) -> Result<bool, Error> {
        let aliases = self.genesis()?.aliases();
        let command = crate::node::status(&self.config.node.services);
        let results = self
            .executor
            .execute_all(&aliases, &command, true, self.config.node.timeout)
            .await;
        let mut up = 0;
        for (alias, result) in results {
            match result {
                Ok(output) if output.success() => up += 1,
                Ok(_) => debug!(%alias, "node is down"),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => warn!(%alias, error = ?err, "failed to check node"),
            }
        }
        info!(up, nodes = aliases.len(), "checked nodes");
        Ok(up == aliases.len())
    }

    /// Returns true if the client and node ports of `alias` accept TCP connections.
    pub async fn node_ports_are_reachable(&self, alias: &str) -> Result<bool, Error> {
        let genesis = self.genesis()?;
        let node = genesis.require(alias)?;
        for (ip, port) in [
            (&node.client_ip, node.client_port),
            (&node.node_ip, node.node_port),
        ] {
            let timeout = self.config.validator_info.timeout;
            match time::timeout(timeout, TcpStream::connect((ip.as_str(), port))).await {
                Ok(Ok(_)) => debug!(%alias, %ip, port, "port reachable"),
                Ok(Err(err)) => {
                    info!(%alias, %ip, port, error = ?err, "port not reachable");
                    return Ok(false);
                }
                Err(_) => {
                    info!(%alias, %ip, port, "port not reachable (timeout)");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Returns true if the primary and the primary of every backup instance are reachable.
    pub async fn primary_and_replicas_are_reachable(&self) -> Result<bool, Error> {
        let Some(primary) = self.current_primary(true).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        let Some(snapshot) = self.snapshot(&primary) else {
            warn!(%primary, "no snapshot of primary");
            return Ok(false);
        };
        if !self.node_ports_are_reachable(&primary).await? {
            return Ok(false);
        }
        let replicas = snapshot.count_of_replicas().unwrap_or(1);
        for instance in 1..replicas {
            let Some(replica) = snapshot.primary_of(&primary, instance) else {
                warn!(%primary, instance, "backup primary unknown");
                return Ok(false);
            };
            if !self.node_ports_are_reachable(&replica).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns true if the primary no longer reaches any backup primary stopped by
    /// [Pool::stop_n_nodes].
    pub async fn demoted_backup_primaries_are_excluded(&self) -> Result<bool, Error> {
        let Some(stopped) = self.store.get::<StopSet>(&Key::StoppedNodes)? else {
            error!(key = %Key::StoppedNodes, "no stopped nodes recorded");
            return Ok(false);
        };
        let Some(primary) = self.current_primary(true).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        let Some(snapshot) = self.snapshot(&primary) else {
            warn!(%primary, "no snapshot of primary");
            return Ok(false);
        };
        let reachable = snapshot.reachable_nodes();
        let still_reached: Vec<_> = stopped
            .stopped_backup_primaries
            .iter()
            .filter(|alias| reachable.contains(alias))
            .collect();
        if !still_reached.is_empty() {
            error!(%primary, ?still_reached, "primary still reaches demoted nodes");
            return Ok(false);
        }
        Ok(true)
    }

    /// Returns true if the primary predicted by [Pool::stop_f_backup_primaries_before_primary]
    /// was elected.
    pub async fn next_primary_elected(&self) -> Result<bool, Error> {
        let Some(record) = self.store.get::<StoppedPrimary>(&Key::StoppedPrimary)? else {
            error!(key = %Key::StoppedPrimary, "no stopped primary recorded");
            return Ok(false);
        };
        let Some(expected) = record.next_primary else {
            error!("no next primary predicted");
            return Ok(false);
        };
        let current = self.current_primary(true).await?;
        info!(%expected, ?current, "checked next primary");
        Ok(current.as_deref() == Some(expected.as_str()))
    }

    /// Delete collected snapshots (`per_node`) or the whole run state.
    ///
    /// Nothing is deleted unless `cleanup` is set.
    pub fn delete_validator_info(&self, cleanup: bool, per_node: bool) -> Result<bool, Error> {
        if !cleanup {
            info!(dir = ?self.store.dir(), "skipping cleanup");
            return Ok(true);
        }
        if !per_node {
            self.store.destroy()?;
            return Ok(true);
        }
        let aliases = self.genesis()?.aliases();
        let mut deleted = 0;
        for alias in &aliases {
            if self.store.remove(&Key::ValidatorInfo(alias.clone()))? {
                deleted += 1;
            }
        }
        debug!(deleted, nodes = aliases.len(), "deleted validator info");
        Ok(true)
    }

    /// Write a NYM to check the pool accepts writes.
    pub async fn write_nym(&self) -> Result<bool, Error> {
        let written = self.ledger.write_nym().await?;
        info!(written, "wrote NYM");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::Harness;

    fn aliases(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Node{i}")).collect()
    }

    fn reports(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, p)| (a.to_string(), p.to_string()))
            .collect()
    }

    #[test]
    fn test_elect_majority() {
        let participating = aliases(4);
        let reports = reports(&[
            ("Node1", "Node2"),
            ("Node2", "Node2"),
            ("Node3", "Node2"),
            ("Node4", "Node1"),
        ]);
        let primaries = elect(&participating, &reports);
        assert_eq!(primaries.current_primary.as_deref(), Some("Node2"));
        assert_eq!(primaries.node_count, 4);
        assert_eq!(primaries.reported_primaries, 2);
        assert!(primaries.votes["Node2"].is_primary);
        assert_eq!(
            primaries.votes["Node2"].is_primary_to,
            vec!["Node1", "Node2", "Node3"]
        );
        assert_eq!(primaries.votes["Node4"].primary.as_deref(), Some("Node1"));
    }

    #[test]
    fn test_elect_requires_strict_majority() {
        let participating = aliases(4);

        // Two of four is a tie, not a majority
        let tie = reports(&[
            ("Node1", "Node1"),
            ("Node2", "Node1"),
            ("Node3", "Node3"),
            ("Node4", "Node3"),
        ]);
        let primaries = elect(&participating, &tie);
        assert_eq!(primaries.current_primary, None);
        assert!(primaries.votes.values().all(|vote| !vote.is_primary));

        // A plurality is not enough either
        let participating = aliases(5);
        let plurality = reports(&[
            ("Node1", "Node1"),
            ("Node2", "Node1"),
            ("Node3", "Node3"),
            ("Node4", "Node4"),
            ("Node5", UNKNOWN),
        ]);
        assert_eq!(elect(&participating, &plurality).current_primary, None);
    }

    #[test]
    fn test_elect_ignores_non_participants() {
        // Node4 was demoted and keeps naming itself
        let participating = aliases(3);
        let reports = reports(&[
            ("Node1", "Node4"),
            ("Node2", "Node2"),
            ("Node3", "Node2"),
            ("Node4", "Node4"),
        ]);
        let primaries = elect(&participating, &reports);
        assert_eq!(primaries.current_primary.as_deref(), Some("Node2"));
        assert_eq!(primaries.node_count, 3);

        // Node4 collected a vote but cannot win
        assert!(!primaries.votes["Node4"].is_primary);
        assert_eq!(primaries.votes["Node4"].primary, None);
    }

    #[test]
    fn test_elect_unknown_reports() {
        let participating = aliases(3);
        let reports = reports(&[("Node1", UNKNOWN), ("Node2", "Node1")]);
        let primaries = elect(&participating, &reports);
        assert_eq!(primaries.current_primary, None);
        assert_eq!(primaries.votes["Node3"].primary.as_deref(), Some(UNKNOWN));
        assert!(!primaries.votes.contains_key(UNKNOWN));
    }

    #[test]
    fn test_primaries_encoding() {
        let primaries = elect(
            &aliases(2),
            &reports(&[("Node1", "Node1"), ("Node2", "Node1")]),
        );
        let encoded = serde_json::to_value(&primaries).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({
                "Node1": {"primary": "Node1", "is_primary_to": ["Node1", "Node2"], "is_primary": true},
                "Node2": {"primary": "Node1"},
                "node_count": 2,
                "reported_primaries": 1,
                "current_primary": "Node1"
            })
        );
        assert_eq!(
            serde_json::from_value::<Primaries>(encoded).unwrap(),
            primaries
        );
    }

    #[tokio::test]
    async fn test_refresh_partial() {
        let harness = Harness::new(4);
        assert!(harness.pool.refresh().await.unwrap());
        assert!(harness.pool.snapshot("Node3").is_some());

        // A stopped node does not answer and its old snapshot is dropped
        harness.sim.set_running("Node3", false);
        assert!(!harness.pool.refresh().await.unwrap());
        assert!(harness.pool.snapshot("Node3").is_none());
        assert!(harness.pool.snapshot("Node4").is_some());
    }

    #[tokio::test]
    async fn test_refresh_authentication_fails() {
        let harness = Harness::new(4);
        harness.sim.lock_out("Node2");
        assert!(matches!(
            harness.pool.refresh().await,
            Err(Error::Remote(indy_remote::Error::Authentication { .. }))
        ));
    }

    #[tokio::test]
    async fn test_refresh_from_cli() {
        let harness = Harness::with_config(4, |config| {
            config.validator_info.source = Source::Cli;
        });
        harness.sim.set_running("Node4", false);
        assert!(!harness.pool.refresh().await.unwrap());
        assert_eq!(
            harness.pool.snapshot("Node1").unwrap().mode(),
            Some("participating")
        );
        assert!(harness.pool.snapshot("Node4").is_none());

        // Nodes are never queried directly
        assert!(harness.sim.commands("Node1").is_empty());
    }

    #[tokio::test]
    async fn test_detect_primary() {
        let harness = Harness::new(4);
        let primaries = harness.pool.detect_primary().await.unwrap();
        assert_eq!(primaries.current_primary.as_deref(), Some("Node1"));
        assert_eq!(primaries.node_count, 4);
        assert_eq!(
            harness.pool.store().get::<Primaries>(&Key::Primaries).unwrap(),
            Some(primaries)
        );

        // Cached unless recomputed
        harness.sim.set_view(1);
        assert_eq!(
            harness.pool.current_primary(false).await.unwrap().as_deref(),
            Some("Node1")
        );
        assert_eq!(
            harness.pool.current_primary(true).await.unwrap().as_deref(),
            Some("Node2")
        );
    }

    #[tokio::test]
    async fn test_detect_primary_ignores_demoted() {
        let harness = Harness::new(7);
        harness.sim.set_services("Node1", &[]);

        // Node1 is the stale primary of the demoted node; the rest moved on
        let primaries = harness.pool.detect_primary().await.unwrap();
        assert_eq!(primaries.node_count, 6);
        assert_eq!(primaries.current_primary.as_deref(), Some("Node2"));
        assert!(!primaries.votes.contains_key("Node1") || !primaries.votes["Node1"].is_primary);
    }

    #[tokio::test]
    async fn test_modes() {
        let harness = Harness::new(4);
        harness.sim.set_mode("Node2", "syncing");
        harness.sim.set_running("Node4", false);
        let modes = harness.pool.current_mode().await.unwrap();
        assert_eq!(modes["Node1"], "participating");
        assert_eq!(modes["Node2"], "syncing");
        assert_eq!(modes["Node4"], UNKNOWN);
        let persisted: serde_json::Value = harness.pool.store().get(&Key::Mode).unwrap().unwrap();
        assert_eq!(persisted["Node2"]["mode"], "syncing");

        assert!(harness.pool.nodes_in_mode("participating", 2).await.unwrap());
        assert!(!harness.pool.nodes_in_mode("participating", 3).await.unwrap());
        assert!(harness.pool.nodes_in_mode(UNKNOWN, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_caught_up() {
        let harness = Harness::new(4);
        let range: TxnRange = "10 to 20".parse().unwrap();
        harness.sim.set_catchup("Node1", "synced", 10);
        harness.sim.set_catchup("Node2", "synced", 20);
        harness.sim.set_catchup("Node3", "syncing", 15);
        harness.sim.set_catchup("Node4", "synced", 21);

        let check = |aliases: &[&str]| {
            let aliases: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
            let pool = &harness.pool;
            async move { pool.is_caught_up(&aliases, &range).await.unwrap() }
        };
        assert!(check(&["Node1", "Node2"]).await);
        assert!(!check(&["Node1", "Node3"]).await);
        assert!(!check(&["Node4"]).await);
        assert!(check(&[]).await);

        // A node that cannot be read is never caught up
        harness.sim.set_running("Node1", false);
        assert!(!check(&["Node1"]).await);
    }

    #[tokio::test]
    async fn test_resurrected_without_record() {
        let harness = Harness::new(4);
        let range: TxnRange = "0".parse().unwrap();
        assert!(harness
            .pool
            .resurrected_nodes_are_caught_up(&range, true)
            .await
            .unwrap());
        assert!(!harness
            .pool
            .resurrected_nodes_are_caught_up(&range, false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_all_nodes_are_up() {
        let harness = Harness::new(4);
        assert!(harness.pool.all_nodes_are_up().await.unwrap());
        harness.sim.set_running("Node2", false);
        assert!(!harness.pool.all_nodes_are_up().await.unwrap());
    }

    #[tokio::test]
    async fn test_node_ports_are_reachable() {
        let harness = Harness::with_config(4, |config| {
            config.validator_info.timeout = std::time::Duration::from_millis(200);
        });

        // Nothing listens on the simulated addresses
        assert!(!harness.pool.node_ports_are_reachable("Node1").await.unwrap());
        assert!(matches!(
            harness.pool.node_ports_are_reachable("Node9").await,
            Err(Error::UnknownAlias(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_validator_info() {
        let harness = Harness::new(4);
        harness.pool.refresh().await.unwrap();
        harness.pool.store().put(&Key::Mode, &"kept").unwrap();

        assert!(harness.pool.delete_validator_info(false, true).unwrap());
        assert!(harness.pool.snapshot("Node1").is_some());

        assert!(harness.pool.delete_validator_info(true, true).unwrap());
        assert!(harness.pool.snapshot("Node1").is_none());
        assert!(harness.pool.store().get_raw(&Key::Mode).unwrap().is_some());

        assert!(harness.pool.delete_validator_info(true, false).unwrap());
        assert!(!harness.pool.store().dir().exists());
    }
}

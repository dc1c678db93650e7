//! Stop a selection of nodes in one step, and start them again later.

use crate::{
    ledger::Ledger,
    selection::Selection,
    state::Key,
    strategy::{Mechanism, Undo},
    Error, Pool,
};
use indy_remote::Executor;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// A node stopped by a batch, and how to start it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedNode {
    pub alias: String,
    pub undo: Undo,
}

/// Nodes stopped by one batch, in the order they were stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSet {
    pub mechanism: Mechanism,
    pub stopped: Vec<StoppedNode>,

    /// Primary at the time of the stop, if it was stopped.
    #[serde(default)]
    pub stopped_primary: Option<String>,

    #[serde(default)]
    pub stopped_backup_primaries: Vec<String>,
}

impl StopSet {
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            stopped: Vec::new(),
            stopped_primary: None,
            stopped_backup_primaries: Vec::new(),
        }
    }

    /// Ensure every recorded descriptor was produced by `expected`.
    pub fn check(&self, expected: Mechanism) -> Result<(), Error> {
        for node in &self.stopped {
            let recorded = node.undo.mechanism();
            if recorded != expected {
                return Err(Error::MechanismMismatch {
                    alias: node.alias.clone(),
                    recorded,
                    expected,
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty()
    }

    /// Forget `alias` once it has been started.
    fn forget(&mut self, alias: &str) {
        self.stopped.retain(|node| node.alias != alias);
        if self.stopped_primary.as_deref() == Some(alias) {
            self.stopped_primary = None;
        }
        self.stopped_backup_primaries.retain(|backup| backup != alias);
    }
}

/// Order stop candidates: the primary, then backup primaries, then everyone else.
///
/// Backup primaries and other nodes keep the order of `aliases`.
pub fn candidates(
    aliases: &[String],
    primary: Option<&str>,
    backups: &[String],
    include_primary: bool,
    include_backups: bool,
    include_others: bool,
) -> Vec<String> {
    let mut candidates = Vec::new();
    if include_primary {
        candidates.extend(primary.map(str::to_string));
    }
    let not_primary = |alias: &&String| Some(alias.as_str()) != primary;
    if include_backups {
        candidates.extend(
            aliases
                .iter()
                .filter(not_primary)
                .filter(|alias| backups.contains(alias))
                .cloned(),
        );
    }
    if include_others {
        candidates.extend(
            aliases
                .iter()
                .filter(not_primary)
                .filter(|alias| !backups.contains(alias))
                .cloned(),
        );
    }
    candidates
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    /// Primaries of the backup instances, as seen by `primary`.
    pub fn backup_primaries(&self, primary: &str) -> Vec<String> {
        let Some(snapshot) = self.snapshot(primary) else {
            return Vec::new();
        };
        let replicas = snapshot.count_of_replicas().unwrap_or(1);
        let mut backups = Vec::new();
        for instance in 1..replicas {
            match snapshot.primary_of(primary, instance) {
                Some(backup) if backup != primary && !backups.contains(&backup) => {
                    backups.push(backup)
                }
                Some(_) => {}
                None => warn!(%primary, instance, "backup primary unknown"),
            }
        }
        backups
    }

    /// Stop `min(count, candidates)` nodes picked by `selection`, one at a time.
    ///
    /// The stopped set is persisted after every successful stop. If the primary was stopped and
    /// `wait_for_view_change` is set, the batch only succeeds once another primary is elected.
    #[allow(clippy::too_many_arguments)]
    pub async fn stop_n_nodes(
        &self,
        count: usize,
        selection: Selection,
        mechanism: Mechanism,
        include_primary: bool,
        include_backups: bool,
        include_others: bool,
        wait_for_view_change: bool,
    ) -> Result<bool, Error> {
        let aliases = self.genesis()?.aliases();
        let primary = self.current_primary(true).await?;
        let backups = match &primary {
            Some(primary) => self.backup_primaries(primary),
            None => {
                warn!("no primary detected");
                Vec::new()
            }
        };
        let candidates = candidates(
            &aliases,
            primary.as_deref(),
            &backups,
            include_primary,
            include_backups,
            include_others,
        );
        let selected = selection.select(&candidates, count);
        info!(?primary, ?backups, ?selected, %selection, %mechanism, "stopping nodes");

        let mut set = StopSet::new(mechanism);
        self.store.put(&Key::StoppedNodes, &set)?;
        for alias in &selected {
            let Some(undo) = self.stop_by_strategy(alias, mechanism).await? else {
                warn!(%alias, "failed to stop node");
                continue;
            };
            set.stopped.push(StoppedNode {
                alias: alias.clone(),
                undo,
            });
            if primary.as_ref() == Some(alias) {
                set.stopped_primary = Some(alias.clone());
            } else if backups.contains(alias) {
                set.stopped_backup_primaries.push(alias.clone());
            }
            self.store.put(&Key::StoppedNodes, &set)?;
        }
        info!(
            requested = count,
            selected = selected.len(),
            stopped = set.stopped.len(),
            "stopped nodes"
        );
        if set.stopped.len() < selected.len() {
            return Ok(false);
        }

        if let (true, Some(stopped_primary)) = (wait_for_view_change, &set.stopped_primary) {
            let max_polls = self.config.view_change.max_polls;
            let observed = self
                .wait_for_view_change(stopped_primary, max_polls, self.config.view_change.interval)
                .await?;
            if observed.is_none() {
                error!(%stopped_primary, max_polls, "no view change");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Start every node recorded by [Pool::stop_n_nodes].
    ///
    /// Nodes that fail to start stay recorded so a later call can retry them.
    pub async fn start_stopped_nodes(&self, best_effort: bool) -> Result<bool, Error> {
        let Some(set) = self.store.get::<StopSet>(&Key::StoppedNodes)? else {
            if best_effort {
                return Ok(true);
            }
            error!(key = %Key::StoppedNodes, "no stopped nodes recorded");
            return Ok(false);
        };
        set.check(set.mechanism)?;
        let remaining = self.start_set(set, best_effort).await?;
        self.store.put(&Key::StoppedNodes, &remaining)?;
        Ok(best_effort || remaining.is_empty())
    }

    /// Replay every descriptor of `set`, returning the nodes that could not be started.
    pub(crate) async fn start_set(&self, set: StopSet, best_effort: bool) -> Result<StopSet, Error> {
        let mut remaining = set.clone();
        let mut started = 0;
        for node in &set.stopped {
            if self
                .start_by_strategy(&node.alias, &node.undo, best_effort)
                .await?
            {
                remaining.forget(&node.alias);
                started += 1;
            } else {
                warn!(alias = %node.alias, "failed to start node");
            }
        }
        info!(
            recorded = set.stopped.len(),
            started,
            best_effort,
            "started nodes"
        );
        Ok(remaining)
    }
}

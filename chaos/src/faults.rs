//! Shrink the fault tolerance of the pool by demoting validators, and restore it.
//!
//! A pool of `n` validators tolerates `f` faults where `n = 3f + 3` at the smallest. To bring the
//! live `f` down to a target, demote enough validators (never the primary) that the remaining
//! count matches that target.

use crate::{
    batch::{StopSet, StoppedNode},
    ledger::Ledger,
    selection::Selection,
    state::Key,
    strategy::Mechanism,
    Error, Pool,
};
use indy_remote::Executor;
use tokio::time;
use tracing::{error, info, warn};

/// Number of validators to demote so `node_count` validators tolerate only `target_f` faults.
pub fn demotion_count(node_count: usize, target_f: usize) -> usize {
    node_count.saturating_sub(3 * target_f + 3)
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    /// Demote validators (picked by `selection`) until the pool tolerates `target` faults.
    ///
    /// Demotions are persisted under [Key::DemotedNodes] for [Pool::revert_f].
    pub async fn decrease_f_to(&self, target: usize, selection: Selection) -> Result<bool, Error> {
        let Some(primary) = self.current_primary(true).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        let Some(current) = self.snapshot(&primary).and_then(|snapshot| snapshot.f_value()) else {
            warn!(%primary, "fault tolerance unknown");
            return Ok(false);
        };
        if target < 1 || target >= current {
            return Err(Error::InvalidTarget { target, current });
        }

        let participating = self.participating().await?;
        let count = demotion_count(participating.len(), target);
        let candidates: Vec<String> = participating
            .into_iter()
            .filter(|alias| *alias != primary)
            .collect();
        let selected = selection.select(&candidates, count);
        info!(current, target, count, ?selected, %primary, "demoting nodes");

        let mut set = StopSet::new(Mechanism::Demote);
        self.store.put(&Key::DemotedNodes, &set)?;
        for alias in &selected {
            let Some(undo) = self.stop_by_strategy(alias, Mechanism::Demote).await? else {
                continue;
            };
            set.stopped.push(StoppedNode {
                alias: alias.clone(),
                undo,
            });
            self.store.put(&Key::DemotedNodes, &set)?;
        }
        info!(required = count, demoted = set.stopped.len(), "demoted nodes");
        time::sleep(self.config.settle).await;
        Ok(set.stopped.len() == count)
    }

    /// Promote every node demoted by [Pool::decrease_f_to].
    pub async fn revert_f(&self, best_effort: bool) -> Result<bool, Error> {
        let Some(set) = self.store.get::<StopSet>(&Key::DemotedNodes)? else {
            if best_effort {
                return Ok(true);
            }
            error!(key = %Key::DemotedNodes, "no demoted nodes recorded");
            return Ok(false);
        };
        set.check(Mechanism::Demote)?;
        let remaining = self.start_set(set, best_effort).await?;
        self.store.put(&Key::DemotedNodes, &remaining)?;
        time::sleep(self.config.settle).await;
        Ok(best_effort || remaining.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks::Harness, probe::Primaries, strategy::Undo};

    #[test]
    fn test_demotion_count() {
        assert_eq!(demotion_count(12, 1), 6);
        assert_eq!(demotion_count(12, 2), 3);
        assert_eq!(demotion_count(7, 1), 1);
        assert_eq!(demotion_count(6, 1), 0);
        assert_eq!(demotion_count(4, 1), 0);
    }

    #[tokio::test]
    async fn test_decrease_f_to() {
        let harness = Harness::new(12);
        assert!(harness
            .pool
            .decrease_f_to(1, Selection::Random)
            .await
            .unwrap());
        let set: StopSet = harness.pool.store().get(&Key::DemotedNodes).unwrap().unwrap();
        assert_eq!(set.stopped.len(), 6);
        assert!(set.stopped.iter().all(|node| node.alias != "Node1"));
        assert!(set.stopped.iter().all(|node| node.undo == Undo::Demote));
        assert!(harness.sim.in_consensus("Node1"));

        // Six validators remain, tolerating a single fault under the same primary
        let primaries: Primaries = harness.pool.detect_primary().await.unwrap();
        assert_eq!(primaries.node_count, 6);
        assert_eq!(primaries.current_primary.as_deref(), Some("Node1"));
        assert_eq!(harness.pool.snapshot("Node1").unwrap().f_value(), Some(1));

        assert!(harness.pool.revert_f(false).await.unwrap());
        assert_eq!(harness.pool.participating().await.unwrap().len(), 12);
        let set: StopSet = harness.pool.store().get(&Key::DemotedNodes).unwrap().unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_decrease_f_never_demotes_primary() {
        let harness = Harness::new(12);
        harness.sim.set_view(5);
        assert!(harness
            .pool
            .decrease_f_to(1, Selection::Reverse)
            .await
            .unwrap());
        let set: StopSet = harness.pool.store().get(&Key::DemotedNodes).unwrap().unwrap();
        let demoted: Vec<_> = set.stopped.iter().map(|n| n.alias.as_str()).collect();
        assert_eq!(
            demoted,
            vec!["Node12", "Node11", "Node10", "Node9", "Node8", "Node7"]
        );
        assert!(harness.sim.in_consensus("Node6"));
    }

    #[tokio::test]
    async fn test_invalid_target() {
        let harness = Harness::new(12);
        for target in [0, 3, 4] {
            assert!(matches!(
                harness.pool.decrease_f_to(target, Selection::Forward).await,
                Err(Error::InvalidTarget { current: 3, .. })
            ));
        }

        // Validation happens before any demotion
        assert_eq!(harness.pool.participating().await.unwrap().len(), 12);
        assert!(harness
            .pool
            .store()
            .get_raw(&Key::DemotedNodes)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_revert_without_record() {
        let harness = Harness::new(4);
        assert!(harness.pool.revert_f(true).await.unwrap());
        assert!(!harness.pool.revert_f(false).await.unwrap());
    }

    #[tokio::test]
    async fn test_revert_rejects_other_mechanisms() {
        let harness = Harness::new(4);
        let mut set = StopSet::new(Mechanism::Demote);
        set.stopped.push(StoppedNode {
            alias: "Node2".into(),
            undo: Undo::Kill,
        });
        harness.pool.store().put(&Key::DemotedNodes, &set).unwrap();
        assert!(matches!(
            harness.pool.revert_f(true).await,
            Err(Error::MechanismMismatch {
                recorded: Mechanism::Kill,
                expected: Mechanism::Demote,
                ..
            })
        ));
    }
}

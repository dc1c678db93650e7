//! Stop the primary (and some of its backups), then bring it back.

use crate::{
    batch::StoppedNode,
    ledger::Ledger,
    state::Key,
    strategy::{Mechanism, Undo},
    Error, Pool,
};
use indy_remote::Executor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

/// What [Pool::stop_primary] (or [Pool::stop_f_backup_primaries_before_primary]) did.
///
/// Persisted under [Key::StoppedPrimary] before the primary is stopped, and again once it is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedPrimary {
    pub stopped_primary: String,
    pub stop_strategy: Mechanism,

    /// Descriptor returned by the stop (missing if the stop failed or was interrupted).
    #[serde(default)]
    pub stopped_primary_details: Option<Undo>,

    #[serde(default)]
    pub stopped_backup_primaries: Vec<StoppedNode>,

    /// Primary expected to take over.
    #[serde(default)]
    pub next_primary: Option<String>,
}

impl StoppedPrimary {
    fn new(primary: &str, mechanism: Mechanism) -> Self {
        Self {
            stopped_primary: primary.to_string(),
            stop_strategy: mechanism,
            stopped_primary_details: None,
            stopped_backup_primaries: Vec::new(),
            next_primary: None,
        }
    }
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    fn stopped_primary(&self) -> Result<Option<StoppedPrimary>, Error> {
        let record = self.store.get::<StoppedPrimary>(&Key::StoppedPrimary)?;
        if record.is_none() {
            error!(key = %Key::StoppedPrimary, "no stopped primary recorded");
        }
        Ok(record)
    }

    /// Stop the current primary by `mechanism`.
    pub async fn stop_primary(&self, mechanism: Mechanism) -> Result<bool, Error> {
        let Some(primary) = self.current_primary(true).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        let mut record = StoppedPrimary::new(&primary, mechanism);
        self.store.put(&Key::StoppedPrimary, &record)?;
        record.stopped_primary_details = self.stop_by_strategy(&primary, mechanism).await?;
        self.store.put(&Key::StoppedPrimary, &record)?;
        Ok(record.stopped_primary_details.is_some())
    }

    /// Start the stopped primary whether or not a view change happened.
    ///
    /// With `start_backups`, stopped backup primaries are started first.
    pub async fn start_stopped_primary(&self, start_backups: bool) -> Result<bool, Error> {
        let Some(record) = self.stopped_primary()? else {
            return Ok(false);
        };
        self.restart_primary(&record, start_backups).await
    }

    /// Start the stopped primary once another node has been elected in its place.
    ///
    /// Nothing is started if no view change is observed within `max_polls` checks.
    pub async fn start_stopped_primary_after_view_change(
        &self,
        max_polls: usize,
        interval: Duration,
        start_backups: bool,
    ) -> Result<bool, Error> {
        let Some(record) = self.stopped_primary()? else {
            return Ok(false);
        };
        let observed = self
            .wait_for_view_change(&record.stopped_primary, max_polls, interval)
            .await?;
        if observed.is_none() {
            error!(
                stopped_primary = %record.stopped_primary,
                max_polls,
                "no view change, leaving primary stopped"
            );
            return Ok(false);
        }
        self.restart_primary(&record, start_backups).await
    }

    async fn restart_primary(
        &self,
        record: &StoppedPrimary,
        start_backups: bool,
    ) -> Result<bool, Error> {
        if start_backups {
            for backup in &record.stopped_backup_primaries {
                let recorded = backup.undo.mechanism();
                if recorded != record.stop_strategy {
                    return Err(Error::MechanismMismatch {
                        alias: backup.alias.clone(),
                        recorded,
                        expected: record.stop_strategy,
                    });
                }
                if !self
                    .start_by_strategy(&backup.alias, &backup.undo, false)
                    .await?
                {
                    error!(alias = %backup.alias, "failed to start backup primary");
                    return Ok(false);
                }
            }
        }

        // An interrupted stop leaves no descriptor, so rebuild the one it would have returned
        let undo = match &record.stopped_primary_details {
            Some(undo) => undo.clone(),
            None => self.undo_for(&record.stopped_primary, record.stop_strategy)?,
        };
        if undo.mechanism() != record.stop_strategy {
            return Err(Error::MechanismMismatch {
                alias: record.stopped_primary.clone(),
                recorded: undo.mechanism(),
                expected: record.stop_strategy,
            });
        }
        self.start_by_strategy(&record.stopped_primary, &undo, false)
            .await
    }

    /// Poll the primary until it is no longer `previous`.
    ///
    /// Returns the number of polls consumed up to the one that saw another primary (`Some(1)` if
    /// the first one did), or `None` if no poll did. A zero budget never polls.
    pub async fn wait_for_view_change(
        &self,
        previous: &str,
        max_polls: usize,
        interval: Duration,
    ) -> Result<Option<usize>, Error> {
        for poll in 1..=max_polls {
            match self.current_primary(true).await? {
                Some(current) if current != previous => {
                    info!(%previous, %current, poll, "view change observed");
                    return Ok(Some(poll));
                }
                current => debug!(%previous, ?current, poll, max_polls, "waiting for view change"),
            }
            if poll < max_polls {
                time::sleep(interval).await;
            }
        }
        Ok(None)
    }

    /// Stop up to `f - 1` backup primaries, then the primary.
    ///
    /// Backups are stopped in instance order, so the primary of instance `f` is expected to take
    /// over; it is recorded as the next primary. `f` defaults to the smaller of the primary's
    /// replica count and its reported fault tolerance.
    pub async fn stop_f_backup_primaries_before_primary(
        &self,
        f: Option<usize>,
        mechanism: Mechanism,
    ) -> Result<bool, Error> {
        let Some(primary) = self.current_primary(true).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        let Some(snapshot) = self.snapshot(&primary) else {
            warn!(%primary, "no snapshot of primary");
            return Ok(false);
        };
        let f = match (f, snapshot.count_of_replicas(), snapshot.f_value()) {
            (Some(f), _, _) => f,
            (None, Some(replicas), Some(f_value)) => replicas.min(f_value),
            (None, replicas, f_value) => {
                warn!(%primary, ?replicas, ?f_value, "fault tolerance unknown");
                return Ok(false);
            }
        };
        if f == 0 {
            warn!(%primary, "pool tolerates no faults");
            return Ok(false);
        }

        let mut record = StoppedPrimary::new(&primary, mechanism);
        record.next_primary = snapshot.primary_of(&primary, f);
        self.store.put(&Key::StoppedPrimary, &record)?;
        info!(%primary, f, next_primary = ?record.next_primary, "stopping backup primaries");

        let mut stopped_all = true;
        for instance in 1..f {
            let Some(backup) = snapshot.primary_of(&primary, instance) else {
                warn!(%primary, instance, "backup primary unknown");
                stopped_all = false;
                continue;
            };
            match self.stop_by_strategy(&backup, mechanism).await? {
                Some(undo) => {
                    record
                        .stopped_backup_primaries
                        .push(StoppedNode { alias: backup, undo });
                    self.store.put(&Key::StoppedPrimary, &record)?;
                }
                None => stopped_all = false,
            }
        }
        record.stopped_primary_details = self.stop_by_strategy(&primary, mechanism).await?;
        self.store.put(&Key::StoppedPrimary, &record)?;
        info!(
            %primary,
            backups = record.stopped_backup_primaries.len(),
            primary_stopped = record.stopped_primary_details.is_some(),
            "stopped primary"
        );
        Ok(stopped_all && record.stopped_primary_details.is_some())
    }

    /// Start every node except the last detected primary.
    pub async fn start_all_but_primary(&self) -> Result<bool, Error> {
        let Some(primary) = self.current_primary(false).await? else {
            warn!("no primary detected");
            return Ok(false);
        };
        self.start_all_but(&primary).await
    }
}

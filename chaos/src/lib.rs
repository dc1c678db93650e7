//! Inject faults into (and observe) Indy Node pools.
//!
//! `indy-chaos` is a library of actions (stop, kill, firewall, demote, or shrink the fault
//! tolerance of validator nodes) and probes (validator info, primary detection, catch-up status)
//! that chaos experiments compose into steady-state hypotheses and methods.
//!
//! Every operation is a method on [Pool], which binds together:
//! * the pool genesis file (read fresh on every query, see [genesis]),
//! * a per-run [state::Store] that lets a later invocation undo what an earlier one did,
//! * an [indy_remote::Executor] that runs fixed shell commands on validator hosts,
//! * a [ledger::Ledger] client that submits ledger transactions and queries.
//!
//! # Stop and Start
//!
//! Every way of removing a node from consensus (see [strategy::Mechanism]) returns an
//! [strategy::Undo] descriptor that is persisted before the operation reports success. The paired
//! start operation replays that descriptor, so the inverse always matches what was done.
//!
//! # Success Contract
//!
//! Actions and probes return `Ok(bool)`. `false` means the pool did not reach the expected state
//! (fewer nodes stopped than requested, no view change within the poll budget, a node not caught
//! up). `Err` is reserved for broken infrastructure (authentication, unreachable transport) and
//! invalid arguments, which are rejected before any remote side effect.

use indy_remote::Executor;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

pub mod actions;
pub mod batch;
pub mod config;
pub mod faults;
pub mod genesis;
pub mod ledger;
#[cfg(test)]
pub mod mocks;
pub mod node;
pub mod primary;
pub mod probe;
pub mod selection;
pub mod snapshot;
pub mod state;
pub mod strategy;

use config::Config;
use genesis::Genesis;
use ledger::Ledger;
use state::Store;
use strategy::Mechanism;

/// Environment variable that carries the run identifier between experiment phases.
pub const RUN_ENV: &str = "INDY_CHAOS_RUN";

/// Errors that can occur when running an action or probe.
#[derive(Debug, Error)]
pub enum Error {
    #[error("remote error: {0}")]
    Remote(#[from] indy_remote::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("genesis file {path:?} has no node records")]
    EmptyGenesis { path: PathBuf },
    #[error("invalid selection strategy: {0}")]
    InvalidSelection(String),
    #[error("invalid stop mechanism: {0}")]
    InvalidMechanism(String),
    #[error("invalid transaction range: {0}")]
    InvalidRange(String),
    #[error("invalid target f {target}: must be at least 1 and below the current f {current}")]
    InvalidTarget { target: usize, current: usize },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
    #[error("invalid run id: {0:?}")]
    InvalidRun(String),
    #[error("unknown alias: {0}")]
    UnknownAlias(String),
    #[error("{alias} was stopped with {recorded}, expected {expected}")]
    MechanismMismatch {
        alias: String,
        recorded: Mechanism,
        expected: Mechanism,
    },
    #[error("ledger request timed out after {0:?}")]
    LedgerTimeout(Duration),
    #[error("ledger client failed: {0}")]
    Ledger(String),
}

/// An Indy Node pool under experiment.
#[derive(Clone)]
pub struct Pool<E: Executor, L: Ledger> {
    config: Config,
    store: Store,
    executor: E,
    ledger: L,
}

impl<E: Executor, L: Ledger> Pool<E, L> {
    pub fn new(config: Config, store: Store, executor: E, ledger: L) -> Self {
        Self {
            config,
            store,
            executor,
            ledger,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Load the genesis file.
    ///
    /// The file is read on every call: experiments are short and the file does not change while
    /// they run.
    pub fn genesis(&self) -> Result<Genesis, Error> {
        Genesis::load(&config::expand(&self.config.genesis)?)
    }
}

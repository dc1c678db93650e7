//! Parse validator info reported by a node.
//!
//! A snapshot arrives either bare (from the status dump run on the node) or wrapped in a `data`
//! envelope (from the ledger client). Only the fields used by probes and actions are decoded;
//! everything else is ignored. Anything that cannot be read degrades to [UNKNOWN], which never
//! matches an expected value.

use crate::Error;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Stands in for a value that could not be read from a snapshot.
pub const UNKNOWN: &str = "Unknown";

/// Marker printed by the ledger client before each node's response.
pub const RESPONSE_MARKER: &str = "Get validator info response for node ";

/// Ledger whose catch-up is tracked (the domain ledger).
const CATCHUP_LEDGER: &str = "1";

/// Ledger status reported once catch-up completes.
const SYNCED: &str = "synced";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "Node_info", default)]
    pub node_info: NodeInfo,
    #[serde(rename = "Pool_info", default)]
    pub pool_info: PoolInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Mode")]
    pub mode: Option<String>,
    #[serde(rename = "Client_port")]
    pub client_port: Option<u16>,
    #[serde(rename = "Node_port")]
    pub node_port: Option<u16>,
    #[serde(rename = "Count_of_replicas")]
    pub count_of_replicas: Option<usize>,
    #[serde(rename = "Replicas_status", default)]
    pub replicas_status: BTreeMap<String, ReplicaStatus>,
    #[serde(rename = "Catchup_status", default)]
    pub catchup_status: CatchupStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ReplicaStatus {
    #[serde(rename = "Primary")]
    pub primary: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CatchupStatus {
    #[serde(rename = "Ledger_statuses", default)]
    pub ledger_statuses: BTreeMap<String, String>,
    #[serde(rename = "Number_txns_in_catchup", default)]
    pub number_txns_in_catchup: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PoolInfo {
    pub f_value: Option<usize>,
    /// Either bare aliases or `[alias, rank]` pairs, depending on the node version.
    #[serde(rename = "Reachable_nodes", default)]
    pub reachable_nodes: Vec<Value>,
}

impl Snapshot {
    /// Parse a snapshot, unwrapping the `data` envelope if present.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut value: Value = serde_json::from_str(raw)?;
        if let Some(data) = value.get_mut("data") {
            value = data.take();
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Alias of the primary of protocol instance `instance`, as seen by `alias`.
    ///
    /// Instance 0 is the master; instances `1..` are backups ranked by how soon their primary
    /// takes over.
    pub fn primary_of(&self, alias: &str, instance: usize) -> Option<String> {
        let status = self
            .node_info
            .replicas_status
            .get(&format!("{alias}:{instance}"))?;
        let primary = status.primary.as_deref()?;
        let primary = primary.split(':').next().unwrap_or(primary);
        if primary.is_empty() {
            return None;
        }
        Some(primary.to_string())
    }

    pub fn mode(&self) -> Option<&str> {
        self.node_info.mode.as_deref()
    }

    pub fn f_value(&self) -> Option<usize> {
        self.pool_info.f_value
    }

    pub fn count_of_replicas(&self) -> Option<usize> {
        self.node_info.count_of_replicas
    }

    /// Aliases the node can currently reach.
    pub fn reachable_nodes(&self) -> Vec<String> {
        self.pool_info
            .reachable_nodes
            .iter()
            .filter_map(|entry| match entry {
                Value::String(alias) => Some(alias.clone()),
                Value::Array(pair) => pair.first()?.as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    /// Domain ledger status and the number of transactions in its last catch-up.
    pub fn catchup(&self) -> (Option<&str>, Option<u64>) {
        let status = &self.node_info.catchup_status;
        (
            status.ledger_statuses.get(CATCHUP_LEDGER).map(String::as_str),
            status.number_txns_in_catchup.get(CATCHUP_LEDGER).copied(),
        )
    }
}

/// Returns true if `snapshot` reports a synced domain ledger whose catch-up size is in `range`.
pub fn caught_up(snapshot: Option<&Snapshot>, range: &TxnRange) -> bool {
    let Some(snapshot) = snapshot else {
        return false;
    };
    match snapshot.catchup() {
        (Some(SYNCED), Some(txns)) => range.contains(txns),
        _ => false,
    }
}

/// Split ledger client output into `(alias, raw snapshot)` pairs.
///
/// Each response is the line following a [RESPONSE_MARKER] line naming the node.
pub fn demultiplex(output: &str) -> Vec<(String, String)> {
    let mut responses = Vec::new();
    let mut lines = output.lines().peekable();
    while let Some(line) = lines.next() {
        let Some((_, rest)) = line.split_once(RESPONSE_MARKER) else {
            continue;
        };
        let alias = rest.split(':').next().unwrap_or_default().trim();

        // A node that did not answer is followed directly by the next marker
        let payload = match lines.peek() {
            Some(&next) if !next.contains(RESPONSE_MARKER) => next,
            _ => continue,
        };
        lines.next();
        if !alias.is_empty() {
            responses.push((alias.to_string(), payload.trim().to_string()));
        }
    }
    responses
}

/// Inclusive range of transaction counts, written `"<low> to <high>"` (or `"<n>"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxnRange {
    pub low: u64,
    pub high: u64,
}

impl TxnRange {
    pub fn contains(&self, txns: u64) -> bool {
        self.low <= txns && txns <= self.high
    }
}

impl FromStr for TxnRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRange(s.to_string());
        let parse = |part: &str| part.trim().parse::<u64>().map_err(|_| invalid());
        let (low, high) = match s.split_once(" to ") {
            Some((low, high)) => (parse(low)?, parse(high)?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };
        if low > high {
            return Err(invalid());
        }
        Ok(Self { low, high })
    }
}

impl fmt::Display for TxnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.low, self.high)
    }
}

//! Read node records from a pool genesis transaction file.
//!
//! The file holds one ledger transaction per line. Node records carry their addressing under
//! `txn.data.data` and their ledger identity under `txn.data.dest`.

use crate::Error;
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path};
use tracing::warn;

/// A validator node, as described by the genesis file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Node {
    pub alias: String,
    pub client_ip: String,
    pub client_port: u16,
    pub node_ip: String,
    pub node_port: u16,

    /// Ledger identity (target of node transactions).
    #[serde(skip)]
    pub dest: String,

    /// Services granted at genesis.
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Deserialize)]
struct Record {
    txn: Txn,
}

#[derive(Deserialize)]
struct Txn {
    data: TxnData,
}

#[derive(Deserialize)]
struct TxnData {
    data: Node,
    dest: String,
}

/// Nodes of a pool, in genesis order.
#[derive(Clone, Debug)]
pub struct Genesis {
    nodes: Vec<Node>,
}

impl Genesis {
    /// Load the genesis file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path)?;
        let genesis = Self::parse(&raw)?;
        if genesis.nodes.is_empty() {
            return Err(Error::EmptyGenesis {
                path: path.to_path_buf(),
            });
        }
        Ok(genesis)
    }

    /// Parse newline-delimited genesis transactions.
    ///
    /// Blank lines are skipped. A repeated alias keeps its first record.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let record: Record = serde_json::from_str(line)?;
            let mut node = record.txn.data.data;
            node.dest = record.txn.data.dest;
            if !seen.insert(node.alias.clone()) {
                warn!(alias = %node.alias, "ignoring duplicate genesis record");
                continue;
            }
            nodes.push(node);
        }
        Ok(Self { nodes })
    }

    /// Aliases, in file order.
    pub fn aliases(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.alias.clone()).collect()
    }

    pub fn node(&self, alias: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.alias == alias)
    }

    /// Like [Genesis::node], but an unknown alias is an error.
    pub fn require(&self, alias: &str) -> Result<&Node, Error> {
        self.node(alias)
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))
    }

    /// Position of `alias` in the file.
    pub fn position(&self, alias: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.alias == alias)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

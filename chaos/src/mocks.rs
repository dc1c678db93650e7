//! In-memory Indy pool for tests.
//!
//! [Simulation] answers the node commands issued by [crate::node] and the ledger requests of
//! [Ledger] against a shared model of the pool: which processes run, which ports are firewalled,
//! which nodes hold the validator service, and which view the pool is in. The primary of view `v`
//! is the `v`-th validator (modulo their count). Whenever a node is queried, the view advances past
//! validators that cannot take part in consensus (unless frozen), and every node that can take part
//! adopts it. Other nodes keep reporting the primaries they saw last.

use crate::{
    config::Config,
    genesis::Node,
    ledger::{Ledger, Services, VALIDATOR},
    node::{self, Ports},
    snapshot::RESPONSE_MARKER,
    state::Store,
    Error, Pool,
};
use indy_remote::{Executor, Output};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    env, fs,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Genesis transaction of `Node{i}` (client port `9700 + 2i`, node port `9699 + 2i`).
pub fn genesis_line(i: usize) -> String {
    json!({
        "reqSignature": {},
        "txn": {
            "data": {
                "data": {
                    "alias": format!("Node{i}"),
                    "client_ip": format!("10.0.0.{i}"),
                    "client_port": 9700 + 2 * i,
                    "node_ip": format!("10.0.0.{i}"),
                    "node_port": 9699 + 2 * i,
                    "services": [VALIDATOR],
                },
                "dest": format!("Dest{i}"),
            },
            "metadata": {"from": "Th7MpTaRZVRYnPiabds81Y"},
            "type": "0",
        },
        "txnMetadata": {"seqNo": i},
        "ver": "1",
    })
    .to_string()
}

/// Observable state of a simulated node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub running: bool,
    /// Port specs firewalled on the host.
    pub blocked: BTreeSet<String>,
    pub services: Vec<String>,
}

struct Host {
    alias: String,
    client_port: u16,
    node_port: u16,
    running: bool,
    lingering: bool,
    blocked: BTreeSet<String>,
    services: Vec<String>,
    mode: String,
    catchup: (String, u64),

    /// Primary of each instance, as last seen by this node.
    primaries: Vec<String>,
}

impl Host {
    fn firewalled(&self) -> bool {
        self.blocked.iter().any(|spec| match spec.parse::<Ports>() {
            Ok(Ports::Single(port)) => port == self.client_port || port == self.node_port,
            Ok(Ports::Range(low, high)) => [self.client_port, self.node_port]
                .iter()
                .any(|port| (low..=high).contains(port)),
            Err(_) => false,
        })
    }

    fn in_consensus(&self) -> bool {
        self.running && !self.firewalled() && self.services.iter().any(|s| s == VALIDATOR)
    }
}

struct State {
    hosts: Vec<Host>,
    view: usize,
    frozen: bool,
    reject_ledger_writes: bool,
    locked_out: BTreeSet<String>,
    failing: BTreeSet<(String, String)>,
    calls: Vec<(String, String, bool)>,
    services: Vec<String>,
    process: String,
    validator_info: String,
}

impl State {
    fn host(&mut self, alias: &str) -> &mut Host {
        self.hosts
            .iter_mut()
            .find(|host| host.alias == alias)
            .unwrap_or_else(|| panic!("unknown host {alias}"))
    }

    fn validators(&self) -> Vec<usize> {
        (0..self.hosts.len())
            .filter(|i| self.hosts[*i].services.iter().any(|s| s == VALIDATOR))
            .collect()
    }

    fn f(&self) -> usize {
        self.validators().len().saturating_sub(1) / 3
    }

    /// Primary of every instance in the current view.
    fn primaries(&self) -> Vec<String> {
        let validators = self.validators();
        if validators.is_empty() {
            return Vec::new();
        }
        (0..=self.f())
            .map(|instance| {
                let index = validators[(self.view + instance) % validators.len()];
                self.hosts[index].alias.clone()
            })
            .collect()
    }

    /// Move past primaries that cannot take part in consensus, then share the view.
    fn settle(&mut self) {
        let validators = self.validators();
        if !self.frozen {
            for _ in 0..validators.len() {
                let primary = validators[self.view % validators.len()];
                if self.hosts[primary].in_consensus() {
                    break;
                }
                self.view += 1;
            }
        }
        let primaries = self.primaries();
        for host in self.hosts.iter_mut().filter(|host| host.in_consensus()) {
            host.primaries = primaries.clone();
        }
    }

    fn snapshot(&self, index: usize) -> Value {
        let host = &self.hosts[index];
        let f = self.f();
        let replicas: BTreeMap<String, Value> = (0..=f)
            .map(|instance| {
                let primary = host
                    .primaries
                    .get(instance)
                    .map(|primary| format!("{primary}:{instance}"));
                (
                    format!("{}:{instance}", host.alias),
                    json!({ "Primary": primary }),
                )
            })
            .collect();
        let reachable: Vec<Value> = self
            .hosts
            .iter()
            .filter(|other| other.in_consensus())
            .map(|other| json!([other.alias, null]))
            .collect();
        json!({
            "Node_info": {
                "Name": host.alias,
                "Mode": host.mode,
                "Client_port": host.client_port,
                "Node_port": host.node_port,
                "Count_of_replicas": f + 1,
                "Replicas_status": replicas,
                "Catchup_status": {
                    "Ledger_statuses": {"0": "synced", "1": host.catchup.0, "2": "synced"},
                    "Number_txns_in_catchup": {"0": 0, "1": host.catchup.1, "2": 0},
                },
            },
            "Pool_info": {
                "f_value": f,
                "Reachable_nodes": reachable,
            },
        })
    }

    fn run(&mut self, host: &str, command: &str) -> Output {
        let ok = || Output::new(0, "", "");
        if self.failing.contains(&(host.to_string(), command.to_string())) {
            return Output::new(1, "", "command failed");
        }
        let Some(index) = self.hosts.iter().position(|h| h.alias == host) else {
            // Clients run load and nothing else
            return Output::new(0, "load generated\n", "");
        };
        if command == node::start(&self.services) || command == node::restart(&self.services) {
            self.hosts[index].running = true;
            return ok();
        }
        if command == node::stop(&self.services) {
            let host = &mut self.hosts[index];
            host.running = host.lingering;
            return ok();
        }
        if command == node::status(&self.services) {
            return match self.hosts[index].running {
                true => ok(),
                false => Output::new(3, "inactive\n", ""),
            };
        }
        if command == node::process_count(&self.process) {
            let count = usize::from(self.hosts[index].running);
            return Output::new(i32::from(count == 0), format!("{count}\n"), "");
        }
        if command == node::kill(&self.process) {
            let host = &mut self.hosts[index];
            host.running = false;
            host.lingering = false;
            return ok();
        }
        if command == self.validator_info {
            if !self.hosts[index].running {
                return Output::new(1, "", "node is not running\n");
            }
            self.settle();
            return Output::new(0, self.snapshot(index).to_string(), "");
        }
        if let Some((block, spec)) = firewall(command) {
            let host = &mut self.hosts[index];
            if block {
                host.blocked.insert(spec);
            } else {
                host.blocked.remove(&spec);
            }
            return ok();
        }
        ok()
    }
}

/// Whether `command` adds (`true`) or removes (`false`) a firewall rule, and for which ports.
fn firewall(command: &str) -> Option<(bool, String)> {
    let block = if command.starts_with("iptables -C ") {
        true
    } else if command.starts_with("while iptables -C ") {
        false
    } else {
        return None;
    };
    let spec = ["--destination-port ", "--dports "]
        .iter()
        .find_map(|flag| command.split_once(flag))
        .map(|(_, rest)| rest.split(' ').next().unwrap_or_default().to_string())?;
    Some((block, spec))
}

/// Simulated pool, usable as both [Executor] and [Ledger].
#[derive(Clone)]
pub struct Simulation {
    state: Arc<Mutex<State>>,
}

impl Simulation {
    /// A pool of `n` running validators in view 0.
    pub fn new(n: usize, config: &Config) -> Self {
        let hosts = (1..=n)
            .map(|i| Host {
                alias: format!("Node{i}"),
                client_port: (9700 + 2 * i) as u16,
                node_port: (9699 + 2 * i) as u16,
                running: true,
                lingering: false,
                blocked: BTreeSet::new(),
                services: vec![VALIDATOR.to_string()],
                mode: "participating".to_string(),
                catchup: ("synced".to_string(), 0),
                primaries: Vec::new(),
            })
            .collect();
        let mut state = State {
            hosts,
            view: 0,
            frozen: false,
            reject_ledger_writes: false,
            locked_out: BTreeSet::new(),
            failing: BTreeSet::new(),
            calls: Vec::new(),
            services: config.node.services.clone(),
            process: config.node.process.clone(),
            validator_info: config.validator_info.command.clone(),
        };
        state.settle();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn node_state(&self, alias: &str) -> NodeState {
        self.with(|state| {
            let host = state.host(alias);
            NodeState {
                running: host.running,
                blocked: host.blocked.clone(),
                services: host.services.clone(),
            }
        })
    }

    /// Whether `alias` runs, is reachable, and holds the validator service.
    pub fn in_consensus(&self, alias: &str) -> bool {
        self.with(|state| state.host(alias).in_consensus())
    }

    /// Primary the pool currently follows.
    pub fn primary(&self) -> Option<String> {
        self.with(|state| {
            state.settle();
            state.primaries().into_iter().next()
        })
    }

    /// Commands run on `host`, in order.
    pub fn commands(&self, host: &str) -> Vec<String> {
        self.with(|state| {
            state
                .calls
                .iter()
                .filter(|(h, _, _)| h == host)
                .map(|(_, command, _)| command.clone())
                .collect()
        })
    }

    /// Commands run as superuser on `host`, in order.
    pub fn superuser_commands(&self, host: &str) -> Vec<String> {
        self.with(|state| {
            state
                .calls
                .iter()
                .filter(|(h, _, superuser)| h == host && *superuser)
                .map(|(_, command, _)| command.clone())
                .collect()
        })
    }

    /// Keep the node process of `alias` alive when its services are stopped.
    pub fn linger(&self, alias: &str) {
        self.with(|state| state.host(alias).lingering = true);
    }

    pub fn set_running(&self, alias: &str, running: bool) {
        self.with(|state| state.host(alias).running = running);
    }

    pub fn set_services(&self, alias: &str, services: &[&str]) {
        self.with(|state| {
            state.host(alias).services = services.iter().map(|s| s.to_string()).collect()
        });
    }

    pub fn set_mode(&self, alias: &str, mode: &str) {
        self.with(|state| state.host(alias).mode = mode.to_string());
    }

    pub fn set_catchup(&self, alias: &str, status: &str, txns: u64) {
        self.with(|state| state.host(alias).catchup = (status.to_string(), txns));
    }

    /// Move the pool to `view`.
    pub fn set_view(&self, view: usize) {
        self.with(|state| {
            state.view = view;
            state.settle();
        });
    }

    /// Stop (or resume) view changes.
    pub fn freeze(&self, frozen: bool) {
        self.with(|state| state.frozen = frozen);
    }

    pub fn reject_ledger_writes(&self, reject: bool) {
        self.with(|state| state.reject_ledger_writes = reject);
    }

    /// Fail authentication to `host`.
    pub fn lock_out(&self, host: &str) {
        self.with(|state| state.locked_out.insert(host.to_string()));
    }

    /// Make `command` exit non-zero on `host`.
    pub fn fail_command(&self, host: &str, command: &str) {
        self.with(|state| state.failing.insert((host.to_string(), command.to_string())));
    }
}

impl Executor for Simulation {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        _timeout: Duration,
    ) -> Result<Output, indy_remote::Error> {
        self.with(|state| {
            state
                .calls
                .push((host.to_string(), command.to_string(), superuser));
            if state.locked_out.contains(host) {
                return Err(indy_remote::Error::Authentication {
                    host: host.to_string(),
                    reason: "Permission denied (publickey).".to_string(),
                });
            }
            Ok(state.run(host, command))
        })
    }
}

impl Ledger for Simulation {
    async fn set_services(&self, node: &Node, services: Services) -> Result<bool, Error> {
        self.with(|state| {
            if state.reject_ledger_writes {
                return Ok(false);
            }
            state.host(&node.alias).services = match services {
                Services::Validator => vec![VALIDATOR.to_string()],
                Services::None => Vec::new(),
            };
            Ok(true)
        })
    }

    async fn validator_services(&self) -> Result<BTreeMap<String, Vec<String>>, Error> {
        self.with(|state| {
            Ok(state
                .hosts
                .iter()
                .map(|host| (host.alias.clone(), host.services.clone()))
                .collect())
        })
    }

    async fn validator_info(&self) -> Result<String, Error> {
        self.with(|state| {
            state.settle();
            let mut output = String::from("Pool \"chaosindy\" has been connected\n");
            for index in 0..state.hosts.len() {
                output.push_str(&format!("{RESPONSE_MARKER}{}:\n", state.hosts[index].alias));
                if state.hosts[index].running {
                    output.push_str(&format!("{}\n", json!({ "data": state.snapshot(index) })));
                }
            }
            Ok(output)
        })
    }

    async fn write_nym(&self) -> Result<bool, Error> {
        self.with(|state| Ok(!state.reject_ledger_writes))
    }
}

/// A [Pool] over a [Simulation], with its genesis file and state in a temporary directory.
pub struct Harness {
    pub pool: Pool<Simulation, Simulation>,
    pub sim: Simulation,
    dir: PathBuf,
}

impl Harness {
    pub fn new(n: usize) -> Self {
        Self::with_config(n, |_| {})
    }

    /// Like [Harness::new], adjusting the (poll-free) configuration first.
    pub fn with_config(n: usize, configure: impl FnOnce(&mut Config)) -> Self {
        let dir = env::temp_dir().join(format!("indy_chaos_pool_{}", rand::random::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        let genesis = dir.join("pool_transactions_genesis");
        let lines: Vec<String> = (1..=n).map(genesis_line).collect();
        fs::write(&genesis, lines.join("\n")).unwrap();

        let mut config = Config {
            genesis,
            state_directory: dir.join("state"),
            settle: Duration::ZERO,
            ..Config::default()
        };
        config.node.stop_polls = 3;
        config.node.stop_poll_interval = Duration::ZERO;
        config.view_change.max_polls = 3;
        config.view_change.interval = Duration::ZERO;
        configure(&mut config);

        let store = Store::open(&config.state_directory, "run").unwrap();
        let sim = Simulation::new(n, &config);
        let pool = Pool::new(config, store, sim.clone(), sim.clone());
        Self { pool, sim, dir }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_change() {
        let harness = Harness::new(4);
        assert_eq!(harness.sim.primary().as_deref(), Some("Node1"));
        harness.sim.set_running("Node1", false);
        harness.sim.set_running("Node2", false);
        assert_eq!(harness.sim.primary().as_deref(), Some("Node3"));

        // A returning node does not take the primary back
        harness.sim.set_running("Node1", true);
        assert_eq!(harness.sim.primary().as_deref(), Some("Node3"));
    }

    #[test]
    fn test_firewall_parsing() {
        assert_eq!(
            firewall(&node::block(&Ports::Single(9702))),
            Some((true, "9702".to_string()))
        );
        assert_eq!(
            firewall(&node::unblock(&Ports::Range(9701, 9708))),
            Some((false, "9701:9708".to_string()))
        );
        assert_eq!(firewall("systemctl stop 'indy-node'"), None);
    }
}

//! Indy Chaos CLI
//!
//! Every subcommand runs one action or probe and exits with success only if it returned `true`.
//! Phases of one experiment share state through the run identifier (`--run` or `INDY_CHAOS_RUN`),
//! which `session` generates.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indy_chaos::{
    config::Config, ledger::IndyCli, node::Ports, selection::Selection, snapshot::TxnRange,
    state::Store, strategy::Mechanism, Error, Pool, RUN_ENV,
};
use indy_remote::{Parallel, Ssh};
use std::{env, path::PathBuf, process::ExitCode, time::Duration};
use tracing::{error, info};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

const VERBOSE_FLAG: &str = "verbose";
const CONFIG_FLAG: &str = "config";
const RUN_FLAG: &str = "run";

const SESSION_CMD: &str = "session";

// Probes
const REFRESH_CMD: &str = "refresh";
const DETECT_PRIMARY_CMD: &str = "detect-primary";
const CURRENT_PRIMARY_CMD: &str = "current-primary";
const CURRENT_MODE_CMD: &str = "current-mode";
const NODES_IN_MODE_CMD: &str = "nodes-in-mode";
const IS_CAUGHT_UP_CMD: &str = "is-caught-up";
const RESURRECTED_CAUGHT_UP_CMD: &str = "resurrected-nodes-are-caught-up";
const ALL_NODES_ARE_UP_CMD: &str = "all-nodes-are-up";
const PORTS_REACHABLE_CMD: &str = "node-ports-are-reachable";
const REPLICAS_REACHABLE_CMD: &str = "primary-and-replicas-are-reachable";
const DEMOTED_EXCLUDED_CMD: &str = "demoted-backup-primaries-are-excluded";
const NEXT_PRIMARY_ELECTED_CMD: &str = "next-primary-elected";
const WRITE_NYM_CMD: &str = "write-nym";
const DELETE_VALIDATOR_INFO_CMD: &str = "delete-validator-info";

// Batches, primary, and fault tolerance
const STOP_N_NODES_CMD: &str = "stop-n-nodes";
const START_STOPPED_NODES_CMD: &str = "start-stopped-nodes";
const STOP_PRIMARY_CMD: &str = "stop-primary";
const START_STOPPED_PRIMARY_CMD: &str = "start-stopped-primary";
const START_AFTER_VIEW_CHANGE_CMD: &str = "start-stopped-primary-after-view-change";
const WAIT_FOR_VIEW_CHANGE_CMD: &str = "wait-for-view-change";
const STOP_F_BACKUPS_CMD: &str = "stop-f-backup-primaries-before-primary";
const START_ALL_BUT_PRIMARY_CMD: &str = "start-all-but-primary";
const DECREASE_F_TO_CMD: &str = "decrease-f-to";
const REVERT_F_CMD: &str = "revert-f";

// Node actions
const ENSURE_NODES_UP_CMD: &str = "ensure-nodes-up";
const ALL_NODES_UP_CMD: &str = "all-nodes-up";
const START_NODES_CMD: &str = "start-nodes";
const STOP_NODES_CMD: &str = "stop-nodes";
const START_ALL_BUT_CMD: &str = "start-all-but";
const KILL_RANDOM_CMD: &str = "kill-random-nodes";
const RESURRECT_RANDOM_CMD: &str = "resurrect-random-nodes";
const BLOCK_RANDOM_CMD: &str = "block-node-port-random";
const UNBLOCK_RANDOM_CMD: &str = "unblock-node-port-random";
const UNBLOCK_ALL_CMD: &str = "unblock-node-port-all-nodes";
const BLOCK_PORT_CMD: &str = "block-port";
const UNBLOCK_PORT_CMD: &str = "unblock-port";
const GENERATE_LOAD_CMD: &str = "generate-load";
const GENERATE_LOAD_PARALLEL_CMD: &str = "generate-load-parallel";

fn alias() -> Arg {
    Arg::new("alias")
        .long("alias")
        .required(true)
        .help("Node alias (as in the genesis file)")
        .value_parser(value_parser!(String))
}

fn aliases() -> Arg {
    Arg::new("aliases")
        .long("aliases")
        .required(true)
        .num_args(1..)
        .value_delimiter(',')
        .help("Comma-separated node aliases")
        .value_parser(value_parser!(String))
}

fn count() -> Arg {
    Arg::new("count")
        .long("count")
        .required(true)
        .help("Number of nodes")
        .value_parser(value_parser!(usize))
}

fn toggle(name: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .default_value(default)
        .help(help)
        .value_parser(value_parser!(bool))
}

fn best_effort() -> Arg {
    toggle(
        "best-effort",
        "true",
        "Succeed even if some nodes cannot be restored (or nothing was recorded)",
    )
}

fn mechanism() -> Arg {
    Arg::new("mechanism")
        .long("mechanism")
        .default_value("service")
        .help("How nodes are stopped: service, kill, port, or demote")
        .value_parser(|s: &str| s.parse::<Mechanism>())
}

fn selection() -> Arg {
    Arg::new("selection")
        .long("selection")
        .default_value("forward")
        .help("How nodes are picked: forward, reverse, or random")
        .value_parser(|s: &str| s.parse::<Selection>())
}

fn range() -> Arg {
    Arg::new("range")
        .long("range")
        .required(true)
        .help("Expected transactions in the last catch-up: \"<low> to <high>\" or \"<n>\"")
        .value_parser(|s: &str| s.parse::<TxnRange>())
}

fn ports() -> Arg {
    Arg::new("ports")
        .long("ports")
        .required(true)
        .help("TCP port (9701) or port range (9701:9708)")
        .value_parser(|s: &str| s.parse::<Ports>())
}

fn seconds(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .value_parser(|s: &str| {
            s.parse::<f64>()
                .map_err(|e| e.to_string())
                .and_then(|secs| Duration::try_from_secs_f64(secs).map_err(|e| e.to_string()))
        })
}

fn load(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("command")
            .long("command")
            .help("Load generator command (defaults to the configured one)")
            .value_parser(value_parser!(String)),
    )
    .arg(seconds("timeout", "Seconds before the load generator is abandoned"))
}

fn cli() -> Command {
    Command::new("indy-chaos")
        .version(crate_version())
        .about("Inject faults into (and observe) an Indy Node pool.")
        .subcommand_required(true)
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(CONFIG_FLAG)
                .long(CONFIG_FLAG)
                .global(true)
                .help("Path to YAML config file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(RUN_FLAG)
                .long(RUN_FLAG)
                .global(true)
                .help(format!("Run identifier (defaults to ${RUN_ENV})"))
                .value_parser(value_parser!(String)),
        )
        .subcommand(Command::new(SESSION_CMD).about("Print a fresh run identifier."))
        .subcommand(
            Command::new(REFRESH_CMD).about("Collect validator info from every node."),
        )
        .subcommand(
            Command::new(DETECT_PRIMARY_CMD)
                .about("Vote on the primary from fresh validator info."),
        )
        .subcommand(
            Command::new(CURRENT_PRIMARY_CMD)
                .about("Print the current primary.")
                .arg(toggle(
                    "recompute",
                    "true",
                    "Detect afresh instead of using the last detection",
                )),
        )
        .subcommand(Command::new(CURRENT_MODE_CMD).about("Print the mode of every node."))
        .subcommand(
            Command::new(NODES_IN_MODE_CMD)
                .about("Check that exactly --count nodes report --mode.")
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .arg(count()),
        )
        .subcommand(
            Command::new(IS_CAUGHT_UP_CMD)
                .about("Check that nodes finished catching up within a transaction range.")
                .arg(aliases())
                .arg(range()),
        )
        .subcommand(
            Command::new(RESURRECTED_CAUGHT_UP_CMD)
                .about("Check that the nodes picked by kill-random-nodes caught up.")
                .arg(range())
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(ALL_NODES_ARE_UP_CMD).about("Check that every node's services run."),
        )
        .subcommand(
            Command::new(PORTS_REACHABLE_CMD)
                .about("Check that a node's client and node ports accept connections.")
                .arg(alias()),
        )
        .subcommand(
            Command::new(REPLICAS_REACHABLE_CMD)
                .about("Check that the primary and every backup primary are reachable."),
        )
        .subcommand(
            Command::new(DEMOTED_EXCLUDED_CMD)
                .about("Check that the primary no longer reaches stopped backup primaries."),
        )
        .subcommand(
            Command::new(NEXT_PRIMARY_ELECTED_CMD)
                .about("Check that the predicted next primary took over."),
        )
        .subcommand(Command::new(WRITE_NYM_CMD).about("Check that the pool accepts writes."))
        .subcommand(
            Command::new(DELETE_VALIDATOR_INFO_CMD)
                .about("Delete collected validator info (or the whole run state).")
                .arg(toggle("cleanup", "true", "Delete anything at all"))
                .arg(toggle(
                    "per-node",
                    "true",
                    "Delete only per-node validator info, keeping the rest of the run",
                )),
        )
        .subcommand(
            Command::new(STOP_N_NODES_CMD)
                .about("Stop nodes picked from the primary, backup primaries, and other nodes.")
                .arg(count())
                .arg(selection())
                .arg(mechanism())
                .arg(toggle("include-primary", "true", "Consider the primary"))
                .arg(toggle(
                    "include-backup-primaries",
                    "true",
                    "Consider backup primaries",
                ))
                .arg(toggle("include-other-nodes", "true", "Consider all other nodes"))
                .arg(toggle(
                    "wait-for-view-change",
                    "true",
                    "Fail unless another primary is elected when the primary is stopped",
                )),
        )
        .subcommand(
            Command::new(START_STOPPED_NODES_CMD)
                .about("Start the nodes stopped by stop-n-nodes.")
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(STOP_PRIMARY_CMD)
                .about("Stop the current primary.")
                .arg(mechanism()),
        )
        .subcommand(
            Command::new(START_STOPPED_PRIMARY_CMD)
                .about("Start the stopped primary, view change or not.")
                .arg(toggle("start-backups", "true", "Start stopped backup primaries first")),
        )
        .subcommand(
            Command::new(START_AFTER_VIEW_CHANGE_CMD)
                .about("Start the stopped primary once another node has taken over.")
                .arg(
                    Arg::new("max-polls")
                        .long("max-polls")
                        .help("Primary checks before giving up (defaults to the configured value)")
                        .value_parser(value_parser!(usize)),
                )
                .arg(seconds("interval", "Seconds between primary checks"))
                .arg(toggle("start-backups", "true", "Start stopped backup primaries first")),
        )
        .subcommand(
            Command::new(WAIT_FOR_VIEW_CHANGE_CMD)
                .about("Wait until the primary is no longer --previous.")
                .arg(
                    Arg::new("previous")
                        .long("previous")
                        .required(true)
                        .value_parser(value_parser!(String)),
                ),
        )
        .subcommand(
            Command::new(STOP_F_BACKUPS_CMD)
                .about("Stop f-1 backup primaries, then the primary.")
                .arg(
                    Arg::new("f")
                        .long("f")
                        .help("Fault tolerance (defaults to what the primary reports)")
                        .value_parser(value_parser!(usize)),
                )
                .arg(mechanism()),
        )
        .subcommand(
            Command::new(START_ALL_BUT_PRIMARY_CMD)
                .about("Start every node except the last detected primary."),
        )
        .subcommand(
            Command::new(DECREASE_F_TO_CMD)
                .about("Demote validators until the pool tolerates --target faults.")
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .value_parser(value_parser!(usize)),
                )
                .arg(selection()),
        )
        .subcommand(
            Command::new(REVERT_F_CMD)
                .about("Promote the nodes demoted by decrease-f-to.")
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(ENSURE_NODES_UP_CMD)
                .about("Start random nodes until --count of them run.")
                .arg(count()),
        )
        .subcommand(Command::new(ALL_NODES_UP_CMD).about("Start every node."))
        .subcommand(
            Command::new(START_NODES_CMD)
                .about("Start the given nodes.")
                .arg(aliases()),
        )
        .subcommand(
            Command::new(STOP_NODES_CMD)
                .about("Stop the given nodes.")
                .arg(aliases()),
        )
        .subcommand(
            Command::new(START_ALL_BUT_CMD)
                .about("Start every node except --alias.")
                .arg(alias()),
        )
        .subcommand(
            Command::new(KILL_RANDOM_CMD)
                .about("Stop --count random nodes.")
                .arg(count())
                .arg(mechanism()),
        )
        .subcommand(
            Command::new(RESURRECT_RANDOM_CMD)
                .about("Start the nodes stopped by kill-random-nodes.")
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(BLOCK_RANDOM_CMD)
                .about("Block the node port of --count random nodes.")
                .arg(count()),
        )
        .subcommand(
            Command::new(UNBLOCK_RANDOM_CMD)
                .about("Unblock the ports blocked by block-node-port-random.")
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(UNBLOCK_ALL_CMD)
                .about("Unblock the node port of every node.")
                .arg(best_effort()),
        )
        .subcommand(
            Command::new(BLOCK_PORT_CMD)
                .about("Block TCP ports on a node.")
                .arg(alias())
                .arg(ports()),
        )
        .subcommand(
            Command::new(UNBLOCK_PORT_CMD)
                .about("Unblock TCP ports on a node.")
                .arg(alias())
                .arg(ports()),
        )
        .subcommand(load(
            Command::new(GENERATE_LOAD_CMD)
                .about("Run the load generator on a client.")
                .arg(
                    Arg::new("client")
                        .long("client")
                        .required(true)
                        .value_parser(value_parser!(String)),
                ),
        ))
        .subcommand(load(
            Command::new(GENERATE_LOAD_PARALLEL_CMD)
                .about("Run the load generator on several clients at once.")
                .arg(
                    Arg::new("clients")
                        .long("clients")
                        .required(true)
                        .num_args(1..)
                        .value_delimiter(',')
                        .value_parser(value_parser!(String)),
                ),
        ))
}

fn one<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> T {
    matches.get_one::<T>(id).cloned().unwrap()
}

fn many(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn open(matches: &ArgMatches) -> Result<Pool<Parallel<Ssh>, IndyCli<Parallel<Ssh>>>, Error> {
    let config = match matches.get_one::<PathBuf>(CONFIG_FLAG) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let run = match matches.get_one::<String>(RUN_FLAG) {
        Some(run) => run.clone(),
        None => env::var(RUN_ENV).map_err(|_| Error::InvalidRun(String::new()))?,
    };
    let store = Store::open(&indy_chaos::config::expand(&config.state_directory)?, &run)?;
    let ssh = Ssh::new(config.ssh.to_ssh_config()?)?;
    let executor = match config.ssh.concurrency {
        Some(concurrency) => Parallel::with_concurrency(ssh, concurrency),
        None => Parallel::new(ssh),
    };
    let ledger = IndyCli::new(executor.clone(), config.ledger.clone());
    info!(%run, dir = ?store.dir(), "opened run");
    Ok(Pool::new(config, store, executor, ledger))
}

async fn run(name: &str, matches: &ArgMatches) -> Result<bool, Error> {
    let pool = open(matches)?;
    let view_change = pool.config().view_change;
    match name {
        REFRESH_CMD => pool.refresh().await,
        DETECT_PRIMARY_CMD => {
            let primaries = pool.detect_primary().await?;
            println!("{}", serde_json::to_string_pretty(&primaries)?);
            Ok(primaries.current_primary.is_some())
        }
        CURRENT_PRIMARY_CMD => {
            let primary = pool.current_primary(one(matches, "recompute")).await?;
            if let Some(primary) = &primary {
                println!("{primary}");
            }
            Ok(primary.is_some())
        }
        CURRENT_MODE_CMD => {
            let modes = pool.current_mode().await?;
            println!("{}", serde_json::to_string_pretty(&modes)?);
            Ok(true)
        }
        NODES_IN_MODE_CMD => {
            let mode: String = one(matches, "mode");
            pool.nodes_in_mode(&mode, one(matches, "count")).await
        }
        IS_CAUGHT_UP_CMD => {
            pool.is_caught_up(&many(matches, "aliases"), &one(matches, "range"))
                .await
        }
        RESURRECTED_CAUGHT_UP_CMD => {
            pool.resurrected_nodes_are_caught_up(&one(matches, "range"), one(matches, "best-effort"))
                .await
        }
        ALL_NODES_ARE_UP_CMD => pool.all_nodes_are_up().await,
        PORTS_REACHABLE_CMD => {
            let alias: String = one(matches, "alias");
            pool.node_ports_are_reachable(&alias).await
        }
        REPLICAS_REACHABLE_CMD => pool.primary_and_replicas_are_reachable().await,
        DEMOTED_EXCLUDED_CMD => pool.demoted_backup_primaries_are_excluded().await,
        NEXT_PRIMARY_ELECTED_CMD => pool.next_primary_elected().await,
        WRITE_NYM_CMD => pool.write_nym().await,
        DELETE_VALIDATOR_INFO_CMD => {
            pool.delete_validator_info(one(matches, "cleanup"), one(matches, "per-node"))
        }
        STOP_N_NODES_CMD => {
            pool.stop_n_nodes(
                one(matches, "count"),
                one(matches, "selection"),
                one(matches, "mechanism"),
                one(matches, "include-primary"),
                one(matches, "include-backup-primaries"),
                one(matches, "include-other-nodes"),
                one(matches, "wait-for-view-change"),
            )
            .await
        }
        START_STOPPED_NODES_CMD => pool.start_stopped_nodes(one(matches, "best-effort")).await,
        STOP_PRIMARY_CMD => pool.stop_primary(one(matches, "mechanism")).await,
        START_STOPPED_PRIMARY_CMD => {
            pool.start_stopped_primary(one(matches, "start-backups"))
                .await
        }
        START_AFTER_VIEW_CHANGE_CMD => {
            let max_polls = matches
                .get_one::<usize>("max-polls")
                .copied()
                .unwrap_or(view_change.max_polls);
            let interval = matches
                .get_one::<Duration>("interval")
                .copied()
                .unwrap_or(view_change.interval);
            pool.start_stopped_primary_after_view_change(
                max_polls,
                interval,
                one(matches, "start-backups"),
            )
            .await
        }
        WAIT_FOR_VIEW_CHANGE_CMD => {
            let previous: String = one(matches, "previous");
            let observed = pool
                .wait_for_view_change(&previous, view_change.max_polls, view_change.interval)
                .await?;
            match observed {
                Some(polls) => println!("{polls}"),
                None => println!("none"),
            }
            Ok(observed.is_some())
        }
        STOP_F_BACKUPS_CMD => {
            pool.stop_f_backup_primaries_before_primary(
                matches.get_one::<usize>("f").copied(),
                one(matches, "mechanism"),
            )
            .await
        }
        START_ALL_BUT_PRIMARY_CMD => pool.start_all_but_primary().await,
        DECREASE_F_TO_CMD => {
            pool.decrease_f_to(one(matches, "target"), one(matches, "selection"))
                .await
        }
        REVERT_F_CMD => pool.revert_f(one(matches, "best-effort")).await,
        ENSURE_NODES_UP_CMD => pool.ensure_nodes_up(one(matches, "count")).await,
        ALL_NODES_UP_CMD => pool.all_nodes_up().await,
        START_NODES_CMD => pool.start_nodes(&many(matches, "aliases")).await,
        STOP_NODES_CMD => pool.stop_nodes(&many(matches, "aliases")).await,
        START_ALL_BUT_CMD => {
            let alias: String = one(matches, "alias");
            pool.start_all_but(&alias).await
        }
        KILL_RANDOM_CMD => {
            pool.kill_random_nodes(one(matches, "count"), one(matches, "mechanism"))
                .await
        }
        RESURRECT_RANDOM_CMD => pool.resurrect_random_nodes(one(matches, "best-effort")).await,
        BLOCK_RANDOM_CMD => pool.block_node_port_random(one(matches, "count")).await,
        UNBLOCK_RANDOM_CMD => {
            pool.unblock_node_port_random(one(matches, "best-effort"))
                .await
        }
        UNBLOCK_ALL_CMD => {
            pool.unblock_node_port_all_nodes(one(matches, "best-effort"))
                .await
        }
        BLOCK_PORT_CMD => {
            let alias: String = one(matches, "alias");
            pool.block_port(&alias, &one(matches, "ports")).await
        }
        UNBLOCK_PORT_CMD => {
            let alias: String = one(matches, "alias");
            pool.unblock_port(&alias, &one(matches, "ports")).await
        }
        GENERATE_LOAD_CMD => {
            let client: String = one(matches, "client");
            pool.generate_load(
                &client,
                matches.get_one::<String>("command").map(String::as_str),
                matches.get_one::<Duration>("timeout").copied(),
            )
            .await
        }
        GENERATE_LOAD_PARALLEL_CMD => {
            pool.generate_load_parallel(
                &many(matches, "clients"),
                matches.get_one::<String>("command").map(String::as_str),
                matches.get_one::<Duration>("timeout").copied(),
            )
            .await
        }
        _ => unreachable!("subcommand {name} not handled"),
    }
}

/// Entrypoint for the Indy Chaos CLI
#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let Some((name, sub_matches)) = matches.subcommand() else {
        return ExitCode::FAILURE;
    };
    if name == SESSION_CMD {
        println!("{}", uuid::Uuid::new_v4().simple());
        return ExitCode::SUCCESS;
    }
    match run(name, sub_matches).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!(command = name, "failed");
            ExitCode::FAILURE
        }
        Err(Error::InvalidRun(run)) if run.is_empty() => {
            error!("no run identifier: pass --run or set {RUN_ENV} (see `indy-chaos session`)");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(command = name, error = ?e, "failed");
            ExitCode::FAILURE
        }
    }
}

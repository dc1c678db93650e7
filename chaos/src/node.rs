//! Shell commands run (as superuser) on validator hosts.

use crate::Error;
use indy_remote::quote;
use std::{fmt, str::FromStr};

/// Start `services`.
pub fn start(services: &[String]) -> String {
    systemctl("start", services)
}

/// Stop `services`.
pub fn stop(services: &[String]) -> String {
    systemctl("stop", services)
}

/// Restart `services`.
pub fn restart(services: &[String]) -> String {
    systemctl("restart", services)
}

/// Exit zero iff every one of `services` is running.
pub fn status(services: &[String]) -> String {
    systemctl("status", services)
}

fn systemctl(verb: &str, services: &[String]) -> String {
    let units = services
        .iter()
        .map(|service| quote(service))
        .collect::<Vec<_>>()
        .join(" ");
    format!("systemctl {verb} {units}")
}

/// Print the number of running processes matching `process`.
///
/// `grep -c` exits non-zero when nothing matches, so only stdout is meaningful.
pub fn process_count(process: &str) -> String {
    format!("ps -ef | grep -v grep | grep -c {}", quote(process))
}

/// `SIGKILL` every process matching `process`.
pub fn kill(process: &str) -> String {
    format!(
        "ps -ef | grep -v grep | grep {} | awk '{{print $2}}' | xargs -r kill -9",
        quote(process)
    )
}

/// Drop inbound TCP traffic to `ports` (once, no matter how often it is called).
pub fn block(ports: &Ports) -> String {
    let rule = rule(ports);
    format!("iptables -C {rule} 2>/dev/null || iptables -A {rule}")
}

/// Remove every rule added by [block] for `ports` (succeeds if there is none).
pub fn unblock(ports: &Ports) -> String {
    let rule = rule(ports);
    format!("while iptables -C {rule} 2>/dev/null; do iptables -D {rule} || exit 1; done")
}

fn rule(ports: &Ports) -> String {
    match ports {
        Ports::Single(port) => format!("INPUT -p tcp --destination-port {port} -j DROP"),
        Ports::Range(low, high) => {
            format!("INPUT -p tcp --match multiport --dports {low}:{high} -j DROP")
        }
    }
}

/// A TCP port or inclusive port range, written `9701` or `9701:9708`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ports {
    Single(u16),
    Range(u16, u16),
}

impl FromStr for Ports {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRange(s.to_string());
        let parse = |part: &str| part.trim().parse::<u16>().map_err(|_| invalid());
        match s.split_once(':') {
            Some((low, high)) => {
                let (low, high) = (parse(low)?, parse(high)?);
                if low > high {
                    return Err(invalid());
                }
                Ok(Ports::Range(low, high))
            }
            None => Ok(Ports::Single(parse(s)?)),
        }
    }
}

impl fmt::Display for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ports::Single(port) => write!(f, "{port}"),
            Ports::Range(low, high) => write!(f, "{low}:{high}"),
        }
    }
}

//! Command-line flags passed to every peer process.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

pub const PEER_BINARY: &str = "/bin/go-spacemesh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentFlag {
    pub name: String,
    pub value: String,
}

impl DeploymentFlag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn flag(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

pub fn genesis_time(t: DateTime<Utc>) -> DeploymentFlag {
    DeploymentFlag::new(
        "--genesis-time",
        t.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

pub fn network_id(id: u32) -> DeploymentFlag {
    DeploymentFlag::new("--network-id", id.to_string())
}

pub fn target_outbound(target: usize) -> DeploymentFlag {
    DeploymentFlag::new("--target-outbound", target.to_string())
}

pub fn poet_endpoint(endpoint: &str) -> DeploymentFlag {
    DeploymentFlag::new("--poet-server", endpoint)
}

pub fn bootnodes(endpoints: &[String]) -> DeploymentFlag {
    DeploymentFlag::new("--bootnodes", endpoints.join(","))
}

pub fn rerun_interval(interval: Duration) -> DeploymentFlag {
    DeploymentFlag::new("--tortoise-rerun-interval", go_duration(interval))
}

/// `address=balance` pairs, ordered by address.
pub fn accounts(accounts: &BTreeMap<String, u64>) -> DeploymentFlag {
    let parts: Vec<String> = accounts
        .iter()
        .map(|(address, balance)| format!("{address}={balance}"))
        .collect();
    DeploymentFlag::new("--accounts", parts.join(","))
}

/// The peer parses Go duration strings.
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Full peer command line: fixed prefix, then the given flags in order.
pub fn peer_command(preset: &str, flags: &[DeploymentFlag]) -> Vec<String> {
    let mut cmd = vec![
        PEER_BINARY.to_string(),
        format!("--preset={preset}"),
        "--smeshing-start=true".to_string(),
        "--smeshing-opts-datadir=/data/post".to_string(),
        "-d=/data/state".to_string(),
        "--log-encoder=json".to_string(),
    ];
    cmd.extend(flags.iter().map(DeploymentFlag::flag));
    cmd
}

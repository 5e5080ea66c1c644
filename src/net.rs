//! Network environment probing and role resolution
//!
//! Answers three questions before any traffic is sent: what is this node's
//! IP address, is the expected interface present, and which rank does this
//! node play in the two-node group.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClusterSettings;
use crate::error::{Error, Result};

/// How this node's rank was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankSource {
    /// Local IP matched one of the configured node addresses
    IpMatch,
    /// Local IP matched neither node; defaulted to rank 0
    Fallback,
    /// Rank was given explicitly on the command line
    Explicit,
}

/// Resolved node role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub rank: u32,
    pub source: RankSource,
    pub local_ip: String,
}

/// Discover the local IP address.
///
/// Asks `hostname -I` for all addresses, prefers one on the configured
/// subnet, and otherwise takes the first non-loopback address.
pub fn local_ip(subnet_prefix: &str) -> Result<String> {
    let output = Command::new("hostname")
        .arg("-I")
        .output()
        .map_err(|e| Error::IpUnresolved {
            message: format!("failed to run 'hostname -I': {}", e),
        })?;

    if !output.status.success() {
        return Err(Error::IpUnresolved {
            message: "'hostname -I' exited with an error".to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let candidates: Vec<&str> = stdout.split_whitespace().collect();
    pick_ip(&candidates, subnet_prefix).ok_or_else(|| Error::IpUnresolved {
        message: "no non-loopback address reported by 'hostname -I'".to_string(),
    })
}

/// Pick the best local IP from a candidate list: an address on the cluster
/// subnet wins, otherwise the first non-loopback address.
pub fn pick_ip(candidates: &[&str], subnet_prefix: &str) -> Option<String> {
    candidates
        .iter()
        .find(|ip| ip.starts_with(subnet_prefix))
        .or_else(|| candidates.iter().find(|ip| !ip.starts_with("127.")))
        .map(|ip| ip.to_string())
}

/// Check whether a network interface exists on this host.
///
/// Looks in /sys/class/net first and falls back to `ip link show` for
/// systems where sysfs is not mounted the usual way.
pub fn interface_exists(name: &str) -> bool {
    if Path::new("/sys/class/net").join(name).exists() {
        return true;
    }

    Command::new("ip")
        .args(["link", "show", name])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// List the network interfaces visible on this host
pub fn list_interfaces() -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Return an error if the configured interface is missing
pub fn require_interface(name: &str) -> Result<()> {
    if interface_exists(name) {
        Ok(())
    } else {
        Err(Error::InterfaceMissing {
            name: name.to_string(),
        })
    }
}

/// Map a local IP to a rank, without the fallback applied
pub fn rank_for_ip(local_ip: &str, cluster: &ClusterSettings) -> Option<u32> {
    if local_ip == cluster.node0_ip {
        Some(0)
    } else if local_ip == cluster.node1_ip {
        Some(1)
    } else {
        None
    }
}

/// Resolve this node's role from its local IP address.
///
/// An unrecognized IP falls back to rank 0 with a warning, matching the
/// behavior operators rely on when bringing up a fresh node.
pub fn resolve_role(cluster: &ClusterSettings) -> Result<Role> {
    let ip = local_ip(&cluster.subnet_prefix)?;
    debug!(local_ip = %ip, "Local IP discovered");

    match rank_for_ip(&ip, cluster) {
        Some(rank) => Ok(Role {
            rank,
            source: RankSource::IpMatch,
            local_ip: ip,
        }),
        None => {
            warn!(
                local_ip = %ip,
                node0 = %cluster.node0_ip,
                node1 = %cluster.node1_ip,
                "Local IP matches neither configured node, defaulting to rank 0"
            );
            Ok(Role {
                rank: 0,
                source: RankSource::Fallback,
                local_ip: ip,
            })
        }
    }
}

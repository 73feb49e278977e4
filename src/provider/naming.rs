//! Deterministic names, labels and addresses for cluster resources
//!
//! Everything the engine creates in the runtime is found again by these names
//! and labels, so they must never change shape between releases.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::crd::NodeRole;
use crate::{Error, Result};

/// Label carrying the owning cluster's name
pub const CLUSTER_LABEL: &str = "cluster";

/// Label carrying the node role
pub const ROLE_LABEL: &str = "role";

/// Name of the bridge network hosting a cluster's nodes
pub fn network_name(cluster_name: &str) -> String {
    format!("cluster-{cluster_name}-net")
}

/// Name of the container backing node `index` of `role`
pub fn node_name(cluster_name: &str, role: NodeRole, index: u32) -> String {
    format!("cluster-{cluster_name}-{role}-{index}")
}

/// Index suffix of a node container name
pub fn node_index(node_name: &str) -> Option<u32> {
    node_name.rsplit('-').next()?.parse().ok()
}

/// Node image reference for a Kubernetes version
pub fn node_image(image_family: &str, kubernetes_version: &str) -> String {
    format!("{image_family}:{kubernetes_version}")
}

/// Labels applied to a node container
pub fn node_labels(cluster_name: &str, role: NodeRole) -> HashMap<String, String> {
    HashMap::from([
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
        (ROLE_LABEL.to_string(), role.as_str().to_string()),
    ])
}

/// Labels applied to the cluster network
pub fn network_labels(cluster_name: &str) -> HashMap<String, String> {
    HashMap::from([(CLUSTER_LABEL.to_string(), cluster_name.to_string())])
}

/// Runtime label filter (`key=value`) selecting everything owned by a cluster
pub fn cluster_selector(cluster_name: &str) -> String {
    format!("{CLUSTER_LABEL}={cluster_name}")
}

/// Gateway address for a CIDR: the network address with its last octet + 1
///
/// `10.10.0.0/16` yields `10.10.0.1`.
pub fn gateway_for(cidr: &str) -> Result<Ipv4Addr> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    let network = u32::from(addr) & mask;
    let gateway = network
        .checked_add(1)
        .filter(|g| g & mask == network)
        .ok_or_else(|| Error::invalid_config(format!("CIDR {cidr} has no room for a gateway")))?;
    Ok(Ipv4Addr::from(gateway))
}

/// Splits `a.b.c.d/n` into its address and prefix length
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::invalid_config(format!("invalid CIDR {cidr}: missing prefix")))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| Error::invalid_config(format!("invalid CIDR {cidr}: {e}")))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| Error::invalid_config(format!("invalid CIDR {cidr}: bad prefix length")))?;
    Ok((addr, prefix))
}

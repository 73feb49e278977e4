//! Docker provider configuration
//!
//! Network layout and sizing policy are operator-wide settings, not part of a
//! cluster's spec. They are loaded from YAML and layered over the defaults
//! with [`DockerProviderConfig::merge_with`]:
//!
//! ```yaml
//! network:
//!   cidr: 172.30.0.0/16
//!   subnetMask: 24
//!   enableIPv6: false
//! resourceLimits:
//!   memory: { default: 2Gi, min: 512Mi, max: 8Gi }
//!   cpu: { default: "2", min: "1", max: "4" }
//! strictQuantities: true
//! imagePullAttempts: 3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::naming;
use super::resources::parse_memory;
use crate::crd::MachineConfig;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::{Error, Result};

/// Default address block for cluster networks
pub const DEFAULT_CIDR: &str = "10.10.0.0/16";

/// Default subnet mask length
pub const DEFAULT_SUBNET_MASK: u8 = 24;

/// Port exposed on every node by default (kube-apiserver)
pub const DEFAULT_EXPOSED_PORT: u16 = 6443;

/// Nameserver used when none is configured
pub const DEFAULT_DNS_NAMESERVER: &str = "8.8.8.8";

/// Image repository for node containers; tagged with the Kubernetes version
pub const DEFAULT_IMAGE_FAMILY: &str = "kindest/node";

const SUBNET_MASK_RANGE: std::ops::RangeInclusive<u8> = 16..=28;

/// Operator-wide configuration for the Docker provisioning engine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerProviderConfig {
    /// Network settings for cluster networks
    #[serde(default)]
    pub network: NetworkConfig,

    /// Optional bounds on node sizes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimitsConfig>,

    /// Node image repository (defaults to `kindest/node`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_family: Option<String>,

    /// Reject unparseable memory quantities instead of running the node
    /// without a memory limit (defaults to true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_quantities: Option<bool>,

    /// Attempts per image pull before node creation fails (defaults to 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_attempts: Option<u32>,
}

/// Network configuration for cluster networks
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Address block assigned to each cluster network
    #[serde(default)]
    pub cidr: String,

    /// Subnet mask length (16 to 28)
    #[serde(default)]
    pub subnet_mask: u8,

    /// Ports exposed on every node container
    #[serde(default)]
    pub exposed_ports: Vec<u16>,

    /// Enable IPv6 on the cluster network
    #[serde(default, rename = "enableIPv6")]
    pub enable_ipv6: bool,

    /// Nameserver configured in node containers
    #[serde(default)]
    pub dns_nameserver: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: DEFAULT_CIDR.to_string(),
            subnet_mask: DEFAULT_SUBNET_MASK,
            exposed_ports: vec![DEFAULT_EXPOSED_PORT],
            enable_ipv6: false,
            dns_nameserver: DEFAULT_DNS_NAMESERVER.to_string(),
        }
    }
}

impl NetworkConfig {
    /// Checks the CIDR and subnet mask, filling in the default nameserver
    pub fn validate_defaults(&mut self) -> Result<()> {
        if self.cidr.is_empty() {
            return Err(Error::invalid_config("network cidr must be set"));
        }
        naming::parse_cidr(&self.cidr)?;
        if !SUBNET_MASK_RANGE.contains(&self.subnet_mask) {
            return Err(Error::invalid_config(format!(
                "subnet mask {} outside {}..={}",
                self.subnet_mask,
                SUBNET_MASK_RANGE.start(),
                SUBNET_MASK_RANGE.end()
            )));
        }
        if self.dns_nameserver.is_empty() {
            self.dns_nameserver = DEFAULT_DNS_NAMESERVER.to_string();
        }
        Ok(())
    }
}

/// Size bounds applied to every node's machine config
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitsConfig {
    /// Bounds on `cpuCount`, as whole-number strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<ResourceLimit>,

    /// Bounds on `memory`, as binary quantities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<ResourceLimit>,
}

/// Default, minimum and maximum for one resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceLimit {
    /// Value advertised to cluster authors; not applied to nodes, but must lie
    /// within `min` and `max` (empty = none advertised)
    #[serde(default)]
    pub default: String,

    /// Smallest accepted value (empty = unbounded)
    #[serde(default)]
    pub min: String,

    /// Largest accepted value (empty = unbounded)
    #[serde(default)]
    pub max: String,
}

impl ResourceLimitsConfig {
    /// Checks a node's machine config against the configured bounds
    pub fn check(&self, pool: &str, machine: &MachineConfig) -> Result<()> {
        if let Some(cpu) = &self.cpu {
            let value = u64::from(machine.cpu_count);
            check_bound(pool, "cpuCount", value, &cpu.min, &cpu.max, parse_cpu)?;
        }
        if let Some(memory) = &self.memory {
            // Lenient mode lets unparseable memory through as "unlimited"
            if let Ok(bytes) = parse_memory(&machine.memory) {
                check_bound(
                    pool,
                    "memory",
                    bytes as u64,
                    &memory.min,
                    &memory.max,
                    |q| parse_memory(q).map(|b| b as u64),
                )?;
            }
        }
        Ok(())
    }

    /// Checks that each advertised default parses and lies within its own bounds
    pub fn validate_defaults(&self) -> Result<()> {
        if let Some(cpu) = &self.cpu {
            cpu.validate_default("cpu", parse_cpu)?;
        }
        if let Some(memory) = &self.memory {
            memory.validate_default("memory", |q| parse_memory(q).map(|b| b as u64))?;
        }
        Ok(())
    }
}

impl ResourceLimit {
    fn validate_default(&self, field: &str, parse: impl Fn(&str) -> Result<u64>) -> Result<()> {
        if self.default.is_empty() {
            return Ok(());
        }
        let value = parse(&self.default)?;
        check_bound("default", field, value, &self.min, &self.max, parse)
    }
}

fn parse_cpu(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_quantity(format!("cpu limit {value:?} is not a whole number")))
}

fn check_bound(
    pool: &str,
    field: &str,
    value: u64,
    min: &str,
    max: &str,
    parse: impl Fn(&str) -> Result<u64>,
) -> Result<()> {
    if !min.is_empty() && value < parse(min)? {
        return Err(Error::invalid_config(format!(
            "{pool} {field} is below the configured minimum {min}"
        )));
    }
    if !max.is_empty() && value > parse(max)? {
        return Err(Error::invalid_config(format!(
            "{pool} {field} exceeds the configured maximum {max}"
        )));
    }
    Ok(())
}

impl DockerProviderConfig {
    /// Parse a configuration document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::invalid_config(format!("failed to parse provider config: {e}")))
    }

    /// Load a configuration file and layer it over the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        let overrides = Self::from_yaml(&contents)?;
        let mut config = Self::default().merge_with(&overrides);
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy of `self` with every field set in `other` taking precedence
    pub fn merge_with(&self, other: &Self) -> Self {
        let mut result = self.clone();

        if !other.network.cidr.is_empty() {
            result.network.cidr = other.network.cidr.clone();
        }
        if other.network.subnet_mask != 0 {
            result.network.subnet_mask = other.network.subnet_mask;
        }
        if !other.network.exposed_ports.is_empty() {
            result.network.exposed_ports = other.network.exposed_ports.clone();
        }
        if other.network.enable_ipv6 {
            result.network.enable_ipv6 = true;
        }
        if !other.network.dns_nameserver.is_empty() {
            result.network.dns_nameserver = other.network.dns_nameserver.clone();
        }

        if let Some(theirs) = &other.resource_limits {
            let limits = result.resource_limits.get_or_insert_with(Default::default);
            if theirs.cpu.is_some() {
                limits.cpu = theirs.cpu.clone();
            }
            if theirs.memory.is_some() {
                limits.memory = theirs.memory.clone();
            }
        }

        result.image_family = other.image_family.clone().or(result.image_family);
        result.strict_quantities = other.strict_quantities.or(result.strict_quantities);
        result.image_pull_attempts = other.image_pull_attempts.or(result.image_pull_attempts);
        result
    }

    /// Validate the configuration, filling in derived defaults
    pub fn validate(&mut self) -> Result<()> {
        self.network.validate_defaults()?;
        if let Some(limits) = &self.resource_limits {
            limits.validate_defaults()?;
        }
        if self.image_family().trim().is_empty() {
            return Err(Error::invalid_config("image family must not be empty"));
        }
        if self.image_pull_attempts == Some(0) {
            return Err(Error::invalid_config("imagePullAttempts must be at least 1"));
        }
        Ok(())
    }

    /// Node image repository
    pub fn image_family(&self) -> &str {
        self.image_family.as_deref().unwrap_or(DEFAULT_IMAGE_FAMILY)
    }

    /// Whether unparseable memory quantities are rejected
    pub fn strict_quantities(&self) -> bool {
        self.strict_quantities.unwrap_or(true)
    }

    /// Attempts per image pull
    pub fn image_pull_attempts(&self) -> u32 {
        self.image_pull_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

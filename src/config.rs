//! Configuration module for the tunnel orchestrator
//!
//! Configuration is resolved once per invocation. Built-in defaults are
//! overlaid by an optional TOML file (named by `VPN_CONFIG`) and then by
//! the `VPN_*` environment overrides.

use crate::error::{Result, TunnelError};
use ipnet::Ipv4Net;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the optional TOML file
pub const ENV_CONFIG_FILE: &str = "VPN_CONFIG";
/// Environment override for the IPsec connection name
pub const ENV_CONN_NAME: &str = "VPN_CONN_NAME";
/// Environment override for the L2TP peer identifier
pub const ENV_L2TP_PEER: &str = "VPN_L2TP_PEER";
/// Environment override for the remote gateway hostname
pub const ENV_REMOTE_HOST: &str = "VPN_REMOTE_HOST";
/// Environment override for the routed CIDR
pub const ENV_ROUTE_CIDR: &str = "VPN_ROUTE_CIDR";

/// A bounded, fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep between attempts in milliseconds
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on time spent sleeping inside this budget
    pub fn budget(&self) -> Duration {
        self.interval() * self.attempts.saturating_sub(1)
    }
}

/// OS services and processes managed around the tunnel
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Services in start order; stopped in reverse
    pub units: Vec<String>,
    /// Processes force-killed at the end of `down`
    pub lingering_processes: Vec<String>,
    /// UDP ports the IPsec daemon binds
    pub udp_ports: Vec<u16>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            units: vec!["strongswan-starter".to_string(), "xl2tpd".to_string()],
            lingering_processes: vec!["charon".to_string()],
            udp_ports: vec![500, 4500],
        }
    }
}

/// IPsec daemon control settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpsecConfig {
    /// Control binary (`ipsec reload`, `ipsec up <conn>`, ...)
    pub command: String,
    /// Files scanned for `conn <name>` declarations, in order
    pub config_sources: Vec<PathBuf>,
    /// Connection names matching this pattern win auto-detection
    pub keyword_pattern: String,
}

impl Default for IpsecConfig {
    fn default() -> Self {
        Self {
            command: "ipsec".to_string(),
            config_sources: vec![
                PathBuf::from("/etc/ipsec.conf"),
                PathBuf::from("/etc/strongswan/ipsec.conf"),
                PathBuf::from("/etc/ipsec.d/l2tp.conf"),
            ],
            keyword_pattern: "(?i)sharif".to_string(),
        }
    }
}

/// L2TP daemon settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct L2tpConfig {
    /// xl2tpd control FIFO
    pub control_channel: PathBuf,
    /// Service restarted (autodial) or stopped when the channel is absent
    pub service: String,
}

impl Default for L2tpConfig {
    fn default() -> Self {
        Self {
            control_channel: PathBuf::from("/var/run/xl2tpd/l2tp-control"),
            service: "xl2tpd".to_string(),
        }
    }
}

/// Kernel-side naming
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Pattern PPP interface names must match
    pub ppp_interface_pattern: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ppp_interface_pattern: r"^ppp\d+$".to_string(),
        }
    }
}

/// Retry budgets for every polling loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub resolve: RetryPolicy,
    pub ipsec_loaded: RetryPolicy,
    pub ipsec_up: RetryPolicy,
    pub ppp_appear: RetryPolicy,
    pub ppp_ready: RetryPolicy,
    /// Reduced wait after forcing the PPP link up, in milliseconds
    pub ppp_settle_ms: u64,
    pub route_add: RetryPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            resolve: RetryPolicy::new(5, 1000),
            ipsec_loaded: RetryPolicy::new(8, 500),
            ipsec_up: RetryPolicy::new(8, 1000),
            ppp_appear: RetryPolicy::new(40, 500),
            ppp_ready: RetryPolicy::new(40, 500),
            ppp_settle_ms: 1000,
            route_add: RetryPolicy::new(3, 700),
        }
    }
}

impl TimingConfig {
    pub fn ppp_settle(&self) -> Duration {
        Duration::from_millis(self.ppp_settle_ms)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// IPsec connection name; auto-detected when `None`
    pub connection_name: Option<String>,
    /// L2TP peer identifier used in control-channel directives
    pub l2tp_peer: String,
    /// Remote gateway hostname
    pub remote_host: String,
    /// Route installed through the PPP interface
    pub route_cidr: String,
    pub services: ServicesConfig,
    pub ipsec: IpsecConfig,
    pub l2tp: L2tpConfig,
    pub network: NetworkConfig,
    pub timing: TimingConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connection_name: None,
            l2tp_peer: "sharif".to_string(),
            remote_host: "vpn.sharif.edu".to_string(),
            route_cidr: "172.27.48.0/22".to_string(),
            services: ServicesConfig::default(),
            ipsec: IpsecConfig::default(),
            l2tp: L2tpConfig::default(),
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Resolve the configuration for this invocation from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TunnelConfig::from_env`] with an injectable variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match non_empty(lookup(ENV_CONFIG_FILE)) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Overlay the `VPN_*` environment overrides; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = non_empty(lookup(ENV_CONN_NAME)) {
            self.connection_name = Some(name);
        }
        if let Some(peer) = non_empty(lookup(ENV_L2TP_PEER)) {
            self.l2tp_peer = peer;
        }
        if let Some(host) = non_empty(lookup(ENV_REMOTE_HOST)) {
            self.remote_host = host;
        }
        if let Some(cidr) = non_empty(lookup(ENV_ROUTE_CIDR)) {
            self.route_cidr = cidr;
        }
    }

    /// Parsed and normalised route prefix
    pub fn route(&self) -> Result<Ipv4Net> {
        parse_cidr(&self.route_cidr)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.l2tp_peer.trim().is_empty() {
            return Err(TunnelError::Config("L2TP peer cannot be empty".to_string()));
        }

        if self.remote_host.trim().is_empty() {
            return Err(TunnelError::Config(
                "Remote host cannot be empty".to_string(),
            ));
        }

        self.route()?;

        if self.services.units.is_empty() {
            return Err(TunnelError::Config(
                "At least one service must be configured".to_string(),
            ));
        }

        Regex::new(&self.ipsec.keyword_pattern)?;
        Regex::new(&self.network.ppp_interface_pattern)?;

        let t = &self.timing;
        for (name, policy) in [
            ("resolve", t.resolve),
            ("ipsec_loaded", t.ipsec_loaded),
            ("ipsec_up", t.ipsec_up),
            ("ppp_appear", t.ppp_appear),
            ("ppp_ready", t.ppp_ready),
            ("route_add", t.route_add),
        ] {
            if policy.attempts == 0 {
                return Err(TunnelError::Config(format!(
                    "timing.{name}.attempts must be at least 1"
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for TunnelConfig {
    type Err = TunnelError;

    fn from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Parse a CIDR, truncating host bits so equal prefixes compare equal
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|e| TunnelError::Config(format!("Invalid route CIDR '{cidr}': {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! External control planes
//!
//! Each collaborator the orchestrator drives (service supervisor, IPsec
//! daemon, L2TP daemon, kernel network tables, resolver, privilege) sits
//! behind a narrow trait. [`linux`] holds the adapters that shell out to the
//! real tools; tests substitute in-memory fakes.

use crate::config::TunnelConfig;
use crate::error::Result;
use ipnet::Ipv4Net;
use std::net::IpAddr;

#[cfg(unix)]
pub mod linux;

/// Snapshot of one kernel network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    /// `UP` flag (administrative state)
    pub admin_up: bool,
    pub ipv4: Vec<Ipv4Net>,
}

impl LinkInfo {
    /// Up and addressed in the same sample
    pub fn is_ready(&self) -> bool {
        self.admin_up && !self.ipv4.is_empty()
    }
}

/// A kernel route for a prefix through an output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Net,
    pub device: String,
}

/// Root or cached sudo credentials for the rest of the run
pub trait Privilege {
    fn acquire(&self) -> Result<()>;
}

/// OS service supervisor
pub trait ServiceSupervisor {
    fn start(&self, unit: &str) -> Result<()>;
    /// Must succeed when the unit is already stopped or unknown
    fn stop(&self, unit: &str) -> Result<()>;
    /// Signal every process with this exact name; `Ok(false)` when none matched
    fn kill(&self, process: &str) -> Result<bool>;
}

/// Listening-socket query
pub trait PortProbe {
    /// Subset of `ports` with a bound UDP socket
    fn bound_udp_ports(&self, ports: &[u16]) -> Result<Vec<u16>>;
}

/// Hostname to address lookup
pub trait HostLookup {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// IPsec daemon control commands
pub trait IpsecControl {
    fn reload(&self) -> Result<()>;
    fn reread_secrets(&self) -> Result<()>;
    fn status(&self) -> Result<String>;
    fn up(&self, connection: &str) -> Result<()>;
    fn down(&self, connection: &str) -> Result<()>;
}

/// L2TP daemon control
pub trait L2tpControl {
    /// Fresh filesystem presence check, never cached
    fn channel_present(&self) -> bool;
    fn write_directive(&self, directive: &str) -> Result<()>;
    fn restart_daemon(&self) -> Result<()>;
    fn stop_daemon(&self) -> Result<()>;
}

/// Kernel link, address and route tables
pub trait NetworkState {
    fn links(&self) -> Result<Vec<LinkInfo>>;

    fn link(&self, name: &str) -> Result<Option<LinkInfo>> {
        Ok(self.links()?.into_iter().find(|l| l.name == name))
    }

    fn set_link_up(&self, name: &str) -> Result<()>;
    fn routes_to(&self, destination: Ipv4Net) -> Result<Vec<RouteEntry>>;
    fn add_route(&self, destination: Ipv4Net, device: &str) -> Result<()>;
    fn delete_route(&self, destination: Ipv4Net, device: &str) -> Result<()>;
}

/// Every collaborator one orchestrator run needs
pub struct System {
    pub privilege: Box<dyn Privilege>,
    pub supervisor: Box<dyn ServiceSupervisor>,
    pub ports: Box<dyn PortProbe>,
    pub resolver: Box<dyn HostLookup>,
    pub ipsec: Box<dyn IpsecControl>,
    pub l2tp: Box<dyn L2tpControl>,
    pub network: Box<dyn NetworkState>,
}

impl System {
    /// Adapters for the real host tools
    #[cfg(unix)]
    pub fn host(config: &TunnelConfig) -> Self {
        Self {
            privilege: Box::new(linux::SudoPrivilege),
            supervisor: Box::new(linux::Systemctl),
            ports: Box::new(linux::SsPortProbe),
            resolver: Box::new(linux::StdLookup),
            ipsec: Box::new(linux::IpsecCli::new(&config.ipsec.command)),
            l2tp: Box::new(linux::Xl2tpdControl::new(
                config.l2tp.control_channel.clone(),
                &config.l2tp.service,
            )),
            network: Box::new(linux::IpRoute2),
        }
    }
}

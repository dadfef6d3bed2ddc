//! Static route through the PPP interface

use crate::config::RetryPolicy;
use crate::error::{Result, TunnelError};
use crate::retry::{poll, Sleeper};
use crate::system::NetworkState;
use ipnet::Ipv4Net;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    AlreadyPresent,
    Installed,
}

pub struct RouteManager<'a> {
    network: &'a dyn NetworkState,
    sleeper: &'a dyn Sleeper,
}

impl<'a> RouteManager<'a> {
    pub fn new(network: &'a dyn NetworkState, sleeper: &'a dyn Sleeper) -> Self {
        Self { network, sleeper }
    }

    /// Whether the kernel routes `cidr` via `iface`
    pub fn exists(&self, cidr: Ipv4Net, iface: &str) -> bool {
        match self.network.routes_to(cidr) {
            Ok(routes) => routes.iter().any(|r| r.device == iface),
            Err(e) => {
                debug!("Route lookup for {cidr} failed: {e}");
                false
            }
        }
    }

    /// Install `cidr dev iface` unless it is already there. Retries cover the
    /// window where the link reports ready before routing accepts it.
    pub fn add(&self, cidr: Ipv4Net, iface: &str, policy: RetryPolicy) -> Result<RouteOutcome> {
        if self.exists(cidr, iface) {
            info!("Route {cidr} dev {iface} already present");
            return Ok(RouteOutcome::AlreadyPresent);
        }

        poll(self.sleeper, policy, "route add", |n| {
            if let Err(e) = self.network.add_route(cidr, iface) {
                warn!(
                    "Adding route {cidr} dev {iface} failed (attempt {n}/{}): {e}",
                    policy.attempts
                );
            }
            self.exists(cidr, iface).then_some(())
        })
        .ok_or_else(|| TunnelError::RouteInstallFailed {
            cidr: cidr.to_string(),
            iface: iface.to_string(),
            attempts: policy.attempts,
        })?;

        info!("Installed route {cidr} dev {iface}");
        Ok(RouteOutcome::Installed)
    }

    /// Remove `cidr dev iface` if present. Never fails.
    pub fn remove(&self, cidr: Ipv4Net, iface: &str) -> bool {
        if !self.exists(cidr, iface) {
            debug!("No route {cidr} dev {iface} to remove");
            return false;
        }
        match self.network.delete_route(cidr, iface) {
            Ok(()) => {
                info!("Removed route {cidr} dev {iface}");
                true
            }
            Err(e) => {
                warn!("Removing route {cidr} dev {iface} failed: {e}");
                false
            }
        }
    }
}

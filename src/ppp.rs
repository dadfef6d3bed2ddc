//! PPP interface discovery and readiness
//!
//! The PPP daemon creates the interface some time after the L2TP session
//! is dialed, and assigns its address later still. Both are polled from the
//! kernel link table; absence is normal until the budget runs out.

use crate::config::RetryPolicy;
use crate::error::{Result, TunnelError};
use crate::retry::{poll, Sleeper};
use crate::system::{LinkInfo, NetworkState};
use log::{debug, info, warn};
use regex::Regex;
use std::time::Duration;

pub struct PppInterfaceWatcher<'a> {
    network: &'a dyn NetworkState,
    sleeper: &'a dyn Sleeper,
    pattern: Regex,
}

impl<'a> PppInterfaceWatcher<'a> {
    pub fn new(network: &'a dyn NetworkState, sleeper: &'a dyn Sleeper, pattern: Regex) -> Self {
        Self {
            network,
            sleeper,
            pattern,
        }
    }

    /// Single sample: first link whose name matches the PPP pattern
    pub fn current(&self) -> Option<String> {
        match self.network.links() {
            Ok(links) => self.first_ppp(&links),
            Err(e) => {
                debug!("Link listing failed: {e}");
                None
            }
        }
    }

    /// Phase A: wait for a PPP interface to exist
    pub fn wait_appear(&self, policy: RetryPolicy) -> Result<String> {
        let name = poll(self.sleeper, policy, "ppp appear", |_| self.current())
            .ok_or_else(|| TunnelError::InterfaceTimeout(policy.budget()))?;
        info!("PPP interface {name} appeared");
        Ok(name)
    }

    /// Phase B: wait for `name` to be administratively up with an IPv4
    /// address in the same sample. On exhaustion the link is forced up and
    /// sampled once more after `settle`.
    pub fn wait_ready(&self, name: &str, policy: RetryPolicy, settle: Duration) -> Result<LinkInfo> {
        if let Some(link) = poll(self.sleeper, policy, "ppp ready", |_| self.ready_sample(name)) {
            info!("PPP interface {name} is up with {:?}", link.ipv4);
            return Ok(link);
        }

        warn!("{name} not ready after {:?}; forcing it up", policy.budget());
        if let Err(e) = self.network.set_link_up(name) {
            warn!("Could not set {name} up: {e}");
        }
        self.sleeper.sleep(settle);

        match self.ready_sample(name) {
            Some(link) => {
                info!("PPP interface {name} is up with {:?}", link.ipv4);
                Ok(link)
            }
            None => Err(TunnelError::InterfaceNotReady(name.to_string())),
        }
    }

    fn ready_sample(&self, name: &str) -> Option<LinkInfo> {
        match self.network.link(name) {
            Ok(Some(link)) if link.is_ready() => Some(link),
            Ok(Some(link)) => {
                debug!(
                    "{name}: admin_up={} ipv4={:?}",
                    link.admin_up, link.ipv4
                );
                None
            }
            Ok(None) => {
                debug!("{name} does not exist (yet)");
                None
            }
            Err(e) => {
                debug!("Querying {name} failed: {e}");
                None
            }
        }
    }

    fn first_ppp(&self, links: &[LinkInfo]) -> Option<String> {
        links
            .iter()
            .find(|l| self.pattern.is_match(&l.name))
            .map(|l| l.name.clone())
    }
}

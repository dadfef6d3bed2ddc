//! Remote gateway name resolution with bounded retry

use crate::config::RetryPolicy;
use crate::error::{Result, TunnelError};
use crate::retry::{poll, Sleeper};
use crate::system::HostLookup;
use log::{debug, info};
use std::net::IpAddr;

pub struct NameResolver<'a> {
    lookup: &'a dyn HostLookup,
    sleeper: &'a dyn Sleeper,
}

impl<'a> NameResolver<'a> {
    pub fn new(lookup: &'a dyn HostLookup, sleeper: &'a dyn Sleeper) -> Self {
        Self { lookup, sleeper }
    }

    /// Resolve `host`, retrying per `policy`. Fatal `ResolutionFailure` when
    /// no attempt yields an address.
    pub fn resolve(&self, host: &str, policy: RetryPolicy) -> Result<Vec<IpAddr>> {
        let addrs = poll(self.sleeper, policy, "resolve", |n| {
            match self.lookup.lookup(host) {
                Ok(addrs) if !addrs.is_empty() => Some(addrs),
                Ok(_) => {
                    debug!("{host} resolved to nothing (attempt {n})");
                    None
                }
                Err(e) => {
                    debug!("Lookup of {host} failed (attempt {n}): {e}");
                    None
                }
            }
        })
        .ok_or_else(|| TunnelError::ResolutionFailure {
            host: host.to_string(),
            attempts: policy.attempts,
        })?;

        info!("Resolved {host} to {addrs:?}");
        Ok(addrs)
    }
}

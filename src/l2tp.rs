//! L2TP dial and hang-up
//!
//! A live control channel is always preferred. Without one the daemon is
//! restarted (its autodial brings the session up) or stopped outright.
//! Neither path confirms the session; the PPP interface checks do that.

use crate::system::L2tpControl;
use log::{info, warn};

/// Which mechanism an operation ended up using
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPath {
    ControlChannel,
    DaemonFallback,
}

pub struct L2tpDialer<'a> {
    control: &'a dyn L2tpControl,
}

impl<'a> L2tpDialer<'a> {
    pub fn new(control: &'a dyn L2tpControl) -> Self {
        Self { control }
    }

    /// Fire-and-forget connect
    pub fn dial(&self, peer: &str) -> DialPath {
        if self.control.channel_present() {
            match self.control.write_directive(&format!("c {peer}")) {
                Ok(()) => {
                    info!("Requested L2TP connect to '{peer}' via control channel");
                    return DialPath::ControlChannel;
                }
                Err(e) => warn!("L2TP control channel write failed, restarting daemon: {e}"),
            }
        } else {
            info!("No L2TP control channel; restarting daemon for autodial");
        }

        if let Err(e) = self.control.restart_daemon() {
            warn!("L2TP daemon restart failed: {e}");
        }
        DialPath::DaemonFallback
    }

    /// Best-effort disconnect
    pub fn hangup(&self, peer: &str) -> DialPath {
        if self.control.channel_present() {
            match self.control.write_directive(&format!("d {peer}")) {
                Ok(()) => {
                    info!("Requested L2TP disconnect from '{peer}'");
                    return DialPath::ControlChannel;
                }
                Err(e) => warn!("L2TP control channel write failed, stopping daemon: {e}"),
            }
        } else {
            info!("No L2TP control channel; stopping daemon");
        }

        if let Err(e) = self.control.stop_daemon() {
            warn!("L2TP daemon stop failed: {e}");
        }
        DialPath::DaemonFallback
    }
}

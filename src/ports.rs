//! UDP port pre/post-flight check

use crate::system::PortProbe;
use log::{info, warn};

/// Which of the checked ports are still bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReport {
    pub checked: Vec<u16>,
    pub busy: Vec<u16>,
    /// The probe itself failed; `busy` is empty but unverified
    pub unknown: bool,
}

impl PortReport {
    pub fn is_free(&self) -> bool {
        self.busy.is_empty()
    }
}

pub struct PortGuard<'a> {
    probe: &'a dyn PortProbe,
}

impl<'a> PortGuard<'a> {
    pub fn new(probe: &'a dyn PortProbe) -> Self {
        Self { probe }
    }

    /// Report whether `ports` are free. Never fails; leftovers are a warning.
    pub fn check_free(&self, ports: &[u16], stage: &str) -> PortReport {
        match self.probe.bound_udp_ports(ports) {
            Ok(busy) => {
                if busy.is_empty() {
                    info!("UDP ports {ports:?} are free ({stage})");
                } else {
                    warn!(
                        "UDP ports {busy:?} still bound after {stage}; \
                         another IKE daemon may be holding them"
                    );
                }
                PortReport {
                    checked: ports.to_vec(),
                    busy,
                    unknown: false,
                }
            }
            Err(e) => {
                warn!("Could not inspect UDP ports ({stage}): {e}");
                PortReport {
                    checked: ports.to_vec(),
                    busy: Vec::new(),
                    unknown: true,
                }
            }
        }
    }
}

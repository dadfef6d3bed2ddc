//! Service control for the IPsec and L2TP daemons

use crate::error::{Result, TunnelError};
use crate::system::ServiceSupervisor;
use log::{debug, info, warn};

/// Starts and stops the daemons the tunnel depends on
pub struct ServiceController<'a> {
    supervisor: &'a dyn ServiceSupervisor,
}

impl<'a> ServiceController<'a> {
    pub fn new(supervisor: &'a dyn ServiceSupervisor) -> Self {
        Self { supervisor }
    }

    /// Stop a service. Never fails: an already-stopped or unknown unit is fine
    /// and a refusal is only worth a warning.
    pub fn stop(&self, unit: &str) {
        match self.supervisor.stop(unit) {
            Ok(()) => debug!("Stopped {unit}"),
            Err(e) => warn!("Could not stop {unit}: {e}"),
        }
    }

    /// Start a service the rest of `up` depends on
    pub fn start(&self, unit: &str) -> Result<()> {
        self.supervisor.start(unit).map_err(|e| {
            warn!("Starting {unit} failed: {e}");
            TunnelError::ServiceStartFailed(unit.to_string())
        })?;
        info!("Started {unit}");
        Ok(())
    }

    /// Start every unit in order, aborting on the first failure
    pub fn start_all(&self, units: &[String]) -> Result<()> {
        units.iter().try_for_each(|unit| self.start(unit))
    }

    /// Stop every unit in reverse start order
    pub fn stop_all(&self, units: &[String]) {
        for unit in units.iter().rev() {
            self.stop(unit);
        }
    }

    /// Best-effort kill of a daemon that survived its service stop.
    /// Returns whether anything was signalled.
    pub fn kill_lingering(&self, process: &str) -> bool {
        match self.supervisor.kill(process) {
            Ok(true) => {
                info!("Killed lingering {process}");
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Could not kill {process}: {e}");
                false
            }
        }
    }
}

//! IPsec session control
//!
//! Daemons routinely accept `up` before they have internalized a reload, so
//! bring-up is retried on a fixed interval instead of attempted once.

use crate::config::RetryPolicy;
use crate::error::{Result, TunnelError};
use crate::registry::ConnectionRegistry;
use crate::retry::{poll, Sleeper};
use crate::system::IpsecControl;
use log::{debug, info, warn};

pub struct IpsecSession<'a> {
    control: &'a dyn IpsecControl,
    sleeper: &'a dyn Sleeper,
}

impl<'a> IpsecSession<'a> {
    pub fn new(control: &'a dyn IpsecControl, sleeper: &'a dyn Sleeper) -> Self {
        Self { control, sleeper }
    }

    /// Reload configuration and secrets. Advisory only: the daemon may apply
    /// changes even when the helper exits non-zero.
    pub fn reload(&self) {
        if let Err(e) = self.control.reload() {
            warn!("IPsec reload reported failure (continuing): {e}");
        }
        if let Err(e) = self.control.reread_secrets() {
            warn!("IPsec secrets reread reported failure (continuing): {e}");
        }
    }

    /// Poll status until `connection` is listed. Returns whether it was seen;
    /// not seeing it is not fatal since some daemons load lazily on `up`.
    pub fn wait_loaded(&self, connection: &str, policy: RetryPolicy) -> bool {
        let seen = poll(self.sleeper, policy, "ipsec status", |_| {
            match self.control.status() {
                Ok(text) => status_lists(&text, connection).then_some(()),
                Err(e) => {
                    debug!("IPsec status query failed: {e}");
                    None
                }
            }
        })
        .is_some();

        if seen {
            debug!("IPsec connection '{connection}' is loaded");
        } else {
            warn!("IPsec connection '{connection}' not visible in status yet; trying up anyway");
        }
        seen
    }

    /// `up` with retry. Exhaustion is fatal.
    pub fn bring_up(&self, connection: &str, policy: RetryPolicy) -> Result<()> {
        poll(self.sleeper, policy, "ipsec up", |n| {
            match self.control.up(connection) {
                Ok(()) => Some(()),
                Err(e) => {
                    warn!(
                        "IPsec up '{connection}' failed (attempt {n}/{}): {e}",
                        policy.attempts
                    );
                    None
                }
            }
        })
        .ok_or_else(|| TunnelError::TunnelUpFailed {
            name: connection.to_string(),
            attempts: policy.attempts,
        })?;

        info!("IPsec connection '{connection}' is up");
        Ok(())
    }

    /// Resolve the connection name, then reload, wait and bring up
    pub fn up_sequence(
        &self,
        registry: &mut ConnectionRegistry,
        loaded: RetryPolicy,
        up: RetryPolicy,
    ) -> Result<String> {
        let connection = registry.resolve_connection_name()?;
        self.reload();
        self.wait_loaded(&connection, loaded);
        self.bring_up(&connection, up)?;
        Ok(connection)
    }

    /// Best-effort `down`; silently skipped when no name can be resolved
    pub fn bring_down(&self, registry: &mut ConnectionRegistry) {
        let connection = match registry.resolve_connection_name() {
            Ok(name) => name,
            Err(e) => {
                info!("No IPsec connection to bring down: {e}");
                return;
            }
        };
        match self.control.down(&connection) {
            Ok(()) => info!("IPsec connection '{connection}' is down"),
            Err(e) => warn!("IPsec down '{connection}' reported failure: {e}"),
        }
    }
}

/// Whether a status dump has a line naming `connection`
/// (e.g. `  sharif-edu:  %any...%any  IKEv1` or `sharif-edu[3]: ESTABLISHED`)
fn status_lists(status: &str, connection: &str) -> bool {
    status.lines().any(|line| {
        line.split_whitespace().any(|token| {
            let token = token.trim_matches(|c| c == '"' || c == '\'');
            let name = token
                .split(|c| c == ':' || c == '[' || c == '{')
                .next()
                .unwrap_or_default();
            name == connection
        })
    })
}

//! Error types and handling for the L2TP/IPsec tunnel orchestrator

use thiserror::Error;

/// Main error type for tunnel operations
///
/// Every variant except the collaborator-level ones (`Config`, `Command`,
/// `Io`) is a fatal point of no recovery for `up`.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Root or sudo could not be obtained
    #[error("Permission error: {0}")]
    PrivilegeDenied(String),

    /// The remote gateway never resolved
    #[error("Could not resolve remote host '{host}' after {attempts} attempts")]
    ResolutionFailure { host: String, attempts: u32 },

    /// None of the IPsec configuration sources exist
    #[error("No IPsec configuration found (looked in: {0})")]
    NoConfigFound(String),

    /// Configuration sources exist but declare no usable connection
    #[error("No usable IPsec connection declared in: {0}")]
    NoConnectionFound(String),

    /// `ipsec up` kept failing
    #[error(
        "IPsec connection '{name}' did not come up after {attempts} attempts; \
         check the IPsec daemon configuration name/syntax and secrets"
    )]
    TunnelUpFailed { name: String, attempts: u32 },

    /// No PPP interface appeared
    #[error("No PPP interface appeared within {0:?}; check the L2TP daemon and its peer settings")]
    InterfaceTimeout(std::time::Duration),

    /// The PPP interface never got both the UP flag and an IPv4 address
    #[error("PPP interface '{0}' never became ready (administratively up with an IPv4 address)")]
    InterfaceNotReady(String),

    /// Route add kept failing
    #[error("Could not install route {cidr} via {iface} after {attempts} attempts")]
    RouteInstallFailed {
        cidr: String,
        iface: String,
        attempts: u32,
    },

    /// A daemon required by `up` refused to start
    #[error("Service '{0}' failed to start; check it with the service supervisor")]
    ServiceStartFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command ran but reported failure
    #[error("Command '{command}' failed: {detail}")]
    Command { command: String, detail: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Helper trait for converting foreign errors to `TunnelError`
pub trait IntoTunnelError<T> {
    fn into_tunnel_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoTunnelError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_tunnel_error(self, context: &str) -> Result<T> {
        self.map_err(|e| TunnelError::Command {
            command: context.to_string(),
            detail: e.to_string(),
        })
    }
}

impl From<toml::de::Error> for TunnelError {
    fn from(err: toml::de::Error) -> Self {
        TunnelError::Config(format!("TOML parsing error: {err}"))
    }
}

impl From<regex::Error> for TunnelError {
    fn from(err: regex::Error) -> Self {
        TunnelError::Config(format!("Invalid pattern: {err}"))
    }
}

//! L2TP/IPsec VPN - tunnel orchestrator for a single remote gateway
//!
//! This crate brings an L2TP-over-IPsec tunnel up and down by sequencing
//! external collaborators it does not reimplement:
//! - the IPsec/IKE daemon (reload, status, `up`/`down` a named connection)
//! - the L2TP daemon (control channel directives or service restart/stop)
//! - the kernel link, address and routing tables
//! - the OS service supervisor and the system resolver
//!
//! ## Flow
//! `up`: stop daemons, check UDP ports, start daemons, resolve the gateway,
//! bring IPsec up, dial L2TP, wait for the PPP interface and its address,
//! install the route. `down` reverses this and tolerates missing state at
//! every step.
//!
//! Each collaborator sits behind a trait in [`system`] so the whole state
//! machine runs against fakes in tests.

pub mod config;
pub mod error;
pub mod ipsec;
pub mod l2tp;
pub mod orchestrator;
pub mod ports;
pub mod ppp;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod route;
pub mod service;
pub mod system;

#[cfg(test)]
pub(crate) mod fake;

// Re-export core types
pub use config::TunnelConfig;
pub use error::{Result, TunnelError};
pub use orchestrator::{DownReport, TunnelOrchestrator, UpReport};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

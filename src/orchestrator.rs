//! Tunnel Orchestrator - the `up` / `down` state machine
//!
//! `up` runs every step in dependency order and aborts on the first fatal
//! error, leaving whatever partial state existed for a later `down`.
//! `down` runs every teardown step regardless of what is (or is not) up,
//! so it can be re-run from any intermediate state.

use crate::config::TunnelConfig;
use crate::error::Result;
use crate::ipsec::IpsecSession;
use crate::l2tp::{DialPath, L2tpDialer};
use crate::ports::{PortGuard, PortReport};
use crate::ppp::PppInterfaceWatcher;
use crate::registry::ConnectionRegistry;
use crate::resolver::NameResolver;
use crate::retry::Sleeper;
use crate::route::{RouteManager, RouteOutcome};
use crate::service::ServiceController;
use crate::system::System;
use ipnet::Ipv4Net;
use log::info;
use regex::Regex;

/// What a successful `up` established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    pub connection: String,
    pub dial_path: DialPath,
    pub interface: String,
    pub addresses: Vec<Ipv4Net>,
    pub route: Ipv4Net,
    pub route_outcome: RouteOutcome,
}

/// What `down` found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownReport {
    pub interface: Option<String>,
    pub route_removed: bool,
    pub hangup_path: DialPath,
    pub ports: PortReport,
}

/// Per-invocation context: configuration, collaborators, and the memoized
/// connection name
pub struct TunnelOrchestrator {
    config: TunnelConfig,
    system: System,
    sleeper: Box<dyn Sleeper>,
    registry: ConnectionRegistry,
    route: Ipv4Net,
    ppp_pattern: Regex,
}

impl TunnelOrchestrator {
    pub fn new(config: TunnelConfig, system: System, sleeper: Box<dyn Sleeper>) -> Result<Self> {
        config.validate()?;
        let registry = ConnectionRegistry::new(
            config.connection_name.clone(),
            config.ipsec.config_sources.clone(),
            &config.ipsec.keyword_pattern,
        )?;
        let route = config.route()?;
        let ppp_pattern = Regex::new(&config.network.ppp_interface_pattern)?;

        Ok(Self {
            config,
            system,
            sleeper,
            registry,
            route,
            ppp_pattern,
        })
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Bring the tunnel up
    pub fn up(&mut self) -> Result<UpReport> {
        self.system.privilege.acquire()?;
        self.registry.reset();

        let cfg = &self.config;
        let timing = &cfg.timing;
        let sleeper = self.sleeper.as_ref();
        let services = ServiceController::new(self.system.supervisor.as_ref());
        let ports = PortGuard::new(self.system.ports.as_ref());

        info!("Stopping daemons for a clean start");
        services.stop_all(&cfg.services.units);
        ports.check_free(&cfg.services.udp_ports, "daemon stop");

        info!("Starting daemons");
        services.start_all(&cfg.services.units)?;

        NameResolver::new(self.system.resolver.as_ref(), sleeper)
            .resolve(&cfg.remote_host, timing.resolve)?;

        info!("Negotiating IPsec");
        let connection = IpsecSession::new(self.system.ipsec.as_ref(), sleeper).up_sequence(
            &mut self.registry,
            timing.ipsec_loaded,
            timing.ipsec_up,
        )?;

        info!("Dialing L2TP peer '{}'", cfg.l2tp_peer);
        let dial_path = L2tpDialer::new(self.system.l2tp.as_ref()).dial(&cfg.l2tp_peer);

        let watcher = PppInterfaceWatcher::new(
            self.system.network.as_ref(),
            sleeper,
            self.ppp_pattern.clone(),
        );
        let interface = watcher.wait_appear(timing.ppp_appear)?;
        let link = watcher.wait_ready(&interface, timing.ppp_ready, timing.ppp_settle())?;

        let route_outcome = RouteManager::new(self.system.network.as_ref(), sleeper).add(
            self.route,
            &interface,
            timing.route_add,
        )?;

        info!(
            "Tunnel up: {connection} via {interface} {:?}, route {}",
            link.ipv4, self.route
        );
        Ok(UpReport {
            connection,
            dial_path,
            interface,
            addresses: link.ipv4,
            route: self.route,
            route_outcome,
        })
    }

    /// Tear the tunnel down. Only privilege acquisition can fail.
    pub fn down(&mut self) -> Result<DownReport> {
        self.system.privilege.acquire()?;
        self.registry.reset();

        let cfg = &self.config;
        let sleeper = self.sleeper.as_ref();
        let network = self.system.network.as_ref();

        let interface =
            PppInterfaceWatcher::new(network, sleeper, self.ppp_pattern.clone()).current();
        let route_removed = match &interface {
            Some(iface) => RouteManager::new(network, sleeper).remove(self.route, iface),
            None => {
                info!("No PPP interface present; skipping route removal");
                false
            }
        };

        let hangup_path = L2tpDialer::new(self.system.l2tp.as_ref()).hangup(&cfg.l2tp_peer);

        IpsecSession::new(self.system.ipsec.as_ref(), sleeper).bring_down(&mut self.registry);

        let services = ServiceController::new(self.system.supervisor.as_ref());
        services.stop_all(&cfg.services.units);
        for process in &cfg.services.lingering_processes {
            services.kill_lingering(process);
        }

        let ports = PortGuard::new(self.system.ports.as_ref())
            .check_free(&cfg.services.udp_ports, "teardown");

        info!("Tunnel down");
        Ok(DownReport {
            interface,
            route_removed,
            hangup_path,
            ports,
        })
    }
}

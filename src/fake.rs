//! In-memory collaborators for tests
//!
//! Single-threaded like the orchestrator itself, so plain `Cell`/`RefCell`
//! interior mutability is enough. Each fake records the calls it receives.

use crate::error::{Result, TunnelError};
use crate::retry::Sleeper;
use crate::system::{
    HostLookup, IpsecControl, L2tpControl, LinkInfo, NetworkState, PortProbe, Privilege,
    RouteEntry, ServiceSupervisor, System,
};
use ipnet::Ipv4Net;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

fn refused(what: &str) -> TunnelError {
    TunnelError::Command {
        command: what.to_string(),
        detail: "exit status: 1".to_string(),
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn count(&self) -> usize {
        self.sleeps.borrow().len()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

impl Sleeper for Rc<RecordingSleeper> {
    fn sleep(&self, duration: Duration) {
        self.as_ref().sleep(duration);
    }
}

#[derive(Default)]
pub struct FakePrivilege {
    pub denied: Cell<bool>,
}

impl Privilege for FakePrivilege {
    fn acquire(&self) -> Result<()> {
        if self.denied.get() {
            Err(TunnelError::PrivilegeDenied("not root".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeSupervisor {
    pub running: RefCell<BTreeSet<String>>,
    pub fail_start: RefCell<BTreeSet<String>>,
    pub fail_stop: RefCell<BTreeSet<String>>,
    pub processes: RefCell<BTreeSet<String>>,
    pub calls: RefCell<Vec<String>>,
}

impl ServiceSupervisor for FakeSupervisor {
    fn start(&self, unit: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("start {unit}"));
        if self.fail_start.borrow().contains(unit) {
            return Err(refused(&format!("systemctl start {unit}")));
        }
        self.running.borrow_mut().insert(unit.to_string());
        Ok(())
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop {unit}"));
        if self.fail_stop.borrow().contains(unit) {
            return Err(refused(&format!("systemctl stop {unit}")));
        }
        self.running.borrow_mut().remove(unit);
        Ok(())
    }

    fn kill(&self, process: &str) -> Result<bool> {
        self.calls.borrow_mut().push(format!("kill {process}"));
        Ok(self.processes.borrow_mut().remove(process))
    }
}

#[derive(Default)]
pub struct FakePorts {
    pub bound: RefCell<Vec<u16>>,
    pub broken: Cell<bool>,
    pub probes: Cell<u32>,
}

impl PortProbe for FakePorts {
    fn bound_udp_ports(&self, ports: &[u16]) -> Result<Vec<u16>> {
        self.probes.set(self.probes.get() + 1);
        if self.broken.get() {
            return Err(refused("ss"));
        }
        Ok(self
            .bound
            .borrow()
            .iter()
            .copied()
            .filter(|p| ports.contains(p))
            .collect())
    }
}

#[derive(Default)]
pub struct FakeResolver {
    /// Lookups that fail before the first success; `u32::MAX` never resolves
    pub failures_before_success: Cell<u32>,
    pub lookups: Cell<u32>,
}

impl HostLookup for FakeResolver {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.lookups.set(self.lookups.get() + 1);
        let remaining = self.failures_before_success.get();
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_before_success.set(remaining - 1);
            }
            return Err(refused(&format!("resolve {host}")));
        }
        Ok(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))])
    }
}

#[derive(Default)]
pub struct FakeIpsec {
    pub status_text: RefCell<String>,
    /// `up` calls that fail before one succeeds; `u32::MAX` never succeeds
    pub up_failures: Cell<u32>,
    pub down_fails: Cell<bool>,
    pub reload_fails: Cell<bool>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeIpsec {
    pub fn up_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("up "))
            .count()
    }
}

impl IpsecControl for FakeIpsec {
    fn reload(&self) -> Result<()> {
        self.calls.borrow_mut().push("reload".to_string());
        if self.reload_fails.get() {
            return Err(refused("ipsec reload"));
        }
        Ok(())
    }

    fn reread_secrets(&self) -> Result<()> {
        self.calls.borrow_mut().push("rereadsecrets".to_string());
        Ok(())
    }

    fn status(&self) -> Result<String> {
        self.calls.borrow_mut().push("status".to_string());
        Ok(self.status_text.borrow().clone())
    }

    fn up(&self, connection: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("up {connection}"));
        let remaining = self.up_failures.get();
        if remaining > 0 {
            if remaining != u32::MAX {
                self.up_failures.set(remaining - 1);
            }
            return Err(refused(&format!("ipsec up {connection}")));
        }
        Ok(())
    }

    fn down(&self, connection: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("down {connection}"));
        if self.down_fails.get() {
            return Err(refused(&format!("ipsec down {connection}")));
        }
        Ok(())
    }
}

/// Link that shows up in listings once the network has been sampled
/// `after_polls` times after the first dial
pub struct ScheduledLink {
    pub after_polls: u32,
    pub link: LinkInfo,
}

#[derive(Default)]
pub struct FakeL2tp {
    pub channel: Cell<bool>,
    pub write_fails: Cell<bool>,
    pub directives: RefCell<Vec<String>>,
    pub restarts: Cell<u32>,
    pub stops: Cell<u32>,
    /// Set by `dial` so a shared network fake can start its link schedule
    pub dialed: Rc<Cell<bool>>,
}

impl L2tpControl for FakeL2tp {
    fn channel_present(&self) -> bool {
        self.channel.get()
    }

    fn write_directive(&self, directive: &str) -> Result<()> {
        if !self.channel.get() {
            panic!("wrote '{directive}' to a control channel that does not exist");
        }
        if self.write_fails.get() {
            return Err(refused("write l2tp-control"));
        }
        self.directives.borrow_mut().push(directive.to_string());
        if directive.starts_with("c ") {
            self.dialed.set(true);
        }
        Ok(())
    }

    fn restart_daemon(&self) -> Result<()> {
        self.restarts.set(self.restarts.get() + 1);
        self.dialed.set(true);
        Ok(())
    }

    fn stop_daemon(&self) -> Result<()> {
        self.stops.set(self.stops.get() + 1);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    pub links: RefCell<Vec<LinkInfo>>,
    pub scheduled: RefCell<Option<ScheduledLink>>,
    /// Schedule only advances once this flips (see [`FakeL2tp::dialed`])
    pub dialed: Rc<Cell<bool>>,
    pub polls_since_dial: Cell<u32>,
    pub routes: RefCell<Vec<RouteEntry>>,
    pub route_add_failures: Cell<u32>,
    /// Successful `ip route add` that leaves no trace in the table
    pub route_add_silently_ignored: Cell<bool>,
    pub route_delete_fails: Cell<bool>,
    /// Link names forced up with `set_link_up`
    pub forced_up: RefCell<Vec<String>>,
    /// Addresses assigned to a link when it is forced up
    pub address_on_force: RefCell<Option<Ipv4Net>>,
    pub route_adds: Cell<u32>,
}

impl FakeNetwork {
    pub fn add_link(&self, name: &str, admin_up: bool, ipv4: &[&str]) {
        self.links.borrow_mut().push(link(name, admin_up, ipv4));
    }

    pub fn schedule(&self, after_polls: u32, link: LinkInfo) {
        *self.scheduled.borrow_mut() = Some(ScheduledLink { after_polls, link });
    }

    fn advance(&self) {
        if !self.dialed.get() {
            return;
        }
        let polls = self.polls_since_dial.get() + 1;
        self.polls_since_dial.set(polls);
        let due = matches!(&*self.scheduled.borrow(), Some(s) if polls > s.after_polls);
        if due {
            if let Some(s) = self.scheduled.borrow_mut().take() {
                let mut links = self.links.borrow_mut();
                links.retain(|l| l.name != s.link.name);
                links.push(s.link);
            }
        }
    }
}

pub fn link(name: &str, admin_up: bool, ipv4: &[&str]) -> LinkInfo {
    LinkInfo {
        name: name.to_string(),
        admin_up,
        ipv4: ipv4.iter().map(|a| a.parse().expect("valid test prefix")).collect(),
    }
}

impl NetworkState for FakeNetwork {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        self.advance();
        Ok(self.links.borrow().clone())
    }

    fn set_link_up(&self, name: &str) -> Result<()> {
        self.forced_up.borrow_mut().push(name.to_string());
        let extra = *self.address_on_force.borrow();
        if let Some(l) = self.links.borrow_mut().iter_mut().find(|l| l.name == name) {
            l.admin_up = true;
            if let Some(addr) = extra {
                l.ipv4.push(addr);
            }
        }
        Ok(())
    }

    fn routes_to(&self, destination: Ipv4Net) -> Result<Vec<RouteEntry>> {
        Ok(self
            .routes
            .borrow()
            .iter()
            .filter(|r| r.destination == destination)
            .cloned()
            .collect())
    }

    fn add_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        self.route_adds.set(self.route_adds.get() + 1);
        let remaining = self.route_add_failures.get();
        if remaining > 0 {
            self.route_add_failures.set(remaining - 1);
            return Err(refused("ip route add"));
        }
        if self.route_add_silently_ignored.get() {
            return Ok(());
        }
        let entry = RouteEntry {
            destination,
            device: device.to_string(),
        };
        let mut routes = self.routes.borrow_mut();
        if routes.contains(&entry) {
            return Err(TunnelError::Command {
                command: "ip route add".to_string(),
                detail: "RTNETLINK answers: File exists".to_string(),
            });
        }
        routes.push(entry);
        Ok(())
    }

    fn delete_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        if self.route_delete_fails.get() {
            return Err(refused("ip route del"));
        }
        self.routes
            .borrow_mut()
            .retain(|r| !(r.destination == destination && r.device == device));
        Ok(())
    }
}

/// A fake of every collaborator, with shared handles for assertions
#[derive(Default)]
pub struct FakeSystem {
    pub privilege: Rc<FakePrivilege>,
    pub supervisor: Rc<FakeSupervisor>,
    pub ports: Rc<FakePorts>,
    pub resolver: Rc<FakeResolver>,
    pub ipsec: Rc<FakeIpsec>,
    pub l2tp: Rc<FakeL2tp>,
    pub network: Rc<FakeNetwork>,
}

impl FakeSystem {
    pub fn new() -> Self {
        let dialed = Rc::new(Cell::new(false));
        Self {
            l2tp: Rc::new(FakeL2tp {
                dialed: dialed.clone(),
                ..FakeL2tp::default()
            }),
            network: Rc::new(FakeNetwork {
                dialed,
                ..FakeNetwork::default()
            }),
            ..Self::default()
        }
    }

    pub fn system(&self) -> System {
        System {
            privilege: Box::new(Shared(self.privilege.clone())),
            supervisor: Box::new(Shared(self.supervisor.clone())),
            ports: Box::new(Shared(self.ports.clone())),
            resolver: Box::new(Shared(self.resolver.clone())),
            ipsec: Box::new(Shared(self.ipsec.clone())),
            l2tp: Box::new(Shared(self.l2tp.clone())),
            network: Box::new(Shared(self.network.clone())),
        }
    }
}

/// Boxed handle onto a fake the test keeps a reference to
pub struct Shared<T>(pub Rc<T>);

impl<T: Privilege> Privilege for Shared<T> {
    fn acquire(&self) -> Result<()> {
        self.0.acquire()
    }
}

impl<T: ServiceSupervisor> ServiceSupervisor for Shared<T> {
    fn start(&self, unit: &str) -> Result<()> {
        self.0.start(unit)
    }
    fn stop(&self, unit: &str) -> Result<()> {
        self.0.stop(unit)
    }
    fn kill(&self, process: &str) -> Result<bool> {
        self.0.kill(process)
    }
}

impl<T: PortProbe> PortProbe for Shared<T> {
    fn bound_udp_ports(&self, ports: &[u16]) -> Result<Vec<u16>> {
        self.0.bound_udp_ports(ports)
    }
}

impl<T: HostLookup> HostLookup for Shared<T> {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.0.lookup(host)
    }
}

impl<T: IpsecControl> IpsecControl for Shared<T> {
    fn reload(&self) -> Result<()> {
        self.0.reload()
    }
    fn reread_secrets(&self) -> Result<()> {
        self.0.reread_secrets()
    }
    fn status(&self) -> Result<String> {
        self.0.status()
    }
    fn up(&self, connection: &str) -> Result<()> {
        self.0.up(connection)
    }
    fn down(&self, connection: &str) -> Result<()> {
        self.0.down(connection)
    }
}

impl<T: L2tpControl> L2tpControl for Shared<T> {
    fn channel_present(&self) -> bool {
        self.0.channel_present()
    }
    fn write_directive(&self, directive: &str) -> Result<()> {
        self.0.write_directive(directive)
    }
    fn restart_daemon(&self) -> Result<()> {
        self.0.restart_daemon()
    }
    fn stop_daemon(&self) -> Result<()> {
        self.0.stop_daemon()
    }
}

impl<T: NetworkState> NetworkState for Shared<T> {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        self.0.links()
    }
    fn set_link_up(&self, name: &str) -> Result<()> {
        self.0.set_link_up(name)
    }
    fn routes_to(&self, destination: Ipv4Net) -> Result<Vec<RouteEntry>> {
        self.0.routes_to(destination)
    }
    fn add_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        self.0.add_route(destination, device)
    }
    fn delete_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        self.0.delete_route(destination, device)
    }
}

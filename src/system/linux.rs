//! Linux adapters
//!
//! These shell out to `systemctl`, `pkill`, `ss`, `ipsec` and `ip`, the same
//! way an administrator would. Privileged commands are prefixed with
//! `sudo -n` unless the process already runs as root.

use super::{
    HostLookup, IpsecControl, L2tpControl, LinkInfo, NetworkState, PortProbe, Privilege,
    RouteEntry, ServiceSupervisor,
};
use crate::error::{IntoTunnelError, Result, TunnelError};
use ipnet::Ipv4Net;
use log::debug;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// systemctl: unit not loaded
const SYSTEMCTL_NOT_LOADED: i32 = 5;
/// pkill: no process matched
const PKILL_NO_MATCH: i32 = 1;

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn privileged(program: &str) -> Command {
    if is_root() {
        Command::new(program)
    } else {
        let mut cmd = Command::new("sudo");
        cmd.arg("-n").arg(program);
        cmd
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

fn run(mut cmd: Command) -> Result<Output> {
    let label = describe(&cmd);
    debug!("exec: {label}");
    cmd.stdin(Stdio::null()).output().into_tunnel_error(&label)
}

/// Run and require a zero exit status; returns stdout
fn run_checked(cmd: Command) -> Result<String> {
    let label = describe(&cmd);
    let output = run(cmd)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(failure(&label, &output))
    }
}

fn failure(label: &str, output: &Output) -> TunnelError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    TunnelError::Command {
        command: label.to_string(),
        detail: format!("{} {}", output.status, text).trim().to_string(),
    }
}

/// Run with `input` on stdin and require a zero exit status
fn run_with_input(mut cmd: Command, input: &[u8]) -> Result<String> {
    let label = describe(&cmd);
    debug!("exec: {label}");
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .into_tunnel_error(&label)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    let output = child.wait_with_output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(failure(&label, &output))
    }
}

/// Write to a FIFO without waiting for a reader.
///
/// A stale FIFO left behind by a dead daemon fails with `ENXIO` instead of
/// blocking the open forever.
fn write_fifo(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut fifo = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    fifo.write_all(bytes)
}

/// Root, or `sudo -v` so later `sudo -n` calls do not prompt
pub struct SudoPrivilege;

impl Privilege for SudoPrivilege {
    fn acquire(&self) -> Result<()> {
        if is_root() {
            return Ok(());
        }
        let status = Command::new("sudo")
            .arg("-v")
            .status()
            .map_err(|e| TunnelError::PrivilegeDenied(format!("could not run sudo: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(TunnelError::PrivilegeDenied(
                "root privileges are required; run as root or allow sudo".to_string(),
            ))
        }
    }
}

pub struct Systemctl;

impl ServiceSupervisor for Systemctl {
    fn start(&self, unit: &str) -> Result<()> {
        let mut cmd = privileged("systemctl");
        cmd.args(["start", unit]);
        run_checked(cmd).map(|_| ())
    }

    fn stop(&self, unit: &str) -> Result<()> {
        let mut cmd = privileged("systemctl");
        cmd.args(["stop", unit]);
        let label = describe(&cmd);
        let output = run(cmd)?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(SYSTEMCTL_NOT_LOADED) => {
                debug!("{unit} is not loaded; nothing to stop");
                Ok(())
            }
            _ => Err(failure(&label, &output)),
        }
    }

    fn kill(&self, process: &str) -> Result<bool> {
        let mut cmd = privileged("pkill");
        cmd.args(["-x", process]);
        let label = describe(&cmd);
        let output = run(cmd)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(PKILL_NO_MATCH) => Ok(false),
            _ => Err(failure(&label, &output)),
        }
    }
}

pub struct SsPortProbe;

impl PortProbe for SsPortProbe {
    fn bound_udp_ports(&self, ports: &[u16]) -> Result<Vec<u16>> {
        let mut cmd = Command::new("ss");
        cmd.args(["-H", "-l", "-u", "-n"]);
        let listing = run_checked(cmd)?;
        Ok(parse_ss_ports(&listing, ports))
    }
}

/// Ports from `wanted` appearing in the local-address column of `ss -H -l -u -n`
pub(crate) fn parse_ss_ports(listing: &str, wanted: &[u16]) -> Vec<u16> {
    let mut bound: Vec<u16> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|local| local.rsplit(':').next())
        .filter_map(|port| port.parse::<u16>().ok())
        .filter(|port| wanted.contains(port))
        .collect();
    bound.sort_unstable();
    bound.dedup();
    bound
}

pub struct StdLookup;

impl HostLookup for StdLookup {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = (host, 0)
            .to_socket_addrs()
            .into_tunnel_error(&format!("resolve {host}"))?;
        Ok(addrs.map(|sa| sa.ip()).collect())
    }
}

pub struct IpsecCli {
    command: String,
}

impl IpsecCli {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    fn invoke(&self, args: &[&str]) -> Result<String> {
        let mut cmd = privileged(&self.command);
        cmd.args(args);
        run_checked(cmd)
    }
}

impl IpsecControl for IpsecCli {
    fn reload(&self) -> Result<()> {
        self.invoke(&["reload"]).map(|_| ())
    }

    fn reread_secrets(&self) -> Result<()> {
        self.invoke(&["rereadsecrets"]).map(|_| ())
    }

    fn status(&self) -> Result<String> {
        self.invoke(&["statusall"])
    }

    fn up(&self, connection: &str) -> Result<()> {
        self.invoke(&["up", connection]).map(|_| ())
    }

    fn down(&self, connection: &str) -> Result<()> {
        self.invoke(&["down", connection]).map(|_| ())
    }
}

/// xl2tpd control FIFO plus its systemd unit
pub struct Xl2tpdControl {
    channel: PathBuf,
    service: String,
}

impl Xl2tpdControl {
    pub fn new(channel: PathBuf, service: &str) -> Self {
        Self {
            channel,
            service: service.to_string(),
        }
    }
}

impl L2tpControl for Xl2tpdControl {
    fn channel_present(&self) -> bool {
        self.channel.exists()
    }

    fn write_directive(&self, directive: &str) -> Result<()> {
        let line = format!("{directive}\n");
        if is_root() {
            return Ok(write_fifo(&self.channel, line.as_bytes())?);
        }

        // Root-owned FIFO: `dd` opens it non-blocking like `write_fifo`
        let mut cmd = privileged("dd");
        cmd.arg(format!("of={}", self.channel.display()))
            .args(["oflag=nonblock", "conv=notrunc,nocreat", "status=none"]);
        run_with_input(cmd, line.as_bytes()).map(|_| ())
    }

    fn restart_daemon(&self) -> Result<()> {
        let mut cmd = privileged("systemctl");
        cmd.args(["restart", self.service.as_str()]);
        run_checked(cmd).map(|_| ())
    }

    fn stop_daemon(&self) -> Result<()> {
        Systemctl.stop(&self.service)
    }
}

/// iproute2 `ip` command
pub struct IpRoute2;

impl NetworkState for IpRoute2 {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        let mut cmd = Command::new("ip");
        cmd.args(["-o", "link", "show"]);
        let links = run_checked(cmd)?;

        let mut cmd = Command::new("ip");
        cmd.args(["-o", "-4", "addr", "show"]);
        let addrs = run_checked(cmd)?;

        Ok(parse_links(&links, &addrs))
    }

    fn set_link_up(&self, name: &str) -> Result<()> {
        let mut cmd = privileged("ip");
        cmd.args(["link", "set", "dev", name, "up"]);
        run_checked(cmd).map(|_| ())
    }

    fn routes_to(&self, destination: Ipv4Net) -> Result<Vec<RouteEntry>> {
        let destination = destination.to_string();
        let mut cmd = Command::new("ip");
        cmd.args(["-4", "route", "show", "to", "exact", destination.as_str()]);
        let table = run_checked(cmd)?;
        Ok(parse_routes(&table))
    }

    fn add_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        let destination = destination.to_string();
        let mut cmd = privileged("ip");
        cmd.args(["route", "add", destination.as_str(), "dev", device]);
        run_checked(cmd).map(|_| ())
    }

    fn delete_route(&self, destination: Ipv4Net, device: &str) -> Result<()> {
        let destination = destination.to_string();
        let mut cmd = privileged("ip");
        cmd.args(["route", "del", destination.as_str(), "dev", device]);
        run_checked(cmd).map(|_| ())
    }
}

/// Combine `ip -o link show` and `ip -o -4 addr show` output
pub(crate) fn parse_links(link_listing: &str, addr_listing: &str) -> Vec<LinkInfo> {
    let mut links: Vec<LinkInfo> = link_listing.lines().filter_map(parse_link_line).collect();

    for line in addr_listing.lines() {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.nth(1) else { continue };
        let Some(addr) = parse_inet(line) else { continue };
        if let Some(link) = links.iter_mut().find(|l| l.name == name) {
            link.ipv4.push(addr);
        }
    }

    links
}

// "3: ppp0: <POINTOPOINT,MULTICAST,NOARP,UP,LOWER_UP> mtu 1400 qdisc ..."
fn parse_link_line(line: &str) -> Option<LinkInfo> {
    let mut fields = line.splitn(3, ": ");
    let _index = fields.next()?;
    let name = fields.next()?.split('@').next()?.trim().to_string();
    let rest = fields.next()?;
    let flags = rest.strip_prefix('<')?.split('>').next()?;
    let admin_up = flags.split(',').any(|f| f == "UP");
    Some(LinkInfo {
        name,
        admin_up,
        ipv4: Vec::new(),
    })
}

// "3: ppp0    inet 10.0.0.5 peer 10.0.0.1/32 scope global ppp0"
// "2: eth0    inet 192.168.1.7/24 brd 192.168.1.255 scope global eth0"
fn parse_inet(line: &str) -> Option<Ipv4Net> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "inet")?;
    let local = tokens.next()?;
    match local.split_once('/') {
        Some(_) => local.parse().ok(),
        None => {
            let addr: Ipv4Addr = local.parse().ok()?;
            Ipv4Net::new(addr, 32).ok()
        }
    }
}

// "172.27.48.0/22 dev ppp0 scope link"
pub(crate) fn parse_routes(table: &str) -> Vec<RouteEntry> {
    table
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let destination = tokens.first()?.parse::<Ipv4Net>().ok()?.trunc();
            let dev_at = tokens.iter().position(|t| *t == "dev")?;
            let device = tokens.get(dev_at + 1)?.to_string();
            Some(RouteEntry {
                destination,
                device,
            })
        })
        .collect()
}

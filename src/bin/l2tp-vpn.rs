//! l2tp-vpn
//!
//! Brings the L2TP/IPsec tunnel up or down. Configuration comes from the
//! `VPN_*` environment variables and an optional TOML file named by
//! `VPN_CONFIG`.

use l2tp_ipsec_vpn::{
    retry::ThreadSleeper, system::System, Result, TunnelConfig, TunnelError, TunnelOrchestrator,
};
use log::info;
use std::env;
use std::process;

/// Exit status for bad usage
const EXIT_USAGE: i32 = 2;
/// Exit status for a fatal error
const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Up,
    Down,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let action = match parse_args(&args) {
        Ok(action) => action,
        Err(code) => {
            print_usage();
            process::exit(code);
        }
    };

    if let Err(e) = run(action) {
        let (code, message) = fatal(&e);
        eprintln!("{message}");
        process::exit(code);
    }
}

/// Exactly one of `up` / `down`; anything else is a usage error
fn parse_args(args: &[String]) -> std::result::Result<Action, i32> {
    match args {
        [cmd] if cmd == "up" => Ok(Action::Up),
        [cmd] if cmd == "down" => Ok(Action::Down),
        _ => Err(EXIT_USAGE),
    }
}

/// Exit status and final stderr line for a fatal error
fn fatal(err: &TunnelError) -> (i32, String) {
    (EXIT_FAILURE, format!("ERROR: {err}"))
}

fn run(action: Action) -> Result<()> {
    let config = TunnelConfig::from_env()?;
    info!(
        "{} v{}: {:?} {} (route {})",
        l2tp_ipsec_vpn::NAME,
        l2tp_ipsec_vpn::VERSION,
        action,
        config.remote_host,
        config.route_cidr
    );

    let system = System::host(&config);
    let mut tunnel = TunnelOrchestrator::new(config, system, Box::new(ThreadSleeper))?;

    match action {
        Action::Up => {
            let report = tunnel.up()?;
            info!(
                "Connected: {} on {} {:?}",
                report.connection, report.interface, report.addresses
            );
        }
        Action::Down => {
            tunnel.down()?;
        }
    }
    Ok(())
}

/// Print usage information
fn print_usage() {
    eprintln!("l2tp-vpn v{}", l2tp_ipsec_vpn::VERSION);
    eprintln!("Bring the L2TP/IPsec tunnel up or down");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    l2tp-vpn <up|down>");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    VPN_CONN_NAME     IPsec connection name (default: auto-detect)");
    eprintln!("    VPN_L2TP_PEER     L2TP peer identifier (default: sharif)");
    eprintln!("    VPN_REMOTE_HOST   Remote gateway (default: vpn.sharif.edu)");
    eprintln!("    VPN_ROUTE_CIDR    Route to install (default: 172.27.48.0/22)");
    eprintln!("    VPN_CONFIG        Optional TOML file with further settings");
    eprintln!("    RUST_LOG          Log filter (default: info)");
    eprintln!();
    eprintln!("PRIVILEGES:");
    eprintln!("    Requires root, or sudo rights it will ask for once.");
}

//! Thin binary wiring `dhcp4_core`'s library pieces to real collaborators:
//! a real clock, a `std::net::UdpSocket`-backed transport, and a
//! process-spawning script runner. Interface discovery, the config-file
//! parser, and daemonization are out of scope (see the crate's docs); this
//! binary reads only the flags the state machine itself depends on (§6).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use dhcp4_core::client::{Client, ClientConfig};
use dhcp4_core::clock::{Clock, SystemClock};
use dhcp4_core::dispatcher::Dispatcher;
use dhcp4_core::interface::{Interface, InterfaceFlags};
use dhcp4_core::runtime::{open_journal_or_fail, Runtime};
use dhcp4_core::script::ProcessScriptRunner;
use dhcp4_core::socket::{Socket, UdpSocketTransport};
use dhcp4_core::timer::ClientId;

/// Core IPv4 DHCP client state machine — reduced flag surface; the
/// config-file grammar, full CLI UX, and daemonization are out of scope.
#[derive(Parser, Debug)]
#[command(name = "dhclient-core")]
struct Cli {
    /// Suppress interface activation; recover state only.
    #[arg(short = 'n')]
    no_activate: bool,
    /// Release the active lease on each interface and exit.
    #[arg(short = 'r')]
    release: bool,
    /// Exit without releasing.
    #[arg(short = 'x')]
    exit_only: bool,
    /// One-try mode: exit 2 on failure to obtain a lease.
    #[arg(short = '1')]
    onetry: bool,
    /// Lease database path.
    #[arg(long, default_value = "/var/lib/dhclient/dhclient.leases")]
    lease_file: PathBuf,
    /// External script path.
    #[arg(long, default_value = "/sbin/dhclient-script")]
    script: PathBuf,
    /// Interfaces to operate on; each is marked REQUESTED.
    interfaces: Vec<String>,
}

/// Interface discovery (raw-socket/BPF setup) is out of scope; this stands
/// in for the hardware address a real discovery pass would supply.
fn synthetic_hw_addr(interface_name: &str) -> [u8; 6] {
    let mut addr = [0u8; 6];
    addr[0] = 0x02; // locally administered, collides with no real OUI
    for (i, b) in interface_name.bytes().enumerate().take(5) {
        addr[i + 1] = b;
    }
    addr
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.exit_only {
        log::info!("-x given, exiting without releasing");
        std::process::exit(0);
    }

    let (journal, recovered) = match open_journal_or_fail(&cli.lease_file, None::<&std::path::Path>) {
        Ok(v) => v,
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let clock = SystemClock;
    let primary_hw = synthetic_hw_addr(cli.interfaces.first().map(String::as_str).unwrap_or("eth0"));
    let duid = Runtime::duid_or_generate(recovered.duid.clone(), &primary_hw, clock.now());

    let mut interfaces = Vec::new();
    let mut sockets: HashMap<String, Arc<dyn Socket>> = HashMap::new();
    for (i, name) in cli.interfaces.iter().enumerate() {
        let hw = synthetic_hw_addr(name);
        let mut config = ClientConfig::default();
        config.onetry = cli.onetry;
        let mut client = Client::new(ClientId(i as u64), name.clone(), hw, config);
        for record in recovered.leases.iter().filter(|r| &r.interface == name) {
            client.stored_leases.push(record.lease.clone());
        }

        let mut iface = Interface::new(name.clone(), hw.to_vec(), InterfaceFlags::REQUESTED);
        if cli.no_activate {
            iface.dummy_clients.push(client);
        } else {
            iface.live_clients.push(client);
        }
        interfaces.push(iface);

        match UdpSocketTransport::bind(Ipv4Addr::UNSPECIFIED) {
            Ok(transport) => {
                sockets.insert(name.clone(), Arc::new(transport));
            }
            Err(e) => log::warn!("{name}: failed to bind socket: {e}"),
        }
    }

    if interfaces.is_empty() {
        log::error!("fatal: no interface named on the command line");
        std::process::exit(1);
    }

    let script_runner = ProcessScriptRunner::new(cli.script);
    let mut runtime = Runtime::new(
        interfaces,
        duid,
        Box::new(clock),
        Box::new(script_runner),
        journal,
        sockets,
        recovered.lease6_raw,
    );

    if cli.release {
        runtime.shutdown();
        return;
    }

    runtime.start_all();

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_requested)) {
        log::warn!("failed to install SIGINT handler: {e}");
    }
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_requested)) {
        log::warn!("failed to install SIGTERM handler: {e}");
    }

    let poll_sockets: Vec<(String, Arc<dyn Socket>)> = cli
        .interfaces
        .iter()
        .filter_map(|name| runtime.socket_for(name).map(|socket| (name.clone(), socket)))
        .collect();
    if poll_sockets.is_empty() {
        log::error!("fatal: no usable interface among: {:?}", cli.interfaces);
        std::process::exit(1);
    }
    let mut dispatcher = Dispatcher::new(&mut runtime, poll_sockets);
    dispatcher.run(|| shutdown_requested.load(Ordering::Relaxed));
}

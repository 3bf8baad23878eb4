//! The explicit "runtime" value handlers are threaded through (§9 design
//! notes: no process-wide globals besides the logging sink). Owns every
//! Interface, the shared DUID, the journal, the timer wheel, and one socket
//! per interface; hands a freshly borrowed [`crate::client::Services`] to
//! whichever `Client` a packet or timer belongs to.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::client::Services;
use crate::duid::Duid;
use crate::error::CoreError;
use crate::interface::Interface;
use crate::journal::Journal;
use crate::packet::Packet;
use crate::script::ScriptRunner;
use crate::socket::Socket;
use crate::timer::{ClientId, TimerKind, TimerWheel};

/// Everything the core needs for one run: every discovered interface, the
/// shared collaborators, and the process-wide timer wheel and journal.
pub struct Runtime {
    pub interfaces: Vec<Interface>,
    pub duid: Duid,
    clock: Box<dyn Clock>,
    script: Box<dyn ScriptRunner>,
    journal: Journal,
    timers: TimerWheel,
    sockets: HashMap<String, Arc<dyn Socket>>,
    lease6_raw: Vec<String>,
}

impl Runtime {
    pub fn new(
        interfaces: Vec<Interface>,
        duid: Duid,
        clock: Box<dyn Clock>,
        script: Box<dyn ScriptRunner>,
        journal: Journal,
        sockets: HashMap<String, Arc<dyn Socket>>,
        lease6_raw: Vec<String>,
    ) -> Self {
        Runtime {
            interfaces,
            duid,
            clock,
            script,
            journal,
            timers: TimerWheel::new(),
            sockets,
            lease6_raw,
        }
    }

    fn find_client_mut(&mut self, id: ClientId) -> Option<(usize, usize)> {
        for (i, iface) in self.interfaces.iter().enumerate() {
            if let Some(j) = iface.live_clients.iter().position(|c| c.id == id) {
                return Some((i, j));
            }
        }
        None
    }

    /// Start every live client on every interface (REBOOTING if it has a
    /// usable stored lease, else INIT).
    pub fn start_all(&mut self) {
        for i in 0..self.interfaces.len() {
            let socket_name = self.interfaces[i].name.clone();
            for j in 0..self.interfaces[i].live_clients.len() {
                let Some(socket) = self.sockets.get(&socket_name) else {
                    warn!("no socket bound for interface {socket_name}, skipping");
                    continue;
                };
                let mut svc = Services {
                    clock: self.clock.as_ref(),
                    socket: socket.as_ref(),
                    script: self.script.as_ref(),
                    timers: &mut self.timers,
                    journal: &mut self.journal,
                };
                self.interfaces[i].live_clients[j].start(&mut svc);
            }
        }
        self.compact_if_needed();
    }

    /// Decode and deliver one datagram received on `interface_name` to
    /// whichever attached Client's `xid`/chaddr it matches.
    pub fn handle_datagram(&mut self, interface_name: &str, bytes: &[u8]) {
        let pkt = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!("{interface_name}: dropping malformed packet: {e}");
                return;
            }
        };
        let Some(iface_idx) = self.interfaces.iter().position(|i| i.name == interface_name) else {
            return;
        };
        let server = pkt
            .options
            .lookup_ipv4(crate::packet::OptionCode::ServerIdentifier)
            .unwrap_or(pkt.siaddr);
        if server != [0; 4] && self.interfaces[iface_idx].is_rejected(server) {
            debug!("{interface_name}: dropping packet from rejected server {server:?}");
            return;
        }
        let socket_name = interface_name.to_string();
        let Some(socket) = self.sockets.get(&socket_name) else { return };
        let mut svc = Services {
            clock: self.clock.as_ref(),
            socket: socket.as_ref(),
            script: self.script.as_ref(),
            timers: &mut self.timers,
            journal: &mut self.journal,
        };
        for client in &mut self.interfaces[iface_idx].live_clients {
            client.handle_packet(&mut svc, &pkt);
            if let Some(addr) = client.pending_reject.take() {
                self.interfaces[iface_idx].reject(addr, [255, 255, 255, 255]);
            }
        }
        self.compact_if_needed();
    }

    /// The nearest due timer across every interface's clients.
    pub fn next_deadline(&self) -> Option<crate::clock::AbsTime> {
        self.timers.next_deadline()
    }

    /// Current wall-clock time, as seen by this runtime's clock.
    pub fn now(&self) -> crate::clock::AbsTime {
        self.clock.now()
    }

    /// The socket bound to `interface_name`, if any — a cloned `Arc` so a
    /// caller (the binary) can hand one to a [`crate::dispatcher::Dispatcher`]
    /// without holding a borrow of this `Runtime`.
    pub fn socket_for(&self, interface_name: &str) -> Option<Arc<dyn Socket>> {
        self.sockets.get(interface_name).cloned()
    }

    /// Fire every timer due at `now`, in deadline order, per §4.G step 4.
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        for (client_id, kind) in self.timers.drain_due(now) {
            self.fire_one_timer(client_id, kind);
        }
        self.compact_if_needed();
    }

    fn fire_one_timer(&mut self, client_id: ClientId, kind: TimerKind) {
        let Some((iface_idx, client_idx)) = self.find_client_mut(client_id) else {
            return;
        };
        let socket_name = self.interfaces[iface_idx].name.clone();
        let Some(socket) = self.sockets.get(&socket_name) else { return };
        let mut svc = Services {
            clock: self.clock.as_ref(),
            socket: socket.as_ref(),
            script: self.script.as_ref(),
            timers: &mut self.timers,
            journal: &mut self.journal,
        };
        self.interfaces[iface_idx].live_clients[client_idx].fire_timer(&mut svc, kind);
    }

    /// Shutdown handler (SIGINT/SIGTERM, §5): release every live client,
    /// then the caller schedules the 1-µs exit timer. Re-entry is the
    /// caller's responsibility to guard (a boolean flag at the binary).
    pub fn shutdown(&mut self) {
        info!("shutdown: releasing all clients");
        for i in 0..self.interfaces.len() {
            let socket_name = self.interfaces[i].name.clone();
            for j in 0..self.interfaces[i].live_clients.len() {
                let Some(socket) = self.sockets.get(&socket_name) else { continue };
                let mut svc = Services {
                    clock: self.clock.as_ref(),
                    socket: socket.as_ref(),
                    script: self.script.as_ref(),
                    timers: &mut self.timers,
                    journal: &mut self.journal,
                };
                self.interfaces[i].live_clients[j].do_release(&mut svc);
            }
        }
    }

    /// Compact the journal if the append counter has crossed
    /// [`crate::journal::COMPACT_AFTER`], snapshotting every client's
    /// active/stored lease across every interface.
    fn compact_if_needed(&mut self) {
        if !self.journal.needs_compaction() {
            return;
        }
        let mut snapshot = Vec::new();
        for iface in &self.interfaces {
            for client in iface.live_clients.iter().chain(iface.dummy_clients.iter()) {
                if let Some(lease) = current_lease_snapshot(&client.state) {
                    snapshot.push((client.interface_name.clone(), lease.clone()));
                }
                for lease in &client.stored_leases {
                    snapshot.push((client.interface_name.clone(), lease.clone()));
                }
            }
        }
        if let Err(e) = self.journal.compact(Some(&self.duid), &snapshot, &self.lease6_raw) {
            warn!("journal compaction failed: {e}");
        }
    }

    /// Open the journal's recovered state into a fresh `Runtime`'s
    /// bookkeeping; a thin wrapper so the binary doesn't need to know the
    /// journal's `Recovered` shape.
    pub fn duid_or_generate(recovered_duid: Option<Duid>, hw_addr: &[u8], now: crate::clock::AbsTime) -> Duid {
        recovered_duid.unwrap_or_else(|| Duid::new_llt(hw_addr, now))
    }
}

fn current_lease_snapshot(state: &crate::client::ClientState) -> Option<&crate::lease::ClientLease> {
    use crate::client::ClientState::*;
    match state {
        Bound { lease } | Renewing { lease } | Rebinding { lease } | Rebooting { lease } | Declining { lease } => Some(lease),
        Requesting { chosen } => Some(chosen),
        Init | Selecting { .. } | Stopped => None,
    }
}

/// Fatal startup errors the binary is expected to handle by terminating
/// with a diagnostic (§7's "fatal configuration errors" category).
pub fn open_journal_or_fail(
    path: impl AsRef<std::path::Path>,
    duid_path: Option<impl AsRef<std::path::Path>>,
) -> Result<(Journal, crate::journal::Recovered), CoreError> {
    Journal::open(path, duid_path).map_err(CoreError::from)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::{AbsTime, FakeClock};
    use crate::client::{Client, ClientConfig};
    use crate::interface::InterfaceFlags;
    use crate::script::{ExitOutcome, ScriptInvocation};
    use crate::socket::RecordingSocket;
    use crate::timer::ClientId;

    struct NoopRunner;
    impl ScriptRunner for NoopRunner {
        fn run(&self, _invocation: &ScriptInvocation) -> Result<ExitOutcome, crate::error::ScriptError> {
            Ok(ExitOutcome::Exited(0))
        }
    }

    fn fresh_journal() -> Journal {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("dhcp4-core-runtime-test-{}-{n}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        Journal::open(&path, None::<&std::path::Path>).unwrap().0
    }

    #[test]
    fn start_all_sends_a_discover_for_each_live_client() {
        let hw = vec![1, 2, 0, 0, 0, 0, 1];
        let mut iface = Interface::new("eth0", hw.clone(), InterfaceFlags::REQUESTED);
        iface
            .live_clients
            .push(Client::new(ClientId(1), "eth0", [2, 0, 0, 0, 0, 1], ClientConfig::default()));

        let mut sockets: HashMap<String, Arc<dyn Socket>> = HashMap::new();
        sockets.insert("eth0".to_string(), Arc::new(RecordingSocket::default()));

        let mut rt = Runtime::new(
            vec![iface],
            Duid::new_ll(&hw),
            Box::new(FakeClock::new(AbsTime::from_secs(1000))),
            Box::new(NoopRunner),
            fresh_journal(),
            sockets,
            Vec::new(),
        );
        rt.start_all();
        assert!(matches!(rt.interfaces[0].live_clients[0].state, crate::client::ClientState::Selecting { .. }));
    }

    #[test]
    fn zero_lease_time_ack_rejects_server_and_subsequent_packets_from_it_are_dropped() {
        use crate::packet::{BootpOp, DhcpMessageType, OptionCode, Packet};

        let hw = vec![1, 2, 0, 0, 0, 0, 1];
        let chaddr = [2, 0, 0, 0, 0, 1];
        let mut iface = Interface::new("eth0", hw.clone(), InterfaceFlags::REQUESTED);
        iface
            .live_clients
            .push(Client::new(ClientId(1), "eth0", chaddr, ClientConfig::default()));

        let mut sockets: HashMap<String, Arc<dyn Socket>> = HashMap::new();
        sockets.insert("eth0".to_string(), Arc::new(RecordingSocket::default()));

        let mut rt = Runtime::new(
            vec![iface],
            Duid::new_ll(&hw),
            Box::new(FakeClock::new(AbsTime::from_secs(1000))),
            Box::new(NoopRunner),
            fresh_journal(),
            sockets,
            Vec::new(),
        );
        rt.start_all();
        let xid = rt.interfaces[0].live_clients[0].xid;

        let mut offer = Packet::new_request(xid, chaddr);
        offer.op = BootpOp::BootReply;
        offer.yiaddr = [192, 0, 2, 50];
        offer.options.save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Offer.into());
        offer.options.save_ipv4(OptionCode::SubnetMask, [255, 255, 255, 0]);
        offer.options.save_u32(OptionCode::IpAddressLeaseTime, 600);
        rt.handle_datagram("eth0", &offer.encode());
        rt.fire_one_timer(ClientId(1), TimerKind::StateSelecting);
        assert!(matches!(
            rt.interfaces[0].live_clients[0].state,
            crate::client::ClientState::Requesting { .. }
        ));

        let xid = rt.interfaces[0].live_clients[0].xid;
        let mut ack = Packet::new_request(xid, chaddr);
        ack.op = BootpOp::BootReply;
        ack.yiaddr = [192, 0, 2, 50];
        ack.options.save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Ack.into());
        ack.options.save_ipv4(OptionCode::ServerIdentifier, [192, 0, 2, 1]);
        ack.options.save_u32(OptionCode::IpAddressLeaseTime, 0);
        rt.handle_datagram("eth0", &ack.encode());

        assert!(matches!(rt.interfaces[0].live_clients[0].state, crate::client::ClientState::Init));
        assert!(rt.interfaces[0].is_rejected([192, 0, 2, 1]));

        let xid = rt.interfaces[0].live_clients[0].xid;
        let mut second_ack = Packet::new_request(xid, chaddr);
        second_ack.op = BootpOp::BootReply;
        second_ack.siaddr = [192, 0, 2, 1];
        second_ack.yiaddr = [192, 0, 2, 51];
        second_ack
            .options
            .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Ack.into());
        second_ack.options.save_u32(OptionCode::IpAddressLeaseTime, 600);
        rt.handle_datagram("eth0", &second_ack.encode());
        assert!(matches!(rt.interfaces[0].live_clients[0].state, crate::client::ClientState::Init));
    }
}

//! End-to-end protocol scenarios, driving a [`Client`] through full
//! DISCOVER/OFFER/REQUEST/ACK cycles (decoding each outgoing packet back off
//! the wire, the way a real peer would) rather than calling its private
//! handlers directly.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dhcp4_core::client::{Client, ClientConfig, ClientState, Services};
use dhcp4_core::clock::{AbsTime, FakeClock};
use dhcp4_core::error::ScriptError;
use dhcp4_core::journal::Journal;
use dhcp4_core::lease::ClientLease;
use dhcp4_core::options::OptionStore;
use dhcp4_core::packet::{BootpOp, DhcpMessageType, OptionCode, Packet};
use dhcp4_core::script::{ExitOutcome, Reason, ScriptInvocation, ScriptRunner};
use dhcp4_core::socket::{Destination, RecordingSocket, Socket};
use dhcp4_core::timer::{ClientId, TimerKind, TimerWheel};

struct ScriptedRunner {
    outcome: ExitOutcome,
    invocations: RefCell<Vec<Reason>>,
}

impl ScriptedRunner {
    fn ok() -> Self {
        ScriptedRunner {
            outcome: ExitOutcome::Exited(0),
            invocations: RefCell::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        ScriptedRunner {
            outcome: ExitOutcome::Exited(1),
            invocations: RefCell::new(Vec::new()),
        }
    }

    fn reasons(&self) -> Vec<Reason> {
        self.invocations.borrow().clone()
    }
}

impl ScriptRunner for ScriptedRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ExitOutcome, ScriptError> {
        if let Some(reason) = invocation.reason {
            self.invocations.borrow_mut().push(reason);
        }
        Ok(self.outcome)
    }
}

fn fresh_journal() -> Journal {
    fresh_journal_at_path().0
}

fn fresh_journal_at_path() -> (Journal, std::path::PathBuf) {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("dhcp4-core-scenario-{}-{n}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let journal = Journal::open(&path, None::<&Path>).unwrap().0;
    (journal, path)
}

/// Decode the last datagram a [`RecordingSocket`] sent and assert it carries
/// `want_type`.
fn last_sent_as(socket: &RecordingSocket, want_type: DhcpMessageType) -> Packet {
    let sent = socket.sent.borrow();
    let (_, bytes) = sent.last().expect("nothing was sent");
    let pkt = Packet::decode(bytes).unwrap();
    assert_eq!(pkt.packet_type(), want_type);
    pkt
}

/// A server's DHCPOFFER in reply to `request`.
fn offer_for(request: &Packet, addr: [u8; 4], lease_time: u32) -> Packet {
    let mut pkt = Packet::new_request(request.xid, [0; 6]);
    pkt.op = BootpOp::BootReply;
    pkt.chaddr = request.chaddr;
    pkt.hlen = request.hlen;
    pkt.yiaddr = addr;
    pkt.siaddr = [192, 0, 2, 1];
    pkt.options
        .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Offer.into());
    pkt.options.save_ipv4(OptionCode::SubnetMask, [255, 255, 255, 0]);
    pkt.options.save_u32(OptionCode::IpAddressLeaseTime, lease_time);
    pkt
}

/// A server's DHCPACK in reply to `request`, granting `addr`.
fn ack_for(request: &Packet, addr: [u8; 4], lease_time: u32, renewal: u32, rebind: u32) -> Packet {
    let mut pkt = offer_for(request, addr, lease_time);
    pkt.options
        .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Ack.into());
    pkt.options.save_u32(OptionCode::RenewalTime, renewal);
    pkt.options.save_u32(OptionCode::RebindingTime, rebind);
    pkt
}

fn nak_for(request: &Packet) -> Packet {
    let mut pkt = Packet::new_request(request.xid, [0; 6]);
    pkt.op = BootpOp::BootReply;
    pkt.chaddr = request.chaddr;
    pkt.hlen = request.hlen;
    pkt.options
        .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Nak.into());
    pkt
}

fn sample_lease(clock: &FakeClock, address: [u8; 4], renew_in: i64, rebind_in: i64, expire_in: i64, is_static: bool) -> ClientLease {
    ClientLease {
        address,
        next_server: [0; 4],
        options: OptionStore::new(),
        server_name: None,
        boot_file_name: None,
        is_bootp: false,
        is_static,
        medium: None,
        renewal: clock.now().offset_by(renew_in),
        rebind: clock.now().offset_by(rebind_in),
        expiry: clock.now().offset_by(expire_in),
    }
}

#[test]
fn fresh_dora_acquires_and_binds_a_lease() {
    let clock = FakeClock::new(AbsTime::from_secs(2_000_000));
    let socket = RecordingSocket::default();
    let runner = ScriptedRunner::ok();
    let mut timers = TimerWheel::new();
    let mut journal = fresh_journal();
    let hw = [2, 0, 0, 0, 0, 7];
    let mut client = Client::new(ClientId(1), "eth0", hw, ClientConfig::default());
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &runner,
        timers: &mut timers,
        journal: &mut journal,
    };

    client.start(&mut svc);
    let discover = last_sent_as(&socket, DhcpMessageType::Discover);
    assert!(matches!(client.state, ClientState::Selecting { .. }));

    let offer = offer_for(&discover, [192, 0, 2, 40], 600);
    client.handle_packet(&mut svc, &offer);
    client.fire_timer(&mut svc, TimerKind::StateSelecting);
    let request = last_sent_as(&socket, DhcpMessageType::Request);
    assert!(matches!(client.state, ClientState::Requesting { .. }));
    assert_eq!(request.options.lookup_ipv4(OptionCode::RequestedIpAddress), Some([192, 0, 2, 40]));

    let ack = ack_for(&request, [192, 0, 2, 40], 600, 300, 525);
    client.handle_packet(&mut svc, &ack);

    match &client.state {
        ClientState::Bound { lease } => assert_eq!(lease.address, [192, 0, 2, 40]),
        other => panic!("expected BOUND, got {}", other.name()),
    }
    assert_eq!(runner.reasons(), vec![Reason::Bound]);
    assert!(timers.is_scheduled(client.id, TimerKind::StateBound));
    assert!(!timers.is_scheduled(client.id, TimerKind::StatePanic));
}

#[test]
fn renewal_advances_through_rebind_and_reacquires_before_expiry() {
    let clock = FakeClock::new(AbsTime::from_secs(3_000_000));
    let socket = RecordingSocket::default();
    let runner = ScriptedRunner::ok();
    let mut timers = TimerWheel::new();
    let mut journal = fresh_journal();
    let hw = [2, 0, 0, 0, 0, 8];
    let mut client = Client::new(ClientId(2), "eth0", hw, ClientConfig::default());
    let lease = sample_lease(&clock, [192, 0, 2, 41], 0, 225, 300, false);
    client.state = ClientState::Bound { lease };
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &runner,
        timers: &mut timers,
        journal: &mut journal,
    };

    // T1 fires: BOUND -> RENEWING, unicast DHCPREQUEST sent.
    client.fire_timer(&mut svc, TimerKind::StateBound);
    assert!(matches!(client.state, ClientState::Renewing { .. }));
    let renew_request = last_sent_as(&socket, DhcpMessageType::Request);

    // No reply; T2 fires before the renewal ACK arrives: RENEWING -> REBINDING.
    client.fire_timer(&mut svc, TimerKind::StateBound);
    assert!(matches!(client.state, ClientState::Rebinding { .. }));
    let rebind_request = last_sent_as(&socket, DhcpMessageType::Request);
    assert_ne!(renew_request.xid, rebind_request.xid);

    // The server finally answers the rebind's REQUEST.
    let ack = ack_for(&rebind_request, [192, 0, 2, 41], 600, 300, 525);
    client.handle_packet(&mut svc, &ack);
    match &client.state {
        ClientState::Bound { lease } => assert_eq!(lease.address, [192, 0, 2, 41]),
        other => panic!("expected BOUND, got {}", other.name()),
    }
    assert_eq!(runner.reasons(), vec![Reason::Rebind]);
}

#[test]
fn nak_during_renewing_expires_and_restarts_discovery() {
    let clock = FakeClock::new(AbsTime::from_secs(4_000_000));
    let socket = RecordingSocket::default();
    let runner = ScriptedRunner::ok();
    let mut timers = TimerWheel::new();
    let mut journal = fresh_journal();
    let hw = [2, 0, 0, 0, 0, 9];
    let mut client = Client::new(ClientId(3), "eth0", hw, ClientConfig::default());
    let lease = sample_lease(&clock, [192, 0, 2, 42], 0, 225, 300, false);
    client.state = ClientState::Bound { lease };
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &runner,
        timers: &mut timers,
        journal: &mut journal,
    };

    client.fire_timer(&mut svc, TimerKind::StateBound); // BOUND -> RENEWING
    let request = last_sent_as(&socket, DhcpMessageType::Request);

    let nak = nak_for(&request);
    client.handle_packet(&mut svc, &nak);

    assert!(matches!(client.state, ClientState::Selecting { .. }));
    assert_eq!(runner.reasons(), vec![Reason::Expire, Reason::Preinit]);
    last_sent_as(&socket, DhcpMessageType::Discover);
}

#[test]
fn panic_with_no_offers_falls_back_to_a_stored_lease() {
    let clock = FakeClock::new(AbsTime::from_secs(5_000_000));
    let socket = RecordingSocket::default();
    let runner = ScriptedRunner::ok();
    let mut timers = TimerWheel::new();
    let mut journal = fresh_journal();
    let hw = [2, 0, 0, 0, 0, 10];
    let mut config = ClientConfig::default();
    config.timeout = std::time::Duration::from_secs(60);
    let mut client = Client::new(ClientId(4), "eth0", hw, config);
    client
        .stored_leases
        .push(sample_lease(&clock, [203, 0, 113, 9], 100, 200, 300, true));
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &runner,
        timers: &mut timers,
        journal: &mut journal,
    };

    client.start(&mut svc);
    assert!(matches!(client.state, ClientState::Selecting { .. }));

    client.fire_timer(&mut svc, TimerKind::StatePanic);

    match &client.state {
        ClientState::Bound { lease } => assert_eq!(lease.address, [203, 0, 113, 9]),
        other => panic!("expected BOUND (fallback), got {}", other.name()),
    }
    assert_eq!(runner.reasons(), vec![Reason::Timeout]);
    assert!(client.stored_leases.is_empty());
}

#[test]
fn collision_reported_by_script_declines_and_returns_to_init() {
    let clock = FakeClock::new(AbsTime::from_secs(6_000_000));
    let socket = RecordingSocket::default();
    let mut timers = TimerWheel::new();
    let mut journal = fresh_journal();
    let hw = [2, 0, 0, 0, 0, 11];
    let mut client = Client::new(ClientId(5), "eth0", hw, ClientConfig::default());
    let lease = sample_lease(&clock, [192, 0, 2, 43], 300, 525, 600, false);
    client.state = ClientState::Bound { lease };

    let failing = ScriptedRunner::failing();
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &failing,
        timers: &mut timers,
        journal: &mut journal,
    };
    client.report_script_outcome(&mut svc, ExitOutcome::Exited(1));
    assert!(matches!(client.state, ClientState::Declining { .. }));
    last_sent_as(&socket, DhcpMessageType::Decline);
    assert!(timers.is_scheduled(client.id, TimerKind::Decline));

    client.fire_timer(&mut svc, TimerKind::Decline);
    assert!(matches!(client.state, ClientState::Selecting { .. }));
}

#[test]
fn release_persists_zeroed_lease_and_stops() {
    let clock = FakeClock::new(AbsTime::from_secs(7_000_000));
    let socket = RecordingSocket::default();
    let runner = ScriptedRunner::ok();
    let mut timers = TimerWheel::new();
    let (mut journal, journal_path) = fresh_journal_at_path();
    let hw = [2, 0, 0, 0, 0, 12];
    let mut client = Client::new(ClientId(6), "eth0", hw, ClientConfig::default());
    let lease = sample_lease(&clock, [192, 0, 2, 44], 300, 525, 600, false);
    client.state = ClientState::Bound { lease };
    let mut svc = Services {
        clock: &clock,
        socket: &socket,
        script: &runner,
        timers: &mut timers,
        journal: &mut journal,
    };

    client.do_release(&mut svc);

    assert!(matches!(client.state, ClientState::Stopped));
    assert_eq!(runner.reasons(), vec![Reason::Release]);
    last_sent_as(&socket, DhcpMessageType::Release);
    assert!(!timers.is_scheduled(client.id, TimerKind::StateBound));

    // Reopening the journal recovers the zero-time (expired) lease record
    // release wrote (and fsynced) on the way out.
    drop(journal);
    let (_reopened, recovered) = Journal::open(&journal_path, None::<&Path>).unwrap();
    assert_eq!(recovered.leases.len(), 1);
    assert_eq!(recovered.leases[0].lease.address, [192, 0, 2, 44]);
    assert_eq!(recovered.leases[0].lease.expiry, clock.now());
    let _ = std::fs::remove_file(&journal_path);
}

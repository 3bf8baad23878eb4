//! Client state machine (component F): the per-interface, per-client FSM
//! driving discovery, renewal, rebind, release, and decline.
//!
//! States are a sum type whose payload carries exactly what that state is
//! allowed to hold — a direct completion of the teacher's stubbed
//! `DhcpState` enum (`src/dhcp/client.rs`), which enumerated the same states
//! but left every transition as `{}`. No ARP probing is implemented (see
//! `DESIGN.md`); offer selection stays "first valid offer, preferring a
//! match on `requested_address`".

use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::{AbsTime, Clock};
use crate::journal::Journal;
use crate::lease::ClientLease;
use crate::options::OptionStore;
use crate::packet::{DhcpMessageType, OptionCode, Packet};
use crate::script::{ExitOutcome, LeasePrefix, Reason, ScriptInvocation, ScriptRunner};
use crate::socket::{Destination, Socket};
use crate::timer::{ClientId, TimerKind, TimerWheel};

/// Tunables a `Client` is constructed with; the counterpart of the config
/// file's per-interface/per-client stanza, which this crate does not parse.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub initial_interval: Duration,
    pub backoff_cutoff: Duration,
    pub select_interval: Duration,
    pub reboot_timeout: Duration,
    pub timeout: Duration,
    pub decline_wait_time: Duration,
    pub retry_interval: Duration,
    /// Options an offer must carry to be accepted.
    pub required_options: Vec<OptionCode>,
    /// Options requested from the server and later exported to the script.
    pub parameter_request_list: Vec<OptionCode>,
    /// Media cycled through when no offers arrive; empty means "don't cycle".
    pub media: Vec<String>,
    /// `-1`: exit rather than retry forever.
    pub onetry: bool,
    pub requested_address: Option<[u8; 4]>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            initial_interval: Duration::from_secs(4),
            backoff_cutoff: Duration::from_secs(64),
            select_interval: Duration::from_secs(3),
            reboot_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            decline_wait_time: Duration::from_secs(10),
            retry_interval: Duration::from_secs(300),
            required_options: vec![OptionCode::SubnetMask],
            parameter_request_list: vec![
                OptionCode::SubnetMask,
                OptionCode::Router,
                OptionCode::DomainNameServers,
                OptionCode::DomainName,
            ],
            media: Vec::new(),
            onetry: false,
            requested_address: None,
        }
    }
}

/// Resumption point for a Client suspended pending a paired DHCPv6 client's
/// "go UP" signal. Nothing in this crate ever sets this — there is no
/// DHCPv6 client here — but the spec names it as part of the Client's
/// contract with that collaborator, so the type and [`Client::resume`]
/// exist and are tested in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingResume {
    Reboot,
    Release,
}

/// The FSM's current state, carrying exactly the payload valid in that
/// state. `Requesting`/`Rebooting`/`Renewing`/`Rebinding` carry the lease
/// being pursued or held; `Selecting` carries the in-progress offer list;
/// `Declining` carries the lease being declined; `Init`/`Stopped` carry
/// nothing.
#[derive(Debug, Clone)]
pub enum ClientState {
    Init,
    Selecting { offered: Vec<ClientLease> },
    Requesting { chosen: ClientLease },
    Rebooting { lease: ClientLease },
    Bound { lease: ClientLease },
    Renewing { lease: ClientLease },
    Rebinding { lease: ClientLease },
    Declining { lease: ClientLease },
    Stopped,
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Init => "INIT",
            ClientState::Selecting { .. } => "SELECTING",
            ClientState::Requesting { .. } => "REQUESTING",
            ClientState::Rebooting { .. } => "REBOOTING",
            ClientState::Bound { .. } => "BOUND",
            ClientState::Renewing { .. } => "RENEWING",
            ClientState::Rebinding { .. } => "REBINDING",
            ClientState::Declining { .. } => "DECLINING",
            ClientState::Stopped => "STOPPED",
        }
    }
}

/// Collaborators a `Client` needs for one handler invocation, bundled so the
/// FSM methods take one parameter instead of five. Nothing here is a
/// process-wide global; the `Runtime` that owns a `Client` constructs a
/// fresh `Services` borrow per call.
pub struct Services<'a> {
    pub clock: &'a dyn Clock,
    pub socket: &'a dyn Socket,
    pub script: &'a dyn ScriptRunner,
    pub timers: &'a mut TimerWheel,
    pub journal: &'a mut Journal,
}

/// One protocol instance on an `Interface`.
pub struct Client {
    pub id: ClientId,
    pub interface_name: String,
    pub hw_addr: [u8; 6],
    pub state: ClientState,
    pub xid: u32,
    /// Leases recovered from the journal at startup, or installed via
    /// config; never routinely destroyed (fallback/static leases survive at
    /// the tail, per the invariant in §3).
    pub stored_leases: Vec<ClientLease>,
    pub destination: Destination,
    pub first_sending: AbsTime,
    pub interval: Duration,
    pub medium_cursor: usize,
    pub config: ClientConfig,
    pub last_journal_write: AbsTime,
    pub pending: Option<PendingResume>,
    /// Set when a handler decides the server at this address violated the
    /// protocol (e.g. zero/missing lease time) and should be added to the
    /// owning `Interface`'s reject list. Consumed by whoever owns that
    /// `Interface` (the `Runtime`) after the call returns.
    pub pending_reject: Option<[u8; 4]>,
}

impl Client {
    pub fn new(id: ClientId, interface_name: impl Into<String>, hw_addr: [u8; 6], config: ClientConfig) -> Self {
        Client {
            id,
            interface_name: interface_name.into(),
            hw_addr,
            state: ClientState::Init,
            xid: 0,
            stored_leases: Vec::new(),
            destination: Destination::Broadcast,
            first_sending: AbsTime::ZERO,
            interval: Duration::ZERO,
            medium_cursor: 0,
            config,
            last_journal_write: AbsTime::ZERO,
            pending: None,
            pending_reject: None,
        }
    }

    /// Entry point at startup: REBOOTING if a usable stored lease exists
    /// (`!is_bootp && !expired`), else INIT.
    pub fn start(&mut self, svc: &mut Services) {
        let now = svc.clock.now();
        if let Some(pos) = self
            .stored_leases
            .iter()
            .position(|l| !l.is_bootp && !l.expired(now))
        {
            let lease = self.stored_leases.remove(pos);
            self.enter_rebooting(svc, lease);
        } else {
            self.enter_init(svc);
        }
    }

    /// Resume a Client suspended pending a DHCPv6 "go UP" signal. Untested
    /// by any caller in this crate (there is no DHCPv6 client here to
    /// invoke it) beyond the unit tests in this module.
    pub fn resume(&mut self, svc: &mut Services) {
        match self.pending.take() {
            Some(PendingResume::Reboot) => self.start(svc),
            Some(PendingResume::Release) => self.do_release(svc),
            None => {}
        }
    }

    fn hw_matches(&self, chaddr: &[u8; 16], hlen: u8) -> bool {
        let hlen = hlen as usize;
        hlen == 6 && chaddr[..hlen] == self.hw_addr[..hlen]
    }

    // ---- INIT --------------------------------------------------------

    fn enter_init(&mut self, svc: &mut Services) {
        svc.timers.cancel_all_for(self.id);
        self.xid = svc.clock.random_u32();
        self.destination = Destination::Broadcast;
        self.first_sending = svc.clock.now();
        self.interval = Duration::ZERO;
        self.state = ClientState::Selecting { offered: Vec::new() };
        info!("{}: entering INIT, sending DISCOVER", self.interface_name);
        self.send_discover(svc);
    }

    fn send_discover(&mut self, svc: &mut Services) {
        let mut pkt = Packet::new_request(self.xid, self.hw_addr);
        pkt.set_broadcast(true);
        pkt.options
            .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Discover.into());
        self.save_parameter_request_list(&mut pkt.options);
        if let Some(addr) = self.config.requested_address {
            pkt.options.save_ipv4(OptionCode::RequestedIpAddress, addr);
        }
        let _ = svc.socket.send(Destination::Broadcast, &pkt.encode());
        self.advance_backoff(svc);
        let deadline = self.next_retransmit_deadline(svc);
        svc.timers.schedule(self.id, TimerKind::SendDiscover, deadline);
        let select_at = self.first_sending.saturating_add(self.config.select_interval);
        if !svc.timers.is_scheduled(self.id, TimerKind::StateSelecting) {
            svc.timers.schedule(self.id, TimerKind::StateSelecting, select_at);
        }
        self.schedule_panic(svc);
    }

    fn save_parameter_request_list(&self, options: &mut OptionStore) {
        let codes: Vec<u8> = self.config.parameter_request_list.iter().map(|c| u8::from(*c)).collect();
        options.save_raw(OptionCode::ParameterRequestList, codes);
    }

    // ---- SELECTING -----------------------------------------------------

    /// Handle an inbound DHCPOFFER while SELECTING.
    fn on_offer(&mut self, svc: &mut Services, pkt: &Packet) {
        let ClientState::Selecting { offered } = &mut self.state else {
            return;
        };
        if !self.offer_has_required_options(pkt) {
            debug!("{}: offer missing a required option, ignoring", self.interface_name);
            return;
        }
        let lease = match lease_from_offer(pkt) {
            Some(l) => l,
            None => return,
        };
        if offered.iter().any(|l| l.address == lease.address) {
            return; // duplicate
        }
        if Some(lease.address) == self.config.requested_address {
            offered.insert(0, lease);
        } else {
            offered.push(lease);
        }
    }

    fn offer_has_required_options(&self, pkt: &Packet) -> bool {
        self.config
            .required_options
            .iter()
            .all(|code| pkt.options.contains(*code))
    }

    /// Fired by `TimerKind::StateSelecting`: commit the offer-collection
    /// window.
    fn commit_selection(&mut self, svc: &mut Services) {
        let ClientState::Selecting { offered } = std::mem::replace(&mut self.state, ClientState::Init) else {
            return;
        };
        let mut offered = offered;
        if offered.is_empty() {
            self.state = ClientState::Selecting { offered };
            return; // panic timer, if due, will act on this
        }
        let chosen = offered.remove(0);
        svc.timers.cancel(self.id, TimerKind::SendDiscover);
        svc.timers.cancel(self.id, TimerKind::StateSelecting);

        if chosen.is_bootp {
            let now = svc.clock.now();
            let (renewal, rebind, expiry) = ClientLease::bootp_synthetic_times(now);
            let mut lease = chosen;
            lease.renewal = renewal;
            lease.rebind = rebind;
            lease.expiry = expiry;
            self.bind_lease(svc, lease, Reason::Bound, None);
        } else {
            self.xid = svc.clock.random_u32();
            self.first_sending = svc.clock.now();
            self.interval = Duration::ZERO;
            self.destination = Destination::Broadcast;
            self.state = ClientState::Requesting { chosen };
            self.send_request(svc);
        }
    }

    // ---- REQUESTING / RENEWING / REBINDING / REBOOTING -----------------

    fn enter_rebooting(&mut self, svc: &mut Services, lease: ClientLease) {
        self.xid = svc.clock.random_u32();
        self.first_sending = svc.clock.now();
        self.interval = Duration::ZERO;
        self.destination = Destination::Broadcast;
        self.state = ClientState::Rebooting { lease };
        info!("{}: entering REBOOTING", self.interface_name);
        self.send_request(svc);
    }

    fn current_lease_for_request(&self) -> Option<&ClientLease> {
        match &self.state {
            ClientState::Requesting { chosen } => Some(chosen),
            ClientState::Rebooting { lease } => Some(lease),
            ClientState::Renewing { lease } => Some(lease),
            ClientState::Rebinding { lease } => Some(lease),
            _ => None,
        }
    }

    fn send_request(&mut self, svc: &mut Services) {
        let Some(lease) = self.current_lease_for_request().cloned() else {
            return;
        };
        let mut pkt = Packet::new_request(self.xid, self.hw_addr);
        let ciaddr = match &self.state {
            ClientState::Renewing { .. } | ClientState::Rebinding { .. } => lease.address,
            _ => [0; 4],
        };
        pkt.ciaddr = ciaddr;
        pkt.set_broadcast(matches!(self.destination, Destination::Broadcast) && ciaddr == [0; 4]);
        pkt.options
            .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Request.into());
        self.save_parameter_request_list(&mut pkt.options);
        if matches!(self.state, ClientState::Requesting { .. }) {
            pkt.options.save_ipv4(OptionCode::RequestedIpAddress, lease.address);
            if lease.next_server != [0; 4] {
                pkt.options.save_ipv4(OptionCode::ServerIdentifier, lease.next_server);
            }
        }
        let _ = svc.socket.send(self.destination, &pkt.encode());
        self.advance_backoff(svc);
        let deadline = self.next_retransmit_deadline(svc);
        svc.timers.schedule(self.id, TimerKind::SendRequest, deadline);
        match &self.state {
            ClientState::Rebooting { .. } | ClientState::Requesting { .. } => {
                svc.timers.schedule(
                    self.id,
                    TimerKind::RebootTimeout,
                    self.first_sending.saturating_add(self.config.reboot_timeout),
                );
            }
            _ => {}
        }
        self.schedule_panic(svc);
    }

    /// Handle an inbound DHCPACK while REQUESTING/REBOOTING/RENEWING/REBINDING.
    fn on_ack(&mut self, svc: &mut Services, pkt: &Packet) {
        let old_lease = self.current_lease_for_request().cloned();
        let Some(mut lease) = old_lease.clone() else { return };
        lease.options = pkt.options.clone();
        lease.next_server = pkt.siaddr;
        lease.is_bootp = false;

        let now = svc.clock.now();
        let Some(expiry_raw) = pkt.options.lookup_u32(OptionCode::IpAddressLeaseTime).filter(|v| *v != 0) else {
            warn!("{}: ACK with zero/missing lease time, rejecting offer", self.interface_name);
            let server = pkt.options.lookup_ipv4(OptionCode::ServerIdentifier).unwrap_or(pkt.siaddr);
            if server != [0; 4] {
                self.pending_reject = Some(server);
            }
            // Cancel the outgoing SendRequest/RebootTimeout/StatePanic timers
            // from the preceding send_request — the scheduler will not do it,
            // and a stale StatePanic left over from REQUESTING would otherwise
            // fire unconditionally while we sit in INIT waiting to retry.
            svc.timers.cancel_all_for(self.id);
            // Retry INIT after 500 ms; Duration arithmetic is normalized by
            // construction so there is no overflowing tv_usec to clamp.
            svc.timers
                .schedule(self.id, TimerKind::SendDiscover, now.saturating_add(Duration::from_millis(500)));
            self.state = ClientState::Init;
            return;
        };
        lease.address = if pkt.yiaddr != [0; 4] { pkt.yiaddr } else { lease.address };

        let renewal_raw = pkt.options.lookup_u32(OptionCode::RenewalTime).unwrap_or(expiry_raw / 2 + 1);
        let rebind_raw = pkt.options.lookup_u32(OptionCode::RebindingTime).unwrap_or(expiry_raw * 7 / 8);

        let jitter = svc.clock.rand_below(renewal_raw.max(1));
        let mut randomized_renewal = (3u64 * renewal_raw as u64 + 3) / 4 + (u64::from(jitter) + 3) / 4;
        if randomized_renewal > rebind_raw as u64 {
            randomized_renewal = (rebind_raw as u64) * 3 / 4;
        }

        lease.expiry = now.offset_by(expiry_raw as i64);
        lease.renewal = now.offset_by(randomized_renewal as i64);
        lease.rebind = now.offset_by(rebind_raw as i64);

        let reason = match &self.state {
            ClientState::Renewing { .. } => Reason::Renew,
            ClientState::Rebinding { .. } => Reason::Rebind,
            ClientState::Rebooting { .. } => Reason::Reboot,
            _ => Reason::Bound,
        };
        self.bind_lease(svc, lease, reason, old_lease);
    }

    /// Handle an inbound DHCPNAK while REQUESTING/REBOOTING/RENEWING/REBINDING.
    fn on_nak(&mut self, svc: &mut Services) {
        svc.timers.cancel(self.id, TimerKind::SendRequest);
        svc.timers.cancel(self.id, TimerKind::RebootTimeout);
        svc.timers.cancel(self.id, TimerKind::StatePanic);
        let was_renewal = matches!(self.state, ClientState::Renewing { .. } | ClientState::Rebinding { .. });
        if was_renewal {
            let lease = self.current_lease_for_request().cloned();
            self.run_script(svc, self.script_invocation(Reason::Expire, lease, None));
            self.run_script(svc, ScriptInvocation::new(Reason::Preinit, self.interface_name.clone()));
        }
        self.enter_init(svc);
    }

    fn bind_lease(&mut self, svc: &mut Services, lease: ClientLease, reason: Reason, old_lease: Option<ClientLease>) {
        svc.timers.cancel(self.id, TimerKind::SendRequest);
        svc.timers.cancel(self.id, TimerKind::SendDiscover);
        svc.timers.cancel(self.id, TimerKind::StateSelecting);
        svc.timers.cancel(self.id, TimerKind::RebootTimeout);
        svc.timers.cancel(self.id, TimerKind::StatePanic);

        if let Err(e) = svc.journal.append_lease(&self.interface_name, &lease) {
            warn!("{}: journal append failed: {}", self.interface_name, e);
        } else {
            self.last_journal_write = svc.clock.now();
        }

        self.run_script(svc, self.script_invocation(reason, old_lease, Some(lease.clone())));

        svc.timers.schedule(self.id, TimerKind::StateBound, lease.renewal);
        self.state = ClientState::Bound { lease };
        info!("{}: entering BOUND", self.interface_name);
    }

    fn script_invocation(&self, reason: Reason, old: Option<ClientLease>, new: Option<ClientLease>) -> ScriptInvocation {
        let mut inv = ScriptInvocation::new(reason, self.interface_name.clone());
        let requested = self.config.parameter_request_list.clone();
        if let Some(old) = old {
            inv = inv.with_lease(LeasePrefix::Old, old, requested.clone());
        }
        if let Some(new) = new {
            inv = inv.with_lease(LeasePrefix::New, new, requested);
        }
        inv
    }

    fn run_script(&mut self, svc: &mut Services, invocation: ScriptInvocation) -> Option<ExitOutcome> {
        match svc.script.run(&invocation) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("{}: script invocation failed: {}", self.interface_name, e);
                None
            }
        }
    }

    // ---- BOUND -----------------------------------------------------------

    /// Fired by `TimerKind::StateBound`: T1 at first call (BOUND→RENEWING),
    /// T2 if called again while RENEWING (→REBINDING), full expiry if called
    /// a third time.
    fn fire_state_bound(&mut self, svc: &mut Services) {
        let now = svc.clock.now();
        match std::mem::replace(&mut self.state, ClientState::Init) {
            ClientState::Bound { lease } => {
                if lease.rebind.has_passed(now) {
                    self.enter_rebinding(svc, lease);
                } else if lease.expiry.has_passed(now) {
                    self.expire(svc, lease);
                } else {
                    self.enter_renewing(svc, lease);
                }
            }
            ClientState::Renewing { lease } => {
                if lease.expiry.has_passed(now) {
                    self.expire(svc, lease);
                } else {
                    self.enter_rebinding(svc, lease);
                }
            }
            ClientState::Rebinding { lease } => self.expire(svc, lease),
            other => self.state = other,
        }
    }

    fn enter_renewing(&mut self, svc: &mut Services, lease: ClientLease) {
        self.xid = svc.clock.random_u32();
        self.first_sending = svc.clock.now();
        self.interval = Duration::ZERO;
        self.destination = Destination::Unicast(lease.next_server.into());
        self.state = ClientState::Renewing { lease };
        info!("{}: entering RENEWING", self.interface_name);
        self.send_request(svc);
    }

    fn enter_rebinding(&mut self, svc: &mut Services, lease: ClientLease) {
        svc.timers.cancel(self.id, TimerKind::SendRequest);
        self.xid = svc.clock.random_u32();
        self.first_sending = svc.clock.now();
        self.interval = Duration::ZERO;
        self.destination = Destination::Broadcast;
        self.state = ClientState::Rebinding { lease };
        info!("{}: entering REBINDING", self.interface_name);
        self.send_request(svc);
    }

    fn expire(&mut self, svc: &mut Services, lease: ClientLease) {
        self.run_script(svc, self.script_invocation(Reason::Expire, Some(lease), None));
        self.run_script(svc, ScriptInvocation::new(Reason::Preinit, self.interface_name.clone()));
        self.enter_init(svc);
    }

    // ---- DECLINING ---------------------------------------------------

    /// Called after BOUND/RENEW's script reports an address collision
    /// (nonzero exit): send DECLINE, wait `decline_wait_time`, then INIT.
    fn enter_declining(&mut self, svc: &mut Services, lease: ClientLease) {
        svc.timers.cancel_all_for(self.id);
        self.xid = svc.clock.random_u32();
        let mut pkt = Packet::new_request(self.xid, self.hw_addr);
        pkt.set_broadcast(true);
        pkt.options
            .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Decline.into());
        pkt.options.save_ipv4(OptionCode::RequestedIpAddress, lease.address);
        if lease.next_server != [0; 4] {
            pkt.options.save_ipv4(OptionCode::ServerIdentifier, lease.next_server);
        }
        let _ = svc.socket.send(Destination::Broadcast, &pkt.encode());

        if self.config.onetry {
            self.state = ClientState::Declining { lease };
            svc.timers.cancel_all_for(self.id);
            self.state = ClientState::Stopped;
            return;
        }
        let now = svc.clock.now();
        svc.timers
            .schedule(self.id, TimerKind::Decline, now.saturating_add(self.config.decline_wait_time));
        self.state = ClientState::Declining { lease };
    }

    fn fire_decline_timer(&mut self, svc: &mut Services) {
        if matches!(self.state, ClientState::Declining { .. }) {
            self.enter_init(svc);
        }
    }

    /// Called by the script-invocation caller once it learns BOUND/RENEW's
    /// script exited with a collision status.
    pub fn report_script_outcome(&mut self, svc: &mut Services, outcome: ExitOutcome) {
        if !outcome.is_failure() {
            return;
        }
        let lease = match std::mem::replace(&mut self.state, ClientState::Init) {
            ClientState::Bound { lease } => lease,
            other => {
                self.state = other;
                return;
            }
        };
        self.enter_declining(svc, lease);
    }

    // ---- Panic mode --------------------------------------------------

    fn schedule_panic(&mut self, svc: &mut Services) {
        if !svc.timers.is_scheduled(self.id, TimerKind::StatePanic) {
            svc.timers
                .schedule(self.id, TimerKind::StatePanic, self.first_sending.saturating_add(self.config.timeout));
        }
    }

    /// Fired by `TimerKind::StatePanic`: no acceptable offer within
    /// `timeout`. Walk stored leases trying each with script "TIMEOUT".
    fn fire_panic(&mut self, svc: &mut Services) {
        svc.timers.cancel_all_for(self.id);
        let now = svc.clock.now();
        while let Some(lease) = self.stored_leases.iter().position(|l| !l.expired(now)).map(|i| self.stored_leases.remove(i)) {
            let invocation = self.script_invocation(Reason::Timeout, None, Some(lease.clone()));
            let outcome = self.run_script(svc, invocation);
            if matches!(outcome, Some(o) if !o.is_failure()) {
                if lease.due_for_renewal(now) {
                    self.state = ClientState::Bound { lease };
                    self.fire_state_bound(svc);
                } else {
                    svc.timers.schedule(self.id, TimerKind::StateBound, lease.renewal);
                    self.state = ClientState::Bound { lease };
                }
                return;
            }
        }
        if self.config.onetry {
            self.state = ClientState::Stopped;
            return;
        }
        let half = self.config.retry_interval / 2;
        let span = self.config.retry_interval.as_secs() as u32;
        let jitter = Duration::from_secs(u64::from(svc.clock.rand_below(span.max(1))));
        let delay = half.saturating_add(jitter);
        svc.timers.schedule(self.id, TimerKind::SendDiscover, now.saturating_add(delay));
        self.state = ClientState::Init;
    }

    // ---- Release / shutdown ------------------------------------------

    /// `do_release`: send DHCPRELEASE, persist zeroed-time lease, notify the
    /// script, cancel all timers, transition to STOPPED.
    pub fn do_release(&mut self, svc: &mut Services) {
        let lease = match std::mem::replace(&mut self.state, ClientState::Stopped) {
            ClientState::Bound { lease }
            | ClientState::Renewing { lease }
            | ClientState::Rebinding { lease }
            | ClientState::Rebooting { lease } => Some(lease),
            other => {
                self.state = other;
                None
            }
        };
        svc.timers.cancel_all_for(self.id);
        let Some(mut lease) = lease else {
            self.state = ClientState::Stopped;
            return;
        };

        self.xid = svc.clock.random_u32();
        let mut pkt = Packet::new_request(self.xid, self.hw_addr);
        pkt.ciaddr = lease.address;
        pkt.options
            .save_u8(OptionCode::DhcpMessageType, DhcpMessageType::Release.into());
        if lease.next_server != [0; 4] {
            pkt.options.save_ipv4(OptionCode::ServerIdentifier, lease.next_server);
        }
        let dest = if lease.next_server != [0; 4] {
            Destination::Unicast(lease.next_server.into())
        } else {
            Destination::Broadcast
        };
        let _ = svc.socket.send(dest, &pkt.encode());

        let now = svc.clock.now();
        lease.zero_times(now);
        if let Err(e) = svc.journal.append_lease_synced(&self.interface_name, &lease) {
            warn!("{}: journal sync on release failed: {}", self.interface_name, e);
        }

        self.run_script(svc, self.script_invocation(Reason::Release, Some(lease), None));
        self.state = ClientState::Stopped;
        info!("{}: entering STOPPED", self.interface_name);
    }

    // ---- Dispatch entry points ----------------------------------------

    /// Accept or discard an inbound packet per §4.F's xid/chaddr/state
    /// filter, and dispatch ACK/NAK/OFFER to the matching handler.
    pub fn handle_packet(&mut self, svc: &mut Services, pkt: &Packet) {
        if pkt.xid != self.xid || !self.hw_matches(&pkt.chaddr, pkt.hlen) {
            return;
        }
        match pkt.packet_type() {
            DhcpMessageType::Offer => self.on_offer(svc, pkt),
            DhcpMessageType::Ack | DhcpMessageType::Nak => {
                let acceptable_now = matches!(
                    self.state,
                    ClientState::Rebooting { .. }
                        | ClientState::Requesting { .. }
                        | ClientState::Renewing { .. }
                        | ClientState::Rebinding { .. }
                );
                if !acceptable_now {
                    return;
                }
                if pkt.packet_type() == DhcpMessageType::Ack {
                    self.on_ack(svc, pkt);
                } else {
                    self.on_nak(svc);
                }
            }
            _ => {}
        }
    }

    /// Fire the named timer; called by the dispatcher once a timer's
    /// deadline has passed.
    pub fn fire_timer(&mut self, svc: &mut Services, kind: TimerKind) {
        match kind {
            TimerKind::SendDiscover => self.retransmit_discover_or_init(svc),
            TimerKind::StateSelecting => self.commit_selection(svc),
            TimerKind::SendRequest => self.retransmit_request(svc),
            TimerKind::StateBound => self.fire_state_bound(svc),
            TimerKind::StatePanic => self.fire_panic(svc),
            TimerKind::Decline => self.fire_decline_timer(svc),
            TimerKind::RebootTimeout => self.fire_reboot_timeout(svc),
            TimerKind::Shutdown => {}
        }
    }

    fn retransmit_discover_or_init(&mut self, svc: &mut Services) {
        if matches!(self.state, ClientState::Selecting { .. }) {
            self.maybe_cycle_medium(svc);
            self.send_discover(svc);
        }
    }

    fn retransmit_request(&mut self, svc: &mut Services) {
        if self.current_lease_for_request().is_some() {
            self.send_request(svc);
        }
    }

    fn fire_reboot_timeout(&mut self, svc: &mut Services) {
        if matches!(self.state, ClientState::Rebooting { .. } | ClientState::Requesting { .. }) {
            info!("{}: reboot/request timeout, returning to INIT", self.interface_name);
            self.enter_init(svc);
        }
    }

    fn maybe_cycle_medium(&mut self, svc: &mut Services) {
        let no_offers = matches!(&self.state, ClientState::Selecting { offered } if offered.is_empty());
        if !no_offers || self.config.media.is_empty() {
            return;
        }
        self.medium_cursor = (self.medium_cursor + 1) % self.config.media.len();
        let medium = self.config.media[self.medium_cursor].clone();
        let invocation = ScriptInvocation::new(Reason::Medium, self.interface_name.clone()).with_medium(medium);
        self.run_script(svc, invocation);
    }

    // ---- Backoff -------------------------------------------------------

    /// §4.F retransmission backoff: double (with jitter) on every call,
    /// capped at `backoff_cutoff`, and shrunk so the next fire never
    /// crosses the panic deadline.
    fn advance_backoff(&mut self, svc: &mut Services) {
        if self.interval.is_zero() {
            self.interval = self.config.initial_interval;
        } else {
            let span = (2 * self.interval.as_secs()).max(1) as u32;
            self.interval += Duration::from_secs(u64::from(svc.clock.rand_below(span)));
        }
        if self.interval > self.config.backoff_cutoff {
            let cutoff_secs = self.config.backoff_cutoff.as_secs().max(1) as u32;
            let jitter = svc.clock.rand_below(cutoff_secs);
            self.interval = self.config.backoff_cutoff / 2 + Duration::from_secs(u64::from(jitter));
        }
    }

    fn next_retransmit_deadline(&self, svc: &Services) -> AbsTime {
        let now = svc.clock.now();
        let panic_deadline = self.first_sending.saturating_add(self.config.timeout);
        let mut deadline = now.saturating_add(self.interval);
        if deadline > panic_deadline {
            deadline = panic_deadline;
        }
        // Sub-second jitter to avoid retransmit lockstep with
        // clock-synchronized peers.
        deadline.saturating_add(svc.clock.jitter(Duration::from_millis(999)))
    }
}

/// Build a `ClientLease` out of an OFFER/ACK packet's options. Times are
/// left at their zero default; callers fill them in once known.
fn lease_from_offer(pkt: &Packet) -> Option<ClientLease> {
    let address = pkt.yiaddr;
    if address == [0; 4] {
        return None;
    }
    Some(ClientLease {
        address,
        next_server: pkt.siaddr,
        options: pkt.options.clone(),
        server_name: sname_as_string(pkt),
        boot_file_name: file_as_string(pkt),
        is_bootp: pkt.packet_type() == DhcpMessageType::Bootp,
        is_static: false,
        medium: None,
        renewal: AbsTime::ZERO,
        rebind: AbsTime::ZERO,
        expiry: AbsTime::ZERO,
    })
}

fn sname_as_string(pkt: &Packet) -> Option<String> {
    cstr_field(&pkt.sname)
}

fn file_as_string(pkt: &Packet) -> Option<String> {
    cstr_field(&pkt.file)
}

fn cstr_field(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if end == 0 {
        return None;
    }
    std::str::from_utf8(&bytes[..end]).ok().map(|s| s.to_string())
}

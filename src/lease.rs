//! `ClientLease` data model (§3) and lease-time math (§4.F).

use crate::clock::AbsTime;
use crate::options::OptionStore;

/// A named transport configuration the script may switch to before
/// retrying, e.g. `"media ethernet"`.
pub type Medium = String;

/// One acquired or offered IPv4 lease.
///
/// Invariant: `renewal <= rebind <= expiry` for any committed lease.
#[derive(Debug, Clone)]
pub struct ClientLease {
    pub address: [u8; 4],
    pub next_server: [u8; 4],
    /// Fully parsed option set, retained verbatim for the script runner.
    pub options: OptionStore,
    pub server_name: Option<String>,
    pub boot_file_name: Option<String>,
    /// Came from a BOOTREPLY with no DHCP options; timers are synthetic.
    pub is_bootp: bool,
    /// Originated from the config file, not from a server. Never destroyed
    /// by routine replacement.
    pub is_static: bool,
    pub medium: Option<Medium>,
    pub renewal: AbsTime,
    pub rebind: AbsTime,
    pub expiry: AbsTime,
}

impl ClientLease {
    /// A minimal fallback/static lease, as would be synthesized from config.
    pub fn new_static(address: [u8; 4], options: OptionStore) -> Self {
        ClientLease {
            address,
            next_server: [0; 4],
            options,
            server_name: None,
            boot_file_name: None,
            is_bootp: false,
            is_static: true,
            medium: None,
            renewal: AbsTime::MAX,
            rebind: AbsTime::MAX,
            expiry: AbsTime::MAX,
        }
    }

    pub fn expired(&self, now: AbsTime) -> bool {
        self.expiry.has_passed(now)
    }

    pub fn due_for_renewal(&self, now: AbsTime) -> bool {
        self.renewal.has_passed(now)
    }

    /// Invariant check: `renewal <= rebind <= expiry`.
    pub fn times_well_ordered(&self) -> bool {
        self.renewal <= self.rebind && self.rebind <= self.expiry
    }

    /// Zero every time field, as `do_release` does before the lease is
    /// persisted with the release record.
    pub fn zero_times(&mut self, now: AbsTime) {
        self.renewal = now;
        self.rebind = now;
        self.expiry = now;
    }

    /// Synthetic timers for a BOOTP (non-DHCP) reply, per §4.F SELECTING:
    /// `+8000` renewal, `+10000` rebind, `+12000` expiry.
    pub fn bootp_synthetic_times(now: AbsTime) -> (AbsTime, AbsTime, AbsTime) {
        (
            now.offset_by(8000),
            now.offset_by(10000),
            now.offset_by(12000),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bootp_synthetic_times_are_well_ordered() {
        let now = AbsTime::from_secs(1000);
        let (renewal, rebind, expiry) = ClientLease::bootp_synthetic_times(now);
        let lease = ClientLease {
            renewal,
            rebind,
            expiry,
            ..ClientLease::new_static([0; 4], OptionStore::new())
        };
        assert!(lease.times_well_ordered());
    }

    #[test]
    fn zero_times_collapses_all_three_fields() {
        let mut lease = ClientLease::new_static([192, 0, 2, 1], OptionStore::new());
        let now = AbsTime::from_secs(500);
        lease.zero_times(now);
        assert_eq!(lease.renewal, now);
        assert_eq!(lease.rebind, now);
        assert_eq!(lease.expiry, now);
    }
}

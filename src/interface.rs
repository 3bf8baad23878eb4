//! Network-device handle (component of §3's data model) and the
//! per-interface reject list for servers the client has chosen to ignore.
//!
//! Interface *discovery* (raw-socket/BPF setup, enumerating real devices) is
//! out of scope (§1); this module only models the handle such discovery
//! would hand back plus the bookkeeping the state machine needs from it.

use bitflags::bitflags;

use crate::client::Client;

bitflags! {
    /// Mirrors the C source's interface flag bits; grounded on the
    /// teacher's sibling network crate (`kpio-network`), which depends on
    /// `bitflags` for an analogous device-flag set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceFlags: u8 {
        /// Named on the command line.
        const REQUESTED = 0b001;
        /// Brought up automatically without being named.
        const AUTOMATIC = 0b010;
        /// Currently active (has clients attached and running).
        const RUNNING   = 0b100;
    }
}

/// One network device and the Clients attached to it.
pub struct Interface {
    pub name: String,
    /// First byte is the hardware type (1 = Ethernet); remainder is the
    /// hardware address proper.
    pub hw_address: Vec<u8>,
    pub flags: InterfaceFlags,
    /// Known but inactive.
    pub dummy_clients: Vec<Client>,
    /// Actively running the state machine.
    pub live_clients: Vec<Client>,
    /// Servers (by address) this interface will silently drop packets from,
    /// each paired with the mask it was recorded under.
    reject_list: Vec<([u8; 4], [u8; 4])>,
}

impl Interface {
    pub fn new(name: impl Into<String>, hw_address: Vec<u8>, flags: InterfaceFlags) -> Self {
        Interface {
            name: name.into(),
            hw_address,
            flags,
            dummy_clients: Vec::new(),
            live_clients: Vec::new(),
            reject_list: Vec::new(),
        }
    }

    /// Move a dummy client to the live list by id, returning whether one was found.
    pub fn activate(&mut self, id: crate::timer::ClientId) -> bool {
        if let Some(pos) = self.dummy_clients.iter().position(|c| c.id == id) {
            let client = self.dummy_clients.remove(pos);
            self.live_clients.push(client);
            true
        } else {
            false
        }
    }

    /// Add a server to the reject list; subsequent packets whose source
    /// matches `addr & mask == entry & mask` are dropped before reaching a
    /// Client.
    pub fn reject(&mut self, addr: [u8; 4], mask: [u8; 4]) {
        if !self.is_rejected(addr) {
            self.reject_list.push((addr, mask));
        }
    }

    pub fn is_rejected(&self, addr: [u8; 4]) -> bool {
        self.reject_list.iter().any(|(entry, mask)| {
            (0..4).all(|i| addr[i] & mask[i] == entry[i] & mask[i])
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reject_list_matches_on_masked_address() {
        let mut iface = Interface::new("eth0", vec![1, 0, 0, 0, 0, 0, 1], InterfaceFlags::REQUESTED);
        iface.reject([192, 0, 2, 1], [255, 255, 255, 0]);
        assert!(iface.is_rejected([192, 0, 2, 200]));
        assert!(!iface.is_rejected([192, 0, 3, 1]));
    }

    #[test]
    fn flags_combine_with_bitor() {
        let flags = InterfaceFlags::REQUESTED | InterfaceFlags::RUNNING;
        assert!(flags.contains(InterfaceFlags::REQUESTED));
        assert!(!flags.contains(InterfaceFlags::AUTOMATIC));
    }
}

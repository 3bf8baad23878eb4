//! DUID (DHCP Unique Identifier, RFC 3315) generation and the journal's
//! `default-duid` record.
//!
//! Out of scope: this crate's IPv4 client never transmits a DUID on the
//! wire (that's the DHCPv6 path). It still generates and persists one,
//! because the lease journal is shared with a DHCPv6 client and must carry
//! a stable `default-duid` line across restarts.

use crate::clock::AbsTime;

/// Link-layer type for DUID-LL/DUID-LLT; 1 is Ethernet, matching `htype`.
const LINK_LAYER_ETHERNET: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duid {
    /// Link-layer address plus the time the DUID was generated.
    Llt { hw_type: u16, time: u32, link_layer: Vec<u8> },
    /// Link-layer address only.
    Ll { hw_type: u16, link_layer: Vec<u8> },
}

impl Duid {
    /// Generate a DUID-LLT from a hardware address, timestamped `now`.
    /// Per RFC 3315 the time field is seconds since 2000-01-01, not the
    /// Unix epoch.
    pub fn new_llt(hw_addr: &[u8], now: AbsTime) -> Self {
        const RFC3315_EPOCH_OFFSET: u64 = 946_684_800; // 2000-01-01 in Unix time
        let time = now.as_secs().saturating_sub(RFC3315_EPOCH_OFFSET) as u32;
        Duid::Llt {
            hw_type: LINK_LAYER_ETHERNET,
            time,
            link_layer: hw_addr.to_vec(),
        }
    }

    pub fn new_ll(hw_addr: &[u8]) -> Self {
        Duid::Ll {
            hw_type: LINK_LAYER_ETHERNET,
            link_layer: hw_addr.to_vec(),
        }
    }

    /// Encode to the byte form the journal stores as a hex string.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Duid::Llt { hw_type, time, link_layer } => {
                let mut out = vec![0, 1]; // DUID type 1 = LLT
                out.extend_from_slice(&hw_type.to_be_bytes());
                out.extend_from_slice(&time.to_be_bytes());
                out.extend_from_slice(link_layer);
                out
            }
            Duid::Ll { hw_type, link_layer } => {
                let mut out = vec![0, 3]; // DUID type 3 = LL
                out.extend_from_slice(&hw_type.to_be_bytes());
                out.extend_from_slice(link_layer);
                out
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let kind = u16::from_be_bytes([bytes[0], bytes[1]]);
        let hw_type = u16::from_be_bytes([bytes[2], bytes[3]]);
        match kind {
            1 if bytes.len() >= 8 => Some(Duid::Llt {
                hw_type,
                time: u32::from_be_bytes(bytes[4..8].try_into().ok()?),
                link_layer: bytes[8..].to_vec(),
            }),
            3 => Some(Duid::Ll {
                hw_type,
                link_layer: bytes[4..].to_vec(),
            }),
            _ => None,
        }
    }
}

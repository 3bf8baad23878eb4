//! BOOTP/DHCP wire codec (component A).
//!
//! Encodes outgoing datagrams and decodes incoming ones into a [`Packet`]
//! with a parsed [`crate::options::OptionStore`]. Field layout and the
//! option-code catalog are carried over from the teacher's
//! `dhcp::protocol` module (`DhcpFixedPayload`, `DhcpOperation`,
//! `DHCPMessageKind`, `DHCPOptionKind`); the teacher's `#[repr(C, packed)]`
//! + transmute approach is replaced with explicit field-at-a-time
//! (de)serialization since the options area is variable-length.

use crate::enum_with_unknown;
use crate::error::CodecError;
use crate::options::OptionStore;

/// Minimum length of an outgoing BOOTP datagram; shorter packets are padded.
pub const BOOTP_MIN_LEN: usize = 300;

/// Magic cookie preceding the options area.
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const FIXED_HEADER_LEN: usize = 236; // op..file, before the cookie
const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;

/// `op`: legacy BOOTP message op code. Still has to match the message type
/// even though in DHCP there is only one valid combination of the two.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootpOp {
    /// Client to server.
    BootRequest = 1,
    /// Server to client.
    BootReply = 2,
}

impl TryFrom<u8> for BootpOp {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BootpOp::BootRequest),
            2 => Ok(BootpOp::BootReply),
            other => Err(CodecError::TruncatedOption {
                code: other,
                need: 0,
                have: 0,
            }),
        }
    }
}

enum_with_unknown! {
    /// The DHCP message-type option value (`option 53`). `0` means "no such
    /// option was present", i.e. a plain BOOTP reply.
    pub enum DhcpMessageType(u8) {
        /// No message-type option: a BOOTP reply.
        Bootp = 0,
        Discover = 1,
        Offer = 2,
        Request = 3,
        Decline = 4,
        Ack = 5,
        Nak = 6,
        Release = 7,
        Inform = 8,
        ForceRenew = 9,
        LeaseQuery = 10,
        LeaseUnassigned = 11,
        LeaseUnknown = 12,
        LeaseActive = 13,
        BulkLeaseQuery = 14,
        LeaseQueryDone = 15,
        ActiveLeaseQuery = 16,
        LeaseQueryStatus = 17,
        Tls = 18,
    }
}

enum_with_unknown! {
    /// Option type codes for the options area. Most of these are never
    /// evaluated by this crate; they're kept so the parameter-request list
    /// and the option store can name them.
    pub enum OptionCode(u8) {
        Pad = 0,
        SubnetMask = 1,
        TimeOffset = 2,
        Router = 3,
        TimeServer = 4,
        NameServer = 5,
        DomainNameServers = 6,
        LogServer = 7,
        CookieServer = 8,
        LprServer = 9,
        ImpressServer = 10,
        ResourceLocationServer = 11,
        HostName = 12,
        BootFileSize = 13,
        MeritDumpFileSize = 14,
        DomainName = 15,
        SwapServer = 16,
        RootPath = 17,
        ExtensionsPath = 18,
        IpForwardEnable = 19,
        SourceRoutingEnable = 20,
        PolicyFilter = 21,
        MaximumDatagramSize = 22,
        DefaultIpTtl = 23,
        PathMtuTimeout = 24,
        PathMtuPlateau = 25,
        InterfaceMtu = 26,
        AllSubnetsLocal = 27,
        BroadcastAddress = 28,
        PerformMaskDiscovery = 29,
        MaskSupplier = 30,
        PerformRouterDiscovery = 31,
        RouterSolicitationAddress = 32,
        StaticRoute = 33,
        TrailerEncapsulation = 34,
        ArpCacheTimeout = 35,
        EthernetEncapsulation = 36,
        TcpDefaultTtl = 37,
        TcpKeepAliveInterval = 38,
        TcpKeepAliveGarbage = 39,
        NetworkInfoServiceDomain = 40,
        NetworkInfoServers = 41,
        NtpServers = 42,
        VendorInfo = 43,
        NetBiosNameServer = 44,
        NetBiosDistributionServer = 45,
        NetBiosNodeType = 46,
        NetBiosScope = 47,
        XWindowFontServer = 48,
        XWindowDisplayMgr = 49,
        RequestedIpAddress = 50,
        IpAddressLeaseTime = 51,
        OptionOverload = 52,
        DhcpMessageType = 53,
        ServerIdentifier = 54,
        ParameterRequestList = 55,
        Message = 56,
        MaxDhcpMessageSize = 57,
        RenewalTime = 58,
        RebindingTime = 59,
        VendorClassId = 60,
        ClientId = 61,
        TftpServerName = 62,
        BootFileName = 63,
        NisPlusDomain = 64,
        NisPlusServers = 65,
        MobileIpHomeAgent = 68,
        SmtpServer = 69,
        Pop3Server = 70,
        NntpServer = 71,
        DefaultWwwServer = 72,
        DefaultFingerServer = 73,
        DefaultIrcServer = 74,
        StreetTalkServer = 75,
        StreetTalkDirectoryServer = 76,
        RelayAgentInfo = 82,
        NdsServers = 85,
        NdsContext = 86,
        TimeZonePosix = 100,
        TimeZoneTz = 101,
        DhcpCaptivePortal = 114,
        DomainSearch = 119,
        ClasslessStaticRoute = 121,
        ConfigFile = 209,
        PathPrefix = 210,
        RebootTime = 211,
        End = 255,
    }
}

/// A decoded or to-be-encoded BOOTP/DHCP datagram.
#[derive(Debug, Clone)]
pub struct Packet {
    pub op: BootpOp,
    /// Hardware type; 1 for Ethernet.
    pub htype: u8,
    /// Hardware address length; 6 for a standard MAC address.
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    /// `BROADCAST` flag is bit 15 of `flags`.
    pub flags: u16,
    pub ciaddr: [u8; 4],
    pub yiaddr: [u8; 4],
    pub siaddr: [u8; 4],
    pub giaddr: [u8; 4],
    /// Client hardware address; only the first `hlen` bytes are meaningful.
    pub chaddr: [u8; CHADDR_LEN],
    pub sname: [u8; SNAME_LEN],
    pub file: [u8; FILE_LEN],
    pub options: OptionStore,
}

const BROADCAST_FLAG: u16 = 0x8000;

impl Packet {
    /// A freshly zeroed request packet with `htype`/`hlen` set for Ethernet.
    pub fn new_request(xid: u32, chaddr: [u8; 6]) -> Self {
        let mut full_chaddr = [0u8; CHADDR_LEN];
        full_chaddr[..6].copy_from_slice(&chaddr);
        Packet {
            op: BootpOp::BootRequest,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: [0; 4],
            yiaddr: [0; 4],
            siaddr: [0; 4],
            giaddr: [0; 4],
            chaddr: full_chaddr,
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: OptionStore::new(),
        }
    }

    /// Set or clear the BROADCAST flag (set when the interface cannot yet
    /// receive unicast, i.e. before it has been configured).
    pub fn set_broadcast(&mut self, broadcast: bool) {
        if broadcast {
            self.flags |= BROADCAST_FLAG;
        } else {
            self.flags &= !BROADCAST_FLAG;
        }
    }

    pub fn broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }

    /// The DHCP message-type option if present, else [`DhcpMessageType::Bootp`].
    pub fn packet_type(&self) -> DhcpMessageType {
        self.options
            .lookup_u8(OptionCode::DhcpMessageType)
            .map(DhcpMessageType::from)
            .unwrap_or(DhcpMessageType::Bootp)
    }

    /// Encode to a byte buffer, padded to at least [`BOOTP_MIN_LEN`].
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BOOTP_MIN_LEN);
        buf.push(self.op as u8);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr);
        buf.extend_from_slice(&self.yiaddr);
        buf.extend_from_slice(&self.siaddr);
        buf.extend_from_slice(&self.giaddr);
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        debug_assert_eq!(buf.len(), FIXED_HEADER_LEN);
        buf.extend_from_slice(&MAGIC_COOKIE);
        self.options.encode_into(&mut buf);
        buf.push(OptionCode::End.into());
        while buf.len() < BOOTP_MIN_LEN {
            buf.push(OptionCode::Pad.into());
        }
        buf
    }

    /// Decode a raw datagram, honoring the option-overload byte (which
    /// redirects option parsing into `sname` and/or `file`).
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < BOOTP_MIN_LEN {
            return Err(CodecError::TooShort(bytes.len()));
        }
        let op = BootpOp::try_from(bytes[0])?;
        let htype = bytes[1];
        let hlen = bytes[2];
        let hops = bytes[3];
        let xid = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let secs = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
        let flags = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
        let ciaddr = bytes[12..16].try_into().unwrap();
        let yiaddr = bytes[16..20].try_into().unwrap();
        let siaddr = bytes[20..24].try_into().unwrap();
        let giaddr = bytes[24..28].try_into().unwrap();
        let chaddr: [u8; CHADDR_LEN] = bytes[28..28 + CHADDR_LEN].try_into().unwrap();
        let sname_off = 28 + CHADDR_LEN;
        let sname: [u8; SNAME_LEN] = bytes[sname_off..sname_off + SNAME_LEN].try_into().unwrap();
        let file_off = sname_off + SNAME_LEN;
        let file: [u8; FILE_LEN] = bytes[file_off..file_off + FILE_LEN].try_into().unwrap();
        let cookie_off = file_off + FILE_LEN;

        if bytes.get(cookie_off..cookie_off + 4) != Some(&MAGIC_COOKIE[..]) {
            return Err(CodecError::MissingCookie);
        }

        let mut options = OptionStore::new();
        let mut overload = 0u8;
        options.parse_into(&bytes[cookie_off + 4..], &mut overload)?;
        // Option-overload byte (option 52) redirects further option parsing
        // into `sname` and/or `file`, in that order.
        if overload & 0b01 != 0 {
            options.parse_into(&file, &mut 0)?;
        }
        if overload & 0b10 != 0 {
            options.parse_into(&sname, &mut 0)?;
        }

        Ok(Packet {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }
}

/// Client and server UDP ports DHCP runs over.
pub const DHCP_CLIENT_PORT: u16 = CLIENT_PORT;
pub const DHCP_SERVER_PORT: u16 = SERVER_PORT;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_discover() {
        let mut pkt = Packet::new_request(0xdead_beef, [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        pkt.set_broadcast(true);
        pkt.options
            .save_raw(OptionCode::DhcpMessageType, vec![DhcpMessageType::Discover.into()]);
        let bytes = pkt.encode();
        assert!(bytes.len() >= BOOTP_MIN_LEN);

        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.xid, 0xdead_beef);
        assert!(decoded.broadcast());
        assert_eq!(decoded.packet_type(), DhcpMessageType::Discover);
    }

    #[test]
    fn rejects_short_packets() {
        assert!(matches!(Packet::decode(&[0u8; 10]), Err(CodecError::TooShort(10))));
    }

    #[test]
    fn rejects_missing_cookie() {
        let buf = vec![0u8; BOOTP_MIN_LEN];
        assert!(matches!(Packet::decode(&buf), Err(CodecError::MissingCookie)));
    }

    #[test]
    fn bootp_reply_has_zero_message_type() {
        let mut pkt = Packet::new_request(1, [0; 6]);
        pkt.op = BootpOp::BootReply;
        let bytes = pkt.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_type(), DhcpMessageType::Bootp);
    }
}

//! Protocol layer location and header access.
//!
//! Every delivered packet carries a [`LayerTable`]: a fixed-size array of
//! `(protocol, offset, header length)` entries filled in by [`dissect`]. The
//! table is computed once per packet without touching the heap, and a
//! [`HeaderView`] probe is a lookup in it.
//!
//! The per-protocol modules hold zero-copy header structs that borrow the
//! packet bytes. They are what a bound view hands out for field reads.

pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;
mod view;

pub use view::{
    EthernetView, HeaderView, Icmp4View, Icmp6View, Ip4View, Ip6View, Layer, TcpView, UdpView,
    VlanView,
};

use std::fmt;
use thiserror::Error;

/// Maximum number of entries a [`LayerTable`] records.
pub const MAX_LAYERS: usize = 8;

/// Maximum stacked 802.1Q / 802.1ad tags followed during dissection.
const MAX_VLAN_TAGS: usize = 2;

/// Identifies a protocol layer in the flat layer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Ethernet,
    Vlan,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
    Payload,
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolId::Ethernet => "Ethernet",
            ProtocolId::Vlan => "802.1Q",
            ProtocolId::Ipv4 => "IPv4",
            ProtocolId::Ipv6 => "IPv6",
            ProtocolId::Tcp => "TCP",
            ProtocolId::Udp => "UDP",
            ProtocolId::Icmpv4 => "ICMP",
            ProtocolId::Icmpv6 => "ICMPv6",
            ProtocolId::Payload => "Payload",
        };
        f.write_str(name)
    }
}

/// EtherType values followed by the dissector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Arp,
    Vlan,
    QinQ,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86DD => EtherType::Ipv6,
            0x0806 => EtherType::Arp,
            0x8100 => EtherType::Vlan,
            0x88A8 => EtherType::QinQ,
            other => EtherType::Unknown(other),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Arp => write!(f, "ARP"),
            EtherType::Vlan => write!(f, "802.1Q VLAN"),
            EtherType::QinQ => write!(f, "802.1ad QinQ"),
            EtherType::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}

/// IP protocol numbers the dissector knows how to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Unknown(u8),
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Unknown(other),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Icmpv6 => write!(f, "ICMPv6"),
            IpProtocol::Unknown(v) => write!(f, "Proto({})", v),
        }
    }
}

/// Header parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("packet too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
}

/// One located layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerEntry {
    pub id: ProtocolId,
    /// Byte offset of the header from the start of the frame.
    pub offset: u32,
    /// Header length in bytes (for `Payload`, the payload length).
    pub len: u32,
}

const EMPTY_ENTRY: LayerEntry = LayerEntry {
    id: ProtocolId::Payload,
    offset: 0,
    len: 0,
};

/// Flat, allocation-free table of the layers found in one frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LayerTable {
    entries: [LayerEntry; MAX_LAYERS],
    count: u8,
}

impl LayerTable {
    pub const fn empty() -> Self {
        LayerTable {
            entries: [EMPTY_ENTRY; MAX_LAYERS],
            count: 0,
        }
    }

    fn push(&mut self, id: ProtocolId, offset: usize, len: usize) -> bool {
        let idx = self.count as usize;
        if idx == MAX_LAYERS {
            return false;
        }
        self.entries[idx] = LayerEntry {
            id,
            offset: offset as u32,
            len: len as u32,
        };
        self.count += 1;
        true
    }

    /// First entry for `id`, outermost first.
    #[inline]
    pub fn find(&self, id: ProtocolId) -> Option<LayerEntry> {
        self.nth(id, 0)
    }

    /// The `depth`-th entry for `id` (0 = outermost), e.g. the inner tag of a
    /// QinQ frame.
    pub fn nth(&self, id: ProtocolId, depth: usize) -> Option<LayerEntry> {
        self.as_slice().iter().filter(|e| e.id == id).nth(depth).copied()
    }

    #[inline]
    pub fn contains(&self, id: ProtocolId) -> bool {
        self.find(id).is_some()
    }

    #[inline]
    pub fn as_slice(&self) -> &[LayerEntry] {
        &self.entries[..self.count as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for LayerTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for LayerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Locate the protocol layers of an Ethernet frame.
///
/// Stops at the first layer that cannot be parsed; everything found up to
/// that point stays in the table. Non-first IPv4 fragments get no transport
/// entry since their bytes are not a transport header.
pub fn dissect(data: &[u8]) -> LayerTable {
    let mut table = LayerTable::empty();

    let Ok(eth) = ethernet::EthernetHeader::parse(data) else {
        return table;
    };
    table.push(ProtocolId::Ethernet, 0, ethernet::ETH_HEADER_LEN);
    let mut offset = ethernet::ETH_HEADER_LEN;
    let mut ether_type = eth.ether_type();

    let mut tags = 0;
    while matches!(ether_type, EtherType::Vlan | EtherType::QinQ) && tags < MAX_VLAN_TAGS {
        let Ok(tag) = ethernet::VlanTag::parse(&data[offset..]) else {
            return table;
        };
        table.push(ProtocolId::Vlan, offset, ethernet::VLAN_TAG_LEN);
        ether_type = tag.ether_type();
        offset += ethernet::VLAN_TAG_LEN;
        tags += 1;
    }

    let (l4_offset, l4_end, proto) = match ether_type {
        EtherType::Ipv4 => {
            let Ok(ip) = ipv4::Ipv4Header::parse(&data[offset..]) else {
                return table;
            };
            table.push(ProtocolId::Ipv4, offset, ip.header_len());
            if ip.fragment_offset() != 0 {
                return table;
            }
            let start = offset + ip.header_len();
            (start, start + ip.payload().len(), ip.protocol())
        }
        EtherType::Ipv6 => {
            let Ok(ip) = ipv6::Ipv6Header::parse(&data[offset..]) else {
                return table;
            };
            table.push(ProtocolId::Ipv6, offset, ipv6::IPV6_HEADER_LEN);
            let end = offset + ipv6::IPV6_HEADER_LEN + ip.payload().len();
            match ip.upper_layer() {
                Some((ext_len, proto)) => {
                    (offset + ipv6::IPV6_HEADER_LEN + ext_len, end, proto)
                }
                None => return table,
            }
        }
        _ => return push_payload(table, data, offset, data.len()),
    };

    if l4_offset > l4_end {
        return table;
    }
    let l4 = &data[l4_offset..l4_end];
    let header_len = match proto {
        IpProtocol::Tcp => tcp::TcpHeader::parse(l4)
            .ok()
            .map(|h| (ProtocolId::Tcp, h.header_len())),
        IpProtocol::Udp => udp::UdpHeader::parse(l4)
            .ok()
            .map(|_| (ProtocolId::Udp, udp::UDP_HEADER_LEN)),
        IpProtocol::Icmp => icmp::IcmpHeader::parse(l4)
            .ok()
            .map(|_| (ProtocolId::Icmpv4, icmp::ICMP_HEADER_LEN)),
        IpProtocol::Icmpv6 => icmp::IcmpHeader::parse(l4)
            .ok()
            .map(|_| (ProtocolId::Icmpv6, icmp::ICMP_HEADER_LEN)),
        IpProtocol::Unknown(_) => None,
    };

    match header_len {
        Some((id, len)) => {
            table.push(id, l4_offset, len);
            push_payload(table, data, l4_offset + len, l4_end)
        }
        None => push_payload(table, data, l4_offset, l4_end),
    }
}

fn push_payload(mut table: LayerTable, data: &[u8], start: usize, end: usize) -> LayerTable {
    let end = end.min(data.len());
    if start < end {
        table.push(ProtocolId::Payload, start, end - start);
    }
    table
}

//! Zero-copy IPv6 fixed header (RFC 8200).

use super::{IpProtocol, ParseError};
use std::fmt;
use std::net::Ipv6Addr;

/// IPv6 fixed header length.
pub const IPV6_HEADER_LEN: usize = 40;

/// Extension headers skipped when locating the upper layer.
const HOP_BY_HOP: u8 = 0;
const ROUTING: u8 = 43;
const FRAGMENT: u8 = 44;
const DEST_OPTIONS: u8 = 60;

/// Upper bound on extension headers walked per packet.
const MAX_EXTENSIONS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct Ipv6Header<'a> {
    data: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < IPV6_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: IPV6_HEADER_LEN,
                actual: data.len(),
            });
        }
        if data[0] >> 4 != 6 {
            return Err(ParseError::InvalidHeader("IPv6 version field is not 6"));
        }
        Ok(Ipv6Header { data })
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        (self.data[0] << 4) | (self.data[1] >> 4)
    }

    #[inline]
    pub fn flow_label(&self) -> u32 {
        u32::from_be_bytes([0, self.data[1] & 0x0F, self.data[2], self.data[3]])
    }

    #[inline]
    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// Next header of the fixed header (may be an extension header).
    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        IpProtocol::from(self.data[6])
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.data[7]
    }

    #[inline]
    pub fn src_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[8..24]);
        Ipv6Addr::from(octets)
    }

    #[inline]
    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[24..40]);
        Ipv6Addr::from(octets)
    }

    /// Payload after the fixed header, clamped to `payload_length`.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let declared = self.payload_length() as usize;
        let available = self.data.len() - IPV6_HEADER_LEN;
        &self.data[IPV6_HEADER_LEN..IPV6_HEADER_LEN + declared.min(available)]
    }

    /// Walk extension headers and return `(extension bytes, upper protocol)`.
    ///
    /// Returns `None` when an extension header is truncated, the chain is
    /// longer than we follow, or the packet is a non-first fragment.
    pub fn upper_layer(&self) -> Option<(usize, IpProtocol)> {
        let payload = self.payload();
        let mut next = self.data[6];
        let mut offset = 0usize;
        for _ in 0..MAX_EXTENSIONS {
            match next {
                HOP_BY_HOP | ROUTING | DEST_OPTIONS => {
                    let ext = payload.get(offset..offset + 2)?;
                    let len = (ext[1] as usize + 1) * 8;
                    payload.get(offset..offset + len)?;
                    next = ext[0];
                    offset += len;
                }
                FRAGMENT => {
                    let ext = payload.get(offset..offset + 8)?;
                    let frag_offset = u16::from_be_bytes([ext[2], ext[3]]) >> 3;
                    if frag_offset != 0 {
                        return None;
                    }
                    next = ext[0];
                    offset += 8;
                }
                proto => return Some((offset, IpProtocol::from(proto))),
            }
        }
        None
    }
}

impl fmt::Display for Ipv6Header<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} next_hdr={} hop_limit={} len={}",
            self.src_addr(),
            self.dst_addr(),
            self.next_header(),
            self.hop_limit(),
            self.payload_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ipv6(next_header: u8, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 40];
        pkt[0] = 0x60;
        pkt[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        pkt[6] = next_header;
        pkt[7] = 64;
        pkt[23] = 1; // ::1
        pkt[39] = 2; // ::2
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn parse_fixed_header() {
        let pkt = make_ipv6(6, &[0u8; 20]);
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        assert_eq!(hdr.next_header(), IpProtocol::Tcp);
        assert_eq!(hdr.src_addr(), Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1));
        assert_eq!(hdr.payload().len(), 20);
        assert_eq!(hdr.upper_layer(), Some((0, IpProtocol::Tcp)));
    }

    #[test]
    fn skips_hop_by_hop_extension() {
        let mut payload = vec![17, 0, 0, 0, 0, 0, 0, 0]; // next=UDP, len=(0+1)*8
        payload.extend_from_slice(&[0u8; 8]);
        let pkt = make_ipv6(HOP_BY_HOP, &payload);
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        assert_eq!(hdr.upper_layer(), Some((8, IpProtocol::Udp)));
    }

    #[test]
    fn truncated_extension_has_no_upper_layer() {
        let pkt = make_ipv6(ROUTING, &[6]);
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        assert_eq!(hdr.upper_layer(), None);
    }

    #[test]
    fn reject_short_ipv6() {
        assert!(Ipv6Header::parse(&[0x60; 39]).is_err());
    }
}

//! Zero-copy UDP header (RFC 768).

use super::ParseError;
use std::fmt;

/// UDP header is always 8 bytes.
pub const UDP_HEADER_LEN: usize = 8;

/// UDP header borrowed from a frame.
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader<'a> {
    data: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    /// Wrap `data`, which starts at the UDP header.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < UDP_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: UDP_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(UdpHeader { data })
    }

    /// Source port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// Destination port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// Datagram length including the header.
    #[inline]
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// Checksum as carried; zero means none was computed over IPv4.
    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    /// Payload, clamped to the declared length.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let declared = (self.length() as usize).saturating_sub(UDP_HEADER_LEN);
        let available = self.data.len() - UDP_HEADER_LEN;
        &self.data[UDP_HEADER_LEN..UDP_HEADER_LEN + declared.min(available)]
    }
}

impl fmt::Display for UdpHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} -> :{} len={}", self.src_port(), self.dst_port(), self.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dns_response() {
        let mut pkt = vec![0x00, 0x35, 0xC0, 0x00, 0x00, 0x1C, 0x00, 0x00];
        pkt.extend_from_slice(&[0xAB; 24]);
        let hdr = UdpHeader::parse(&pkt).unwrap();
        assert_eq!(hdr.src_port(), 53);
        assert_eq!(hdr.dst_port(), 49152);
        assert_eq!(hdr.payload().len(), 20);
    }

    #[test]
    fn reject_short_udp() {
        assert!(UdpHeader::parse(&[0u8; 7]).is_err());
    }
}

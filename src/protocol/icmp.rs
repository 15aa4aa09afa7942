//! Zero-copy ICMP / ICMPv6 header. Both share the type/code/checksum prefix.

use super::ParseError;
use std::fmt;

pub const ICMP_HEADER_LEN: usize = 8;

/// ICMP or ICMPv6 header borrowed from a frame.
#[derive(Debug, Clone, Copy)]
pub struct IcmpHeader<'a> {
    data: &'a [u8],
}

impl<'a> IcmpHeader<'a> {
    /// Wrap `data`, which starts at the ICMP or ICMPv6 header.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < ICMP_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: ICMP_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(IcmpHeader { data })
    }

    /// Message type. ICMP and ICMPv6 number their types differently.
    #[inline]
    pub fn icmp_type(&self) -> u8 {
        self.data[0]
    }

    /// Subtype within the message type.
    #[inline]
    pub fn code(&self) -> u8 {
        self.data[1]
    }

    /// Checksum.
    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// The four bytes after the checksum (identifier/sequence for echo).
    #[inline]
    pub fn rest_of_header(&self) -> [u8; 4] {
        [self.data[4], self.data[5], self.data[6], self.data[7]]
    }

    /// Bytes after the 8-byte header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[ICMP_HEADER_LEN..]
    }
}

impl fmt::Display for IcmpHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={} code={}", self.icmp_type(), self.code())
    }
}

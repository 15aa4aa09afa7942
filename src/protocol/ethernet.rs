//! Ethernet II header and 802.1Q tags.
//!
//! Layout: destination MAC (6), source MAC (6), EtherType (2). A VLAN tag
//! inserts TCI (2) + inner EtherType (2) after the source MAC.

use super::{EtherType, ParseError};
use std::fmt;

/// Ethernet header length without tags.
pub const ETH_HEADER_LEN: usize = 14;

/// Length of one 802.1Q tag as it appears after the outer EtherType.
pub const VLAN_TAG_LEN: usize = 4;

/// Zero-copy Ethernet header.
#[derive(Debug, Clone, Copy)]
pub struct EthernetHeader<'a> {
    data: &'a [u8],
}

impl<'a> EthernetHeader<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < ETH_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: ETH_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(EthernetHeader { data })
    }

    #[inline]
    pub fn dst_mac(&self) -> &'a [u8] {
        &self.data[0..6]
    }

    #[inline]
    pub fn src_mac(&self) -> &'a [u8] {
        &self.data[6..12]
    }

    #[inline]
    pub fn ether_type(&self) -> EtherType {
        EtherType::from(u16::from_be_bytes([self.data[12], self.data[13]]))
    }

    /// Bytes following the 14-byte header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[ETH_HEADER_LEN..]
    }
}

impl fmt::Display for EthernetHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}]",
            format_mac(self.src_mac()),
            format_mac(self.dst_mac()),
            self.ether_type()
        )
    }
}

/// Zero-copy 802.1Q tag (TCI + encapsulated EtherType).
#[derive(Debug, Clone, Copy)]
pub struct VlanTag<'a> {
    data: &'a [u8],
}

impl<'a> VlanTag<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < VLAN_TAG_LEN {
            return Err(ParseError::TooShort {
                expected: VLAN_TAG_LEN,
                actual: data.len(),
            });
        }
        Ok(VlanTag { data })
    }

    #[inline]
    fn tci(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// Priority code point (3 bits).
    #[inline]
    pub fn priority(&self) -> u8 {
        (self.tci() >> 13) as u8
    }

    /// Drop eligible indicator.
    #[inline]
    pub fn dei(&self) -> bool {
        (self.tci() >> 12) & 1 == 1
    }

    #[inline]
    pub fn vlan_id(&self) -> u16 {
        self.tci() & 0x0FFF
    }

    /// EtherType of the encapsulated frame.
    #[inline]
    pub fn ether_type(&self) -> EtherType {
        EtherType::from(u16::from_be_bytes([self.data[2], self.data[3]]))
    }
}

/// Format a MAC address as xx:xx:xx:xx:xx:xx
pub fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

//! Zero-copy TCP header (RFC 9293).

use super::ParseError;
use std::fmt;

/// Minimum TCP header length (no options).
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// TCP flag bits.
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// TCP header borrowed from a frame.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    /// Validate the data offset and wrap `data`, which starts at the TCP header.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < TCP_MIN_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: TCP_MIN_HEADER_LEN,
                actual: data.len(),
            });
        }
        let header_len = (data[12] >> 4) as usize * 4;
        if header_len < TCP_MIN_HEADER_LEN {
            return Err(ParseError::InvalidHeader("TCP data offset below 5"));
        }
        if data.len() < header_len {
            return Err(ParseError::TooShort {
                expected: header_len,
                actual: data.len(),
            });
        }
        Ok(TcpHeader { data, header_len })
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

    /// Sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    /// Acknowledgment number; meaningful only when ACK is set.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Header length in bytes, options included.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The flags byte as captured.
    #[inline]
    pub fn flags_raw(&self) -> u8 {
        self.data[13]
    }

    /// SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.data[13] & flags::SYN != 0
    }

    /// ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.data[13] & flags::ACK != 0
    }

    /// FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.data[13] & flags::FIN != 0
    }

    /// RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.data[13] & flags::RST != 0
    }

    /// Advertised receive window, unscaled.
    #[inline]
    pub fn window_size(&self) -> u16 {
        u16::from_be_bytes([self.data[14], self.data[15]])
    }

    /// Bytes after the header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..]
    }

    /// Flags as a string like "[SYN, ACK]".
    pub fn flags_string(&self) -> String {
        const NAMES: [(u8, &str); 6] = [
            (flags::SYN, "SYN"),
            (flags::ACK, "ACK"),
            (flags::FIN, "FIN"),
            (flags::RST, "RST"),
            (flags::PSH, "PSH"),
            (flags::URG, "URG"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.flags_raw() & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        format!("[{}]", set.join(", "))
    }
}

impl fmt::Display for TcpHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{} -> :{} {} seq={} ack={} win={}",
            self.src_port(),
            self.dst_port(),
            self.flags_string(),
            self.sequence_number(),
            self.ack_number(),
            self.window_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_syn_ack() {
        let mut pkt = vec![0u8; 24];
        pkt[0..2].copy_from_slice(&443u16.to_be_bytes());
        pkt[2..4].copy_from_slice(&50000u16.to_be_bytes());
        pkt[4..8].copy_from_slice(&7u32.to_be_bytes());
        pkt[8..12].copy_from_slice(&1001u32.to_be_bytes());
        pkt[12] = 0x60; // 24-byte header
        pkt[13] = flags::SYN | flags::ACK;

        let hdr = TcpHeader::parse(&pkt).unwrap();
        assert_eq!(hdr.src_port(), 443);
        assert_eq!(hdr.dst_port(), 50000);
        assert_eq!(hdr.ack_number(), 1001);
        assert_eq!(hdr.header_len(), 24);
        assert!(hdr.syn() && hdr.ack() && !hdr.fin());
        assert_eq!(hdr.flags_string(), "[SYN, ACK]");
        assert!(hdr.payload().is_empty());
    }

    #[test]
    fn reject_options_past_end() {
        let mut pkt = vec![0u8; 20];
        pkt[12] = 0xF0;
        assert!(TcpHeader::parse(&pkt).is_err());
    }
}

//! Reusable header views.
//!
//! A view is created once, outside the hot path, and rebound to every packet
//! it is probed against. Rebinding copies an offset out of the packet's
//! [`LayerTable`](super::LayerTable); nothing is allocated. The binding
//! remembers which frame it came from, so reading a view against any other
//! packet, or after a failed probe, returns [`ViewError::Unbound`] instead of
//! stale fields.

use std::fmt;
use std::marker::PhantomData;

use super::ethernet::{EthernetHeader, VlanTag};
use super::icmp::IcmpHeader;
use super::ipv4::Ipv4Header;
use super::ipv6::Ipv6Header;
use super::tcp::TcpHeader;
use super::udp::UdpHeader;
use super::{ParseError, ProtocolId};
use crate::error::ViewError;
use crate::packet::PacketData;

/// A protocol layer a [`HeaderView`] can be bound to.
pub trait Layer {
    const ID: ProtocolId;

    /// Zero-copy accessor over the bytes starting at the layer's header.
    type Header<'a>;

    fn header(bytes: &[u8]) -> Result<Self::Header<'_>, ParseError>;
}

macro_rules! layer {
    ($(#[$doc:meta])* $name:ident, $id:expr, $header:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl Layer for $name {
            const ID: ProtocolId = $id;
            type Header<'a> = $header<'a>;

            #[inline]
            fn header(bytes: &[u8]) -> Result<$header<'_>, ParseError> {
                $header::parse(bytes)
            }
        }
    };
}

layer!(
    /// Ethernet II.
    Ethernet, ProtocolId::Ethernet, EthernetHeader
);
layer!(
    /// 802.1Q / 802.1ad tag.
    Vlan, ProtocolId::Vlan, VlanTag
);
layer!(Ip4, ProtocolId::Ipv4, Ipv4Header);
layer!(Ip6, ProtocolId::Ipv6, Ipv6Header);
layer!(Tcp, ProtocolId::Tcp, TcpHeader);
layer!(Udp, ProtocolId::Udp, UdpHeader);
layer!(Icmp4, ProtocolId::Icmpv4, IcmpHeader);
layer!(Icmp6, ProtocolId::Icmpv6, IcmpHeader);

pub type EthernetView = HeaderView<Ethernet>;
pub type VlanView = HeaderView<Vlan>;
pub type Ip4View = HeaderView<Ip4>;
pub type Ip6View = HeaderView<Ip6>;
pub type TcpView = HeaderView<Tcp>;
pub type UdpView = HeaderView<Udp>;
pub type Icmp4View = HeaderView<Icmp4>;
pub type Icmp6View = HeaderView<Icmp6>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    stamp: u64,
    offset: u32,
    len: u32,
}

/// A rebindable projection of one protocol layer.
///
/// Views are plain values with no shared state; give each thread its own.
pub struct HeaderView<L: Layer> {
    binding: Option<Binding>,
    depth: usize,
    _layer: PhantomData<L>,
}

impl<L: Layer> HeaderView<L> {
    pub fn new() -> Self {
        Self::at_depth(0)
    }

    /// A view of the `depth`-th occurrence of the layer (0 = outermost),
    /// e.g. the inner tag of a QinQ frame.
    pub fn at_depth(depth: usize) -> Self {
        HeaderView {
            binding: None,
            depth,
            _layer: PhantomData,
        }
    }

    /// Bind to this layer in `packet`, or become unbound if it is absent.
    ///
    /// The packet's layer table only lists a transport layer when the network
    /// layer in front of it was recognized, so probes respect the layer chain.
    #[inline]
    pub fn probe<P: PacketData + ?Sized>(&mut self, packet: &P) -> bool {
        self.binding = packet
            .layers()
            .nth(L::ID, self.depth)
            .map(|entry| Binding {
                stamp: packet.descriptor().stamp(),
                offset: entry.offset,
                len: entry.len,
            });
        self.binding.is_some()
    }

    /// Field accessor for the bound layer of `packet`.
    pub fn header<'p, P: PacketData + ?Sized>(
        &self,
        packet: &'p P,
    ) -> Result<L::Header<'p>, ViewError> {
        let unbound = ViewError::Unbound { protocol: L::ID };
        let binding = self.binding.ok_or(unbound)?;
        if binding.stamp != packet.descriptor().stamp() {
            return Err(unbound);
        }
        let bytes = packet
            .data()
            .get(binding.offset as usize..)
            .ok_or(unbound)?;
        L::header(bytes).map_err(|_| unbound)
    }

    /// Raw header bytes of the bound layer.
    pub fn header_bytes<'p, P: PacketData + ?Sized>(
        &self,
        packet: &'p P,
    ) -> Result<&'p [u8], ViewError> {
        let unbound = ViewError::Unbound { protocol: L::ID };
        match self.binding {
            Some(b) if b.stamp == packet.descriptor().stamp() => packet
                .data()
                .get(b.offset as usize..(b.offset + b.len) as usize)
                .ok_or(unbound),
            _ => Err(unbound),
        }
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Offset of the bound header within the frame.
    #[inline]
    pub fn offset(&self) -> Option<usize> {
        self.binding.map(|b| b.offset as usize)
    }

    /// Header length of the bound layer.
    #[inline]
    pub fn len(&self) -> Option<usize> {
        self.binding.map(|b| b.len as usize)
    }

    #[inline]
    pub fn unbind(&mut self) {
        self.binding = None;
    }
}

impl<L: Layer> Default for HeaderView<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Layer> fmt::Debug for HeaderView<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderView")
            .field("protocol", &L::ID)
            .field("binding", &self.binding)
            .finish()
    }
}

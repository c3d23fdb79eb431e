use core::fmt;

use plasma_regs::{mac_from_words, mac_to_words};
use strum::FromRepr;

use crate::FrameError;

pub(crate) const ADDR_LEN: usize = 6;

/// Values below this are 802.3 length fields rather than `EtherType`s.
const MIN_ETHER_TYPE: u16 = 0x0600;

/// First word of an ARP payload for Ethernet/IPv4.
const ARP_ETHERNET_IPV4: u32 = 0x0001_0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; ADDR_LEN]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; ADDR_LEN]);
    pub const ZERO: Self = Self([0; ADDR_LEN]);

    #[must_use]
    pub const fn new(octets: [u8; ADDR_LEN]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(self) -> [u8; ADDR_LEN] {
        self.0
    }

    /// Builds an address from the three 16-bit halves the MAC registers use.
    #[must_use]
    pub const fn from_words(words: [u16; 3]) -> Self {
        Self(mac_from_words(words))
    }

    #[must_use]
    pub const fn to_words(self) -> [u16; 3] {
        mac_to_words(self.0)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum EthType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
}

/// Decides which protocol a received frame carries.
///
/// Frames with a real `EtherType` are classified by it. Frames whose type
/// field is an 802.3 length are classified by their first payload word: an
/// IPv4 version nibble, or the ARP Ethernet/IPv4 preamble.
pub(crate) fn classify(ether_type: u16, frame: &[u8]) -> Result<EthType, FrameError> {
    if let Some(ty) = EthType::from_repr(ether_type) {
        return Ok(ty);
    }
    if ether_type >= MIN_ETHER_TYPE {
        return Err(FrameError::UnknownEtherType(ether_type));
    }

    let Some(first) = frame.first_chunk::<4>() else {
        return Err(FrameError::Truncated);
    };
    let first = u32::from_be_bytes(*first);
    if first >> 28 == 4 {
        Ok(EthType::Ipv4)
    } else if first == ARP_ETHERNET_IPV4 {
        Ok(EthType::Arp)
    } else {
        Err(FrameError::UnknownEtherType(ether_type))
    }
}

use core::{
    net::Ipv4Addr,
    sync::atomic::{AtomicU8, AtomicU32, Ordering},
};

use dataview::{DataView, Pod, PodMethods as _};
use strum::FromRepr;

use crate::{FrameError, Transmitter, checksum::checksum16};

pub(crate) const HEADER_LEN: usize = size_of::<Ipv4>();

const VERSION_IHL: u8 = 0x45;
const IDENTIFICATION: u16 = 0x6df3;
const TTL: u8 = 128;

#[repr(C)]
#[derive(Debug, Pod)]
pub(crate) struct Ipv4 {
    vhl: u8,
    tos: u8,
    len: [u8; 2],
    id: [u8; 2],
    off: [u8; 2],
    ttl: u8,
    protocol: u8,
    sum: [u8; 2],
    src: [u8; 4],
    dst: [u8; 4],
}

const _: () = assert!(HEADER_LEN == 20);

impl Ipv4 {
    pub(crate) fn len(&self) -> u16 {
        u16::from_be_bytes(self.len)
    }

    fn set_len(&mut self, len: u16) {
        self.len = len.to_be_bytes();
    }

    pub(crate) fn protocol_number(&self) -> u8 {
        self.protocol
    }

    pub(crate) fn protocol(&self) -> Option<IpProtocol> {
        IpProtocol::from_repr(self.protocol)
    }

    pub(crate) fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub(crate) fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    fn compute_sum(&mut self) {
        self.sum = [0; 2];
        self.sum = checksum16(self.as_bytes()).to_be_bytes();
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

/// Source/destination/protocol triple used both to describe a received
/// packet and to select which packets are accepted.
///
/// As a selector, an unspecified address or a zero protocol matches
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpFilter {
    pub source_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub protocol: u8,
}

impl IpFilter {
    /// Accepts every packet.
    pub const ANY: Self = Self::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, 0);

    #[must_use]
    pub const fn new(source_addr: Ipv4Addr, dest_addr: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source_addr,
            dest_addr,
            protocol,
        }
    }

    /// Accepts packets of `protocol` from and to any address.
    #[must_use]
    pub const fn for_protocol(protocol: IpProtocol) -> Self {
        Self::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            protocol as u8,
        )
    }

    /// Returns whether a packet described by `self` is accepted by
    /// `configured`.
    #[must_use]
    pub fn passes(&self, configured: &Self) -> bool {
        (configured.source_addr.is_unspecified() || configured.source_addr == self.source_addr)
            && (configured.dest_addr.is_unspecified() || configured.dest_addr == self.dest_addr)
            && (configured.protocol == 0 || configured.protocol == self.protocol)
    }
}

/// Reads the filter triple of the IPv4 packet at the start of `frame`.
///
/// IP options are not supported; the header is assumed to be 20 bytes.
pub fn decode_ip_filter(frame: &[u8]) -> Result<IpFilter, FrameError> {
    let (header, _) = split_header(frame)?;
    Ok(IpFilter::new(header.src(), header.dst(), header.protocol_number()))
}

/// Splits an IPv4 packet into its header and its payload.
///
/// The payload is cut to the header's total length, so link-layer padding
/// is not part of it.
pub(crate) fn split_header(frame: &[u8]) -> Result<(&Ipv4, &[u8]), FrameError> {
    let Some((header, body)) = frame.split_at_checked(HEADER_LEN) else {
        return Err(FrameError::Truncated);
    };
    let header = DataView::from(header).get::<Ipv4>(0);
    let body_len = usize::from(header.len())
        .checked_sub(HEADER_LEN)
        .ok_or(FrameError::Truncated)?;
    let body = body.get(..body_len).unwrap_or(body);
    Ok((header, body))
}

/// The stack-wide receive filter.
///
/// Written by the foreground, read by the interrupt handler. Fields are
/// stored independently, so the filter should be changed while receive
/// traffic for the old and new selections is interchangeable.
#[derive(Debug)]
pub struct ActiveFilter {
    source_addr: AtomicU32,
    dest_addr: AtomicU32,
    protocol: AtomicU8,
}

impl ActiveFilter {
    #[must_use]
    pub const fn new(filter: IpFilter) -> Self {
        Self {
            source_addr: AtomicU32::new(filter.source_addr.to_bits()),
            dest_addr: AtomicU32::new(filter.dest_addr.to_bits()),
            protocol: AtomicU8::new(filter.protocol),
        }
    }

    #[must_use]
    pub fn load(&self) -> IpFilter {
        IpFilter::new(
            Ipv4Addr::from_bits(self.source_addr.load(Ordering::Acquire)),
            Ipv4Addr::from_bits(self.dest_addr.load(Ordering::Acquire)),
            self.protocol.load(Ordering::Acquire),
        )
    }

    pub fn store(&self, filter: IpFilter) {
        self.source_addr
            .store(filter.source_addr.to_bits(), Ordering::Release);
        self.dest_addr
            .store(filter.dest_addr.to_bits(), Ordering::Release);
        self.protocol.store(filter.protocol, Ordering::Release);
    }
}

impl<R> Transmitter<'_, R> {
    /// Writes a 20-byte IPv4 header at the start of the staging buffer.
    ///
    /// `total_len` covers the header and its payload.
    pub fn fill_ip_header(
        &mut self,
        total_len: u16,
        protocol: IpProtocol,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) {
        let (header, _) = self.buffer_mut().split_at_mut(HEADER_LEN);
        write_ip_header(header, total_len, protocol, src, dst);
    }
}

/// Writes the fixed header template into `header` and checksums it.
pub(crate) fn write_ip_header(
    header: &mut [u8],
    total_len: u16,
    protocol: IpProtocol,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) {
    let header = DataView::from_mut(header).get_mut::<Ipv4>(0);
    header.vhl = VERSION_IHL;
    header.tos = 0;
    header.set_len(total_len);
    header.id = IDENTIFICATION.to_be_bytes();
    header.off = [0; 2];
    header.ttl = TTL;
    header.protocol = protocol as u8;
    header.src = src.octets();
    header.dst = dst.octets();
    header.compute_sum();
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    fn packet(protocol: u8, total_len: u16) -> [u8; 32] {
        let mut bytes = [0xee; 32];
        bytes[0] = 0x45;
        bytes[2..4].copy_from_slice(&total_len.to_be_bytes());
        bytes[9] = protocol;
        bytes[12..16].copy_from_slice(&SRC.octets());
        bytes[16..20].copy_from_slice(&DST.octets());
        bytes
    }

    #[test]
    fn test_decode_ip_filter() {
        let filter = decode_ip_filter(&packet(17, 28)).unwrap();
        assert_eq!(filter, IpFilter::new(SRC, DST, 17));
        assert_eq!(decode_ip_filter(&[0x45; 19]), Err(FrameError::Truncated));
    }

    #[test]
    fn test_split_header_drops_padding() {
        let bytes = packet(17, 28);
        let (header, body) = split_header(&bytes).unwrap();
        assert_eq!(header.protocol(), Some(IpProtocol::Udp));
        assert_eq!(body.len(), 8);

        // A length larger than the frame keeps what arrived.
        let bytes = packet(17, 1000);
        assert_eq!(split_header(&bytes).unwrap().1.len(), 12);

        let bytes = packet(17, 10);
        assert!(split_header(&bytes).is_err());
    }

    #[test]
    fn test_any_filter_accepts_everything() {
        for packet in [
            IpFilter::ANY,
            IpFilter::new(SRC, DST, 17),
            IpFilter::new(Ipv4Addr::BROADCAST, SRC, 255),
        ] {
            assert!(packet.passes(&IpFilter::ANY));
        }
    }

    #[test]
    fn test_filter_fields_are_independent() {
        let packet = IpFilter::new(SRC, DST, 17);
        let configured = IpFilter::new(SRC, DST, 17);
        assert!(packet.passes(&configured));

        let other = Ipv4Addr::new(10, 0, 0, 1);
        assert!(!packet.passes(&IpFilter { source_addr: other, ..configured }));
        assert!(!packet.passes(&IpFilter { dest_addr: other, ..configured }));
        assert!(!packet.passes(&IpFilter { protocol: 1, ..configured }));

        assert!(packet.passes(&IpFilter::for_protocol(IpProtocol::Udp)));
        assert!(!packet.passes(&IpFilter::for_protocol(IpProtocol::Icmp)));
    }

    #[test]
    fn test_active_filter() {
        let active = ActiveFilter::new(IpFilter::ANY);
        assert_eq!(active.load(), IpFilter::ANY);
        active.store(IpFilter::new(SRC, DST, 6));
        assert_eq!(active.load(), IpFilter::new(SRC, DST, 6));
    }

    #[test]
    fn test_header_template() {
        let mut bytes = [0; HEADER_LEN];
        write_ip_header(&mut bytes, 36, IpProtocol::Udp, SRC, DST);
        assert_eq!(
            bytes[..12],
            [0x45, 0x00, 0x00, 36, 0x6d, 0xf3, 0x00, 0x00, 128, 17, bytes[10], bytes[11]]
        );
        assert_eq!(bytes[12..16], SRC.octets());
        assert_eq!(bytes[16..20], DST.octets());
        assert_eq!(checksum16(&bytes), 0);
    }
}

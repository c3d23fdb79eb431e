use plasma_regs::{Registers, RxBank};

use crate::{
    EthType, FrameError, IpFilter, IpProtocol, NetStack, arp, ethernet, icmp,
    ipv4::{self, HEADER_LEN},
    trace::Hex,
    udp,
};

/// An accepted IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPacket<'a> {
    pub filter: IpFilter,
    /// Bytes following the IPv4 header.
    pub body: &'a [u8],
}

/// Where a received frame is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// ARP packet, starting at the ARP header.
    Arp(&'a [u8]),
    Udp(IpPacket<'a>),
    Icmp(IpPacket<'a>),
    Tcp(IpPacket<'a>),
    /// Any other IP protocol.
    DefaultIp(IpPacket<'a>),
}

/// Classifies a received frame and applies the IP filter `configured`.
pub fn route<'a>(
    ether_type: u16,
    frame: &'a [u8],
    configured: &IpFilter,
) -> Result<Route<'a>, FrameError> {
    match ethernet::classify(ether_type, frame)? {
        EthType::Arp => Ok(Route::Arp(frame)),
        EthType::Ipv4 => {
            let (header, body) = ipv4::split_header(frame)?;
            let filter = IpFilter::new(header.src(), header.dst(), header.protocol_number());
            log::trace!(
                target: "plasma_net::rx",
                "I:{};{};{:02x};",
                filter.source_addr,
                filter.dest_addr,
                filter.protocol
            );
            if !filter.passes(configured) {
                return Err(FrameError::Filtered);
            }
            let packet = IpPacket { filter, body };
            Ok(match header.protocol() {
                Some(IpProtocol::Udp) => Route::Udp(packet),
                Some(IpProtocol::Icmp) => Route::Icmp(packet),
                Some(IpProtocol::Tcp) => Route::Tcp(packet),
                None => Route::DefaultIp(packet),
            })
        }
    }
}

/// Runs in interrupt context. Every error ends here.
pub(crate) fn handle_receive<R>(stack: &NetStack<R>, bank: RxBank, ether_type: u16, frame: &[u8])
where
    R: Registers,
{
    let res = match route(ether_type, frame, &stack.filter().load()) {
        Ok(Route::Arp(arp)) => arp::handle_receive(stack, bank, arp),
        Ok(Route::Udp(packet)) => udp::handle_receive(stack, &packet),
        Ok(Route::Icmp(packet)) => icmp::handle_receive(stack, bank, &packet),
        Ok(Route::Tcp(_)) => {
            log::trace!(target: "plasma_net::rx", "T:{}", Hex(header_bytes(frame)));
            Ok(())
        }
        Ok(Route::DefaultIp(packet)) => {
            log::trace!(
                target: "plasma_net::rx",
                "D:{:02x}:{}",
                packet.filter.protocol,
                Hex(header_bytes(frame))
            );
            Ok(())
        }
        Err(e) => Err(e),
    };
    if let Err(e) = res {
        log::trace!(target: "plasma_net::rx", "dropped frame ({ether_type:#06x}): {e}");
    }
}

fn header_bytes(frame: &[u8]) -> &[u8] {
    frame.get(..HEADER_LEN).unwrap_or(frame)
}

#[cfg(test)]
mod tests {
    use core::net::Ipv4Addr;

    use super::*;

    fn ip_frame(protocol: u8) -> [u8; 28] {
        let mut bytes = [0; 28];
        bytes[0] = 0x45;
        bytes[3] = 28;
        bytes[9] = protocol;
        bytes[12..16].copy_from_slice(&[192, 168, 1, 1]);
        bytes[16..20].copy_from_slice(&[192, 168, 1, 50]);
        bytes
    }

    #[test]
    fn test_route_by_protocol() {
        let cases: [(u8, fn(&Route<'_>) -> bool); 4] = [
            (17, |r| matches!(r, Route::Udp(_))),
            (1, |r| matches!(r, Route::Icmp(_))),
            (6, |r| matches!(r, Route::Tcp(_))),
            (89, |r| matches!(r, Route::DefaultIp(_))),
        ];
        for (protocol, expected) in cases {
            let frame = ip_frame(protocol);
            let route = route(0x0800, &frame, &IpFilter::ANY).unwrap();
            assert!(expected(&route), "protocol {protocol}: {route:?}");
        }
    }

    #[test]
    fn test_route_carries_filter_and_body() {
        let frame = ip_frame(17);
        let Route::Udp(packet) = route(0x0800, &frame, &IpFilter::ANY).unwrap() else {
            panic!("not routed to UDP");
        };
        assert_eq!(packet.filter.source_addr, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(packet.filter.dest_addr, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(packet.body.len(), 8);
    }

    #[test]
    fn test_route_applies_filter() {
        let frame = ip_frame(1);
        let configured = IpFilter::for_protocol(IpProtocol::Udp);
        assert_eq!(route(0x0800, &frame, &configured), Err(FrameError::Filtered));

        let configured = IpFilter::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(192, 168, 1, 50), 0);
        assert!(route(0x0800, &frame, &configured).is_ok());
    }

    #[test]
    fn test_route_arp_and_legacy_frames() {
        let arp = [0x00, 0x01, 0x08, 0x00, 6, 4, 0, 1];
        assert_eq!(route(0x0806, &arp, &IpFilter::ANY), Ok(Route::Arp(&arp)));
        assert_eq!(route(46, &arp, &IpFilter::ANY), Ok(Route::Arp(&arp)));

        let frame = ip_frame(17);
        assert!(matches!(route(46, &frame, &IpFilter::ANY), Ok(Route::Udp(_))));
        assert_eq!(
            route(0x88cc, &frame, &IpFilter::ANY),
            Err(FrameError::UnknownEtherType(0x88cc))
        );
    }
}

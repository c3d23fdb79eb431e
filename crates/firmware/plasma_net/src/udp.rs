use core::net::Ipv4Addr;

use dataview::{DataView, Pod};
use plasma_net_params::TX_BUFFER_LEN;
use plasma_regs::Registers;

use crate::{
    FrameError, IpPacket, IpProtocol, NetStack, Transmitter, TxError, dhcp,
    ipv4::HEADER_LEN as IP_HEADER_LEN,
};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub(crate) const HEADER_LEN: usize = size_of::<Udp>();
/// Offset of the UDP payload in an IPv4 packet.
pub(crate) const PAYLOAD_OFFSET: usize = IP_HEADER_LEN + HEADER_LEN;

pub(crate) fn handle_receive<R>(
    stack: &NetStack<R>,
    packet: &IpPacket<'_>,
) -> Result<(), FrameError>
where
    R: Registers,
{
    let Some((udp, udp_body)) = packet.body.split_at_checked(HEADER_LEN) else {
        return Err(FrameError::Truncated);
    };
    let udp = DataView::from(udp).get::<Udp>(0);
    let len = usize::from(udp.len())
        .checked_sub(HEADER_LEN)
        .ok_or(FrameError::Truncated)?;
    let Some((payload, _)) = udp_body.split_at_checked(len) else {
        return Err(FrameError::Truncated);
    };

    let dst_port = udp.dst_port();
    log::trace!(
        target: "plasma_net::rx",
        "U:{}:{} -> {dst_port} ({len} bytes)",
        packet.filter.source_addr,
        udp.src_port()
    );
    if dst_port == DHCP_CLIENT_PORT {
        return dhcp::handle_receive(stack.session(), payload);
    }
    Ok(())
}

#[repr(C)]
#[derive(Debug, Pod)]
struct Udp {
    src_port: [u8; 2],
    dst_port: [u8; 2],
    len: [u8; 2],
    sum: [u8; 2],
}

impl Udp {
    fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.src_port)
    }

    fn set_src_port(&mut self, port: u16) {
        self.src_port = port.to_be_bytes();
    }

    fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }

    fn set_dst_port(&mut self, port: u16) {
        self.dst_port = port.to_be_bytes();
    }

    fn len(&self) -> u16 {
        u16::from_be_bytes(self.len)
    }

    fn set_len(&mut self, len: u16) {
        self.len = len.to_be_bytes();
    }
}

impl<R> Transmitter<'_, R> {
    /// Returns the part of the staging buffer that holds a UDP payload.
    pub fn udp_payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer_mut()[PAYLOAD_OFFSET..]
    }

    /// Writes the IPv4 and UDP headers for a payload of `payload_len` bytes
    /// already placed with [`Transmitter::udp_payload_mut`].
    ///
    /// The UDP checksum is left at zero ("not computed"). Returns the length
    /// of the whole IPv4 packet.
    pub fn create_udp_packet(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload_len: usize,
    ) -> Result<usize, TxError> {
        let total_len = PAYLOAD_OFFSET + payload_len;
        if total_len > TX_BUFFER_LEN {
            return Err(TxError::TooLarge(total_len));
        }
        let (Ok(ip_len), Ok(udp_len)) = (
            u16::try_from(total_len),
            u16::try_from(HEADER_LEN + payload_len),
        ) else {
            return Err(TxError::TooLarge(total_len));
        };
        self.fill_ip_header(ip_len, IpProtocol::Udp, src, dst);

        let udp = &mut self.buffer_mut()[IP_HEADER_LEN..PAYLOAD_OFFSET];
        let udp = DataView::from_mut(udp).get_mut::<Udp>(0);
        udp.set_src_port(src_port);
        udp.set_dst_port(dst_port);
        udp.set_len(udp_len);
        udp.sum = [0; 2];
        Ok(total_len)
    }
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    /// Sends `payload` from our address to `dst`.
    ///
    /// The frame goes to the current TX destination MAC, see
    /// [`Transmitter::set_dest_mac`].
    pub fn send_udp(
        &mut self,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<(), TxError> {
        let own = self.stack().session().own_address();
        if own.is_unspecified() {
            return Err(TxError::NotReady);
        }
        let Some(slot) = self.udp_payload_mut().get_mut(..payload.len()) else {
            return Err(TxError::TooLarge(PAYLOAD_OFFSET + payload.len()));
        };
        slot.copy_from_slice(payload);
        let len = self.create_udp_packet(own, dst, src_port, dst_port, payload.len())?;
        self.send_buffered_packet(len)
    }
}

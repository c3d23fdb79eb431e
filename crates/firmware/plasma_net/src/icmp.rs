use core::net::Ipv4Addr;

use dataview::{DataView, Pod};
use plasma_net_params::TX_BUFFER_LEN;
use plasma_regs::{Registers, RxBank};
use strum::FromRepr;

use crate::{
    FrameError, IpPacket, IpProtocol, NetStack, PendingQuery, QueryKind, Transmitter, TxError,
    checksum::checksum16,
    ipv4::{self, HEADER_LEN},
    query::{make_payload, split_payload},
};

const ECHO_LEN: usize = size_of::<Icmp>();
const ECHO_REPLY_LEN: u16 = 28;
const _: () = assert!(ECHO_REPLY_LEN as usize == HEADER_LEN + ECHO_LEN);
const PING_IDENT: u16 = 1;

/// Queues a reply to an echo request.
pub(crate) fn handle_receive<R>(
    stack: &NetStack<R>,
    bank: RxBank,
    packet: &IpPacket<'_>,
) -> Result<(), FrameError>
where
    R: Registers,
{
    let Some((icmp, _)) = packet.body.split_at_checked(ECHO_LEN) else {
        return Err(FrameError::Truncated);
    };
    let icmp = DataView::from(icmp).get::<Icmp>(0);
    if icmp.ty() != Some(IcmpType::EchoRequest) {
        return Err(FrameError::NotEchoRequest);
    }

    let sender = stack.rx_src_mac(bank);
    let (ident, seq) = (icmp.ident(), icmp.seq());
    log::trace!(
        target: "plasma_net::rx",
        "C:{} ident {ident} seq {seq}",
        packet.filter.source_addr
    );
    let query = PendingQuery {
        kind: QueryKind::Icmp,
        filter: packet.filter,
        payload: make_payload(sender, (u32::from(ident) << 16) | u32::from(seq)),
    };
    if !stack.queries().push(&query) {
        log::debug!(
            target: "plasma_net::rx",
            "query queue busy, echo request from {} dropped",
            packet.filter.source_addr
        );
    }
    Ok(())
}

/// ICMP echo header.
#[repr(C)]
#[derive(Debug, Pod)]
struct Icmp {
    ty: u8,
    code: u8,
    sum: [u8; 2],
    ident: [u8; 2],
    seq: [u8; 2],
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
enum IcmpType {
    EchoReply = 0,
    EchoRequest = 8,
}

impl Icmp {
    fn ty(&self) -> Option<IcmpType> {
        IcmpType::from_repr(self.ty)
    }

    fn ident(&self) -> u16 {
        u16::from_be_bytes(self.ident)
    }

    fn seq(&self) -> u16 {
        u16::from_be_bytes(self.seq)
    }

    fn set_echo(&mut self, ty: IcmpType, ident: u16, seq: u16) {
        self.ty = ty as u8;
        self.code = 0;
        self.sum = [0; 2];
        self.ident = ident.to_be_bytes();
        self.seq = seq.to_be_bytes();
    }
}

/// Stores the checksum of the ICMP message `message` into its header.
fn compute_sum(message: &mut [u8]) {
    let sum = checksum16(message);
    DataView::from_mut(&mut message[..ECHO_LEN])
        .get_mut::<Icmp>(0)
        .sum = sum.to_be_bytes();
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    /// Stages an echo request of `total_len` bytes (IPv4 header included).
    ///
    /// The data following the echo header is the repeating pattern
    /// `abcdefghijklmnop`. Returns the packet length to pass to
    /// [`Transmitter::send_buffered_packet`].
    pub fn create_ping_request(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        total_len: usize,
        seq: u16,
    ) -> Result<usize, TxError> {
        let total_len = usize::max(total_len, HEADER_LEN + ECHO_LEN);
        let Ok(len) = u16::try_from(total_len) else {
            return Err(TxError::TooLarge(total_len));
        };
        if total_len > TX_BUFFER_LEN {
            return Err(TxError::TooLarge(total_len));
        }
        self.fill_ip_header(len, IpProtocol::Icmp, src, dst);

        let message = &mut self.buffer_mut()[HEADER_LEN..total_len];
        let (echo, data) = message.split_at_mut(ECHO_LEN);
        DataView::from_mut(echo)
            .get_mut::<Icmp>(0)
            .set_echo(IcmpType::EchoRequest, PING_IDENT, seq);
        for (byte, letter) in data.iter_mut().zip((b'a'..=b'p').cycle()) {
            *byte = letter;
        }
        compute_sum(message);
        Ok(total_len)
    }

    /// Answers a queued echo request with an empty echo reply.
    ///
    /// The reply bypasses the staging buffer.
    pub fn send_echo_reply(&mut self, query: &PendingQuery) -> Result<(), TxError> {
        let own = self.stack().session().own_address();
        if own.is_unspecified() {
            return Err(TxError::NotReady);
        }
        let (dest_mac, _) = split_payload(query);
        let [ident_hi, ident_lo, seq_hi, seq_lo] = query.payload[3].to_be_bytes();

        let mut frame = [0; HEADER_LEN + ECHO_LEN];
        let (header, message) = frame.split_at_mut(HEADER_LEN);
        ipv4::write_ip_header(
            header,
            ECHO_REPLY_LEN,
            IpProtocol::Icmp,
            own,
            query.filter.source_addr,
        );
        DataView::from_mut(&mut *message).get_mut::<Icmp>(0).set_echo(
            IcmpType::EchoReply,
            u16::from_be_bytes([ident_hi, ident_lo]),
            u16::from_be_bytes([seq_hi, seq_lo]),
        );
        compute_sum(message);

        self.set_dest_mac(dest_mac);
        self.send_now(&frame)
    }
}

#[cfg(test)]
mod tests {
    use plasma_regs::SimRegisters;

    use super::*;
    use crate::{IpFilter, MacAddr, QueueState};

    const OWN: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
    const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const PEER_MAC: [u8; 6] = [0x70, 0xf3, 0x95, 0x00, 0x72, 0x1f];

    fn stack() -> NetStack<SimRegisters> {
        NetStack::new(SimRegisters::new(), MacAddr::new(plasma_net_params::OWN_MAC))
    }

    fn packet(body: &[u8]) -> IpPacket<'_> {
        IpPacket {
            filter: IpFilter::new(PEER, OWN, 1),
            body,
        }
    }

    #[test]
    fn test_echo_request_is_queued() {
        let stack = stack();
        stack.regs().load_frame(RxBank::First, 0x0800, PEER_MAC, &[]);
        let body = [8, 0, 0, 0, 0x12, 0x34, 0x00, 0x07, b'x', b'y'];
        handle_receive(&stack, RxBank::First, &packet(&body)).unwrap();

        let query = stack.queries().lock().unwrap().query().unwrap();
        assert_eq!(query.kind, QueryKind::Icmp);
        assert_eq!(query.filter, IpFilter::new(PEER, OWN, 1));
        assert_eq!(query.payload, [0x70f3, 0x9500, 0x721f, 0x1234_0007]);
    }

    #[test]
    fn test_other_messages_are_ignored() {
        let stack = stack();
        let reply = [0, 0, 0, 0, 0, 1, 0, 1];
        assert_eq!(
            handle_receive(&stack, RxBank::First, &packet(&reply)),
            Err(FrameError::NotEchoRequest)
        );
        assert_eq!(
            handle_receive(&stack, RxBank::First, &packet(&reply[..4])),
            Err(FrameError::Truncated)
        );
        assert_eq!(stack.queries().state(), QueueState::Empty);
    }

    #[test]
    fn test_create_ping_request() {
        let stack = stack();
        let mut tx = Transmitter::new(&stack);
        let len = tx.create_ping_request(OWN, PEER, 42, 5).unwrap();
        assert_eq!(len, 42);

        let buf = &tx.buffer_mut()[..len];
        assert_eq!(checksum16(&buf[..HEADER_LEN]), 0);
        assert_eq!(buf[9], 1);
        let message = &buf[HEADER_LEN..];
        assert_eq!(message[..2], [8, 0]);
        assert_eq!(message[4..8], [0, 1, 0, 5]);
        assert_eq!(&message[8..], b"abcdefghijklmn");
        assert_eq!(checksum16(message), 0);
    }

    #[test]
    fn test_create_ping_request_too_large() {
        let stack = stack();
        let mut tx = Transmitter::new(&stack);
        assert_eq!(
            tx.create_ping_request(OWN, PEER, TX_BUFFER_LEN + 1, 0),
            Err(TxError::TooLarge(TX_BUFFER_LEN + 1))
        );
        assert_eq!(tx.create_ping_request(OWN, PEER, 0, 0), Ok(28));
    }

    #[test]
    fn test_send_echo_reply() {
        let stack = stack();
        stack.session().bind_static(OWN);
        let mut tx = Transmitter::new(&stack);
        let query = PendingQuery {
            kind: QueryKind::Icmp,
            filter: IpFilter::new(PEER, OWN, 1),
            payload: [0x70f3, 0x9500, 0x721f, 0x1234_0007],
        };
        tx.send_echo_reply(&query).unwrap();

        let sent = stack.regs().take_transmissions();
        assert_eq!(sent.len(), 1);
        let reply = &sent[0];
        assert_eq!(reply.dest_mac, PEER_MAC);
        assert_eq!(reply.ether_type, 0x0800);
        assert_eq!(reply.payload.len(), 28);
        assert_eq!(checksum16(&reply.payload[..HEADER_LEN]), 0);
        assert_eq!(reply.payload[12..16], OWN.octets());
        assert_eq!(reply.payload[16..20], PEER.octets());
        assert_eq!(reply.payload[20..22], [0, 0]);
        assert_eq!(reply.payload[24..28], [0x12, 0x34, 0, 7]);
        assert_eq!(checksum16(&reply.payload[20..]), 0);
    }
}

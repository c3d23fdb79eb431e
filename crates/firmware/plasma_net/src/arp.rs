use core::net::Ipv4Addr;

use dataview::{DataView, Pod};
use plasma_regs::{Registers, RxBank};
use strum::FromRepr;

use crate::{
    EthType, FrameError, IpFilter, MacAddr, NetStack, PendingQuery, QueryKind, Transmitter,
    TxError,
    ethernet::ADDR_LEN,
    query::make_payload,
};

/// Length of an ARP reply on the wire, padded to the Ethernet minimum.
const REPLY_LEN: usize = 46;

/// Queues a reply to an ARP request for our address.
pub(crate) fn handle_receive<R>(
    stack: &NetStack<R>,
    bank: RxBank,
    body: &[u8],
) -> Result<(), FrameError>
where
    R: Registers,
{
    let Some((arp, _)) = body.split_at_checked(size_of::<Arp>()) else {
        return Err(FrameError::Truncated);
    };
    let arp = DataView::from(arp).get::<Arp>(0);
    if arp.opcode() != Some(ArpOp::Request) {
        return Err(FrameError::NotArpRequest);
    }

    let sender = stack.rx_src_mac(bank);
    let target = arp.target_paddr();
    log::trace!(
        target: "plasma_net::rx",
        "A:{sender} {} asks for {target}",
        arp.sender_paddr()
    );
    let own = stack.session().own_address();
    if own.is_unspecified() || target != own {
        return Err(FrameError::NotOurAddress(target));
    }
    let query = PendingQuery {
        kind: QueryKind::Arp,
        filter: IpFilter::ANY,
        payload: make_payload(sender, arp.sender_paddr().to_bits()),
    };
    if !stack.queries().push(&query) {
        log::debug!(
            target: "plasma_net::rx",
            "query queue busy, ARP request from {sender} dropped"
        );
    }
    Ok(())
}

#[repr(C, packed)]
#[derive(Debug, Pod)]
struct Arp {
    /// Hardware type
    htype: [u8; 2],
    /// Protocol type
    ptype: [u8; 2],
    /// Hardware address length
    hlen: u8,
    /// Protocol address length
    plen: u8,
    /// Operation code
    opcode: [u8; 2],
    /// Sender hardware address
    sender_haddr: [u8; ADDR_LEN],
    /// Sender protocol address
    sender_paddr: [u8; 4],
    /// Target hardware address
    target_haddr: [u8; ADDR_LEN],
    /// Target protocol address
    target_paddr: [u8; 4],
}

const _: () = assert!(size_of::<Arp>() == 28);

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArpHardware {
    Ethernet = 1,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl Arp {
    fn set_htype(&mut self, ty: ArpHardware) {
        self.htype = (ty as u16).to_be_bytes();
    }

    fn set_ptype(&mut self, ty: EthType) {
        self.ptype = (ty as u16).to_be_bytes();
    }

    fn set_addr_lens(&mut self) {
        self.hlen = 6;
        self.plen = 4;
    }

    fn opcode(&self) -> Option<ArpOp> {
        ArpOp::from_repr(u16::from_be_bytes(self.opcode))
    }

    fn set_opcode(&mut self, op: ArpOp) {
        self.opcode = (op as u16).to_be_bytes();
    }

    fn set_sender(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        self.sender_haddr = mac.octets();
        self.sender_paddr = ip.octets();
    }

    fn sender_paddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.sender_paddr)
    }

    fn set_target(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        self.target_haddr = mac.octets();
        self.target_paddr = ip.octets();
    }

    fn target_paddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.target_paddr)
    }
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    /// Tells `dest_mac`/`dest_ip` that our address is at our MAC.
    ///
    /// The reply bypasses the staging buffer. The TX `EtherType` is switched
    /// to ARP for the reply and back to IPv4 afterwards; the TX destination
    /// MAC is left at `dest_mac`.
    pub fn send_arp_reply(
        &mut self,
        dest_mac: MacAddr,
        dest_ip: Ipv4Addr,
    ) -> Result<(), TxError> {
        let stack = self.stack();
        let own = stack.session().own_address();
        if own.is_unspecified() {
            return Err(TxError::NotReady);
        }

        let mut frame = [0; REPLY_LEN];
        let arp = DataView::from_mut(&mut frame[..size_of::<Arp>()]).get_mut::<Arp>(0);
        arp.set_htype(ArpHardware::Ethernet);
        arp.set_ptype(EthType::Ipv4);
        arp.set_addr_lens();
        arp.set_opcode(ArpOp::Reply);
        arp.set_sender(stack.mac(), own);
        arp.set_target(dest_mac, dest_ip);

        self.set_dest_mac(dest_mac);
        self.set_ether_type(EthType::Arp);
        let res = self.send_now(&frame);
        self.set_ether_type(EthType::Ipv4);
        res
    }

    /// Broadcasts our address binding.
    pub fn announce(&mut self) -> Result<(), TxError> {
        let own = self.stack().session().own_address();
        log::info!("announcing {own} at {}", self.stack().mac());
        self.send_arp_reply(MacAddr::BROADCAST, own)
    }
}

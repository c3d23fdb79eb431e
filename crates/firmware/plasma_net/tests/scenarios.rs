#![cfg(test)]

use std::{
    net::Ipv4Addr,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use plasma_net::{
    DhcpClient, DhcpConfig, DhcpState, IpFilter, MacAddr, NetStack, QueryKind, QueueState,
    Transmitter, checksum16,
};
use plasma_net_params::OWN_MAC;
use plasma_regs::{IrqLines, RxBank, SimRegisters, Transmission};

const OWN: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

fn stack() -> NetStack<SimRegisters> {
    let stack = NetStack::new(SimRegisters::new(), MacAddr::new(OWN_MAC));
    stack.init();
    stack
}

fn receive(stack: &NetStack<SimRegisters>, ether_type: u16, src_mac: [u8; 6], frame: &[u8]) {
    stack
        .regs()
        .load_frame(RxBank::First, ether_type, src_mac, frame);
    stack.handle_interrupt(IrqLines::ETHERNET.bits());
}

fn ipv4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    body: &[u8],
) -> Result<Vec<u8>, anyhow::Error> {
    let total_len = u16::try_from(20 + body.len())?;
    let mut packet = vec![0x45, 0];
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 0, 64, protocol, 0, 0]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    let sum = checksum16(&packet);
    packet[10..12].copy_from_slice(&sum.to_be_bytes());
    packet.extend_from_slice(body);
    Ok(packet)
}

fn udp(src_port: u16, dst_port: u16, payload: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let len = u16::try_from(8 + payload.len())?;
    let mut datagram = Vec::new();
    datagram.extend_from_slice(&src_port.to_be_bytes());
    datagram.extend_from_slice(&dst_port.to_be_bytes());
    datagram.extend_from_slice(&len.to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

fn dhcp_reply(xid: u32, options: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let mut message = vec![0; 240];
    message[..4].copy_from_slice(&[2, 1, 6, 0]);
    message[4..8].copy_from_slice(&xid.to_be_bytes());
    message[16..20].copy_from_slice(&OWN.octets());
    message[20..24].copy_from_slice(&SERVER.octets());
    message[28..34].copy_from_slice(&OWN_MAC);
    message[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    message.extend_from_slice(options);
    message.resize(300, 0);
    ipv4(SERVER, Ipv4Addr::BROADCAST, 17, &udp(67, 68, &message)?)
}

fn arp_request(sender_mac: [u8; 6], sender_ip: Ipv4Addr) -> Vec<u8> {
    let mut arp = vec![0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01];
    arp.extend_from_slice(&sender_mac);
    arp.extend_from_slice(&sender_ip.octets());
    arp.extend_from_slice(&[0; 6]);
    arp.extend_from_slice(&OWN.octets());
    arp.resize(46, 0);
    arp
}

fn message_type(sent: &Transmission) -> u8 {
    // IPv4 + UDP headers, then the DHCP options start with option 53.
    sent.payload[28 + 242]
}

#[test]
fn test_arp_replies_are_lifo() {
    let stack = stack();
    stack.session().bind_static(OWN);
    let peers = [1, 2, 3].map(|n| ([0x02, 0, 0, 0, 0, n], Ipv4Addr::new(192, 168, 1, n)));
    for (mac, ip) in peers {
        receive(&stack, 0x0806, mac, &arp_request(mac, ip));
    }
    assert_eq!(stack.queries().state(), QueueState::Holding(2));

    let mut tx = Transmitter::new(&stack);
    tx.set_dest_mac(MacAddr::new(SERVER_MAC));
    assert_eq!(tx.service_queries(), Some(QueryKind::Arp));
    assert_eq!(tx.service_queries(), Some(QueryKind::Arp));
    assert_eq!(stack.queries().len(), Some(1));

    let sent = stack.regs().take_transmissions();
    assert_eq!(sent.len(), 2);
    for (reply, (mac, ip)) in sent.iter().zip([peers[2], peers[1]]) {
        assert_eq!(reply.dest_mac, mac);
        assert_eq!(reply.ether_type, 0x0806);
        assert_eq!(reply.payload[14..18], OWN.octets());
        assert_eq!(reply.payload[24..28], ip.octets());
    }
    // The application's destination survives the replies.
    assert_eq!(tx.dest_mac(), MacAddr::new(SERVER_MAC));
}

#[test]
fn test_queue_rejects_pushes_while_serviced() {
    let stack = stack();
    stack.session().bind_static(OWN);
    let guard = stack.queries().lock();
    assert!(guard.is_none());

    receive(&stack, 0x0806, SERVER_MAC, &arp_request(SERVER_MAC, SERVER));
    let guard = stack.queries().lock();
    assert!(guard.is_some());
    assert_eq!(stack.queries().state(), QueueState::Locked);

    receive(&stack, 0x0806, SERVER_MAC, &arp_request(SERVER_MAC, SERVER));
    assert_eq!(stack.queries().state(), QueueState::Locked);
    drop(guard);
    assert_eq!(stack.queries().state(), QueueState::Empty);
}

#[test]
fn test_queue_overflow_drops_newest() {
    let stack = stack();
    stack.session().bind_static(OWN);
    for n in 1..=6 {
        let mac = [0x02, 0, 0, 0, 0, n];
        receive(&stack, 0x0806, mac, &arp_request(mac, Ipv4Addr::new(10, 0, 0, n)));
    }
    assert_eq!(stack.queries().len(), Some(4));
    let query = stack.queries().lock().and_then(|g| g.query());
    assert_eq!(query.map(|q| q.payload[3]), Some(Ipv4Addr::new(10, 0, 0, 4).to_bits()));
}

#[test]
fn test_echo_request_gets_reply() -> Result<(), anyhow::Error> {
    let stack = stack();
    stack.session().bind_static(OWN);
    stack.set_filter(IpFilter::new(Ipv4Addr::UNSPECIFIED, OWN, 0));

    let echo = [8, 0, 0xf7, 0xfe, 0x00, 0x01, 0x00, 0x00, b'p', b'i', b'n', b'g'];
    receive(&stack, 0x0800, SERVER_MAC, &ipv4(SERVER, OWN, 1, &echo)?);
    // Addressed to someone else: filtered out.
    let other = Ipv4Addr::new(192, 168, 1, 77);
    receive(&stack, 0x0800, SERVER_MAC, &ipv4(SERVER, other, 1, &echo)?);
    assert_eq!(stack.queries().len(), Some(1));

    let mut tx = Transmitter::new(&stack);
    assert_eq!(tx.service_queries(), Some(QueryKind::Icmp));
    assert_eq!(tx.service_queries(), None);

    let sent = stack.regs().take_transmissions();
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!(reply.dest_mac, SERVER_MAC);
    assert_eq!(reply.ether_type, 0x0800);
    assert_eq!(checksum16(&reply.payload[..20]), 0);
    assert_eq!(reply.payload[9], 1);
    assert_eq!(reply.payload[16..20], SERVER.octets());
    assert_eq!(reply.payload[20], 0);
    assert_eq!(reply.payload[24..28], [0, 1, 0, 0]);
    assert_eq!(checksum16(&reply.payload[20..]), 0);
    Ok(())
}

#[test]
fn test_dhcp_offer_through_interrupt() -> Result<(), anyhow::Error> {
    let stack = stack();
    let mut tx = Transmitter::new(&stack);
    let mut client = DhcpClient::new(DhcpConfig {
        wait_spins: 1,
        ..DhcpConfig::default()
    });
    let session = stack.session();

    client.poll(&mut tx);
    client.poll(&mut tx);
    assert_eq!(session.state(), DhcpState::Discovering);
    let xid = session.transaction_id();
    let discover = stack.regs().take_transmissions();
    assert_eq!(discover.len(), 1);
    assert_eq!(discover[0].dest_mac, [0xff; 6]);
    assert_eq!(message_type(&discover[0]), 1);

    // A reply to some other exchange changes nothing.
    receive(&stack, 0x0800, SERVER_MAC, &dhcp_reply(xid + 1, &[53, 1, 2, 255])?);
    assert!(session.own_address().is_unspecified());
    assert!(session.server_address().is_unspecified());
    assert_eq!(session.state(), DhcpState::Discovering);

    receive(&stack, 0x0800, SERVER_MAC, &dhcp_reply(xid, &[53, 1, 2, 255])?);
    assert_eq!(session.own_address().to_bits(), 0xc0a8_0132);
    assert_eq!(session.server_address().to_bits(), 0xc0a8_0101);

    client.poll(&mut tx);
    client.poll(&mut tx);
    assert_eq!(session.state(), DhcpState::Requesting);
    let request = stack.regs().take_transmissions();
    assert_eq!(request.len(), 1);
    assert_eq!(message_type(&request[0]), 3);

    let ack = dhcp_reply(xid, &[53, 1, 5, 51, 4, 0x00, 0x00, 0x0e, 0x10, 255])?;
    receive(&stack, 0x0800, SERVER_MAC, &ack);
    assert_eq!(session.lease_seconds(), 3600);
    client.poll(&mut tx);
    assert_eq!(session.state(), DhcpState::Bound);
    Ok(())
}

#[test]
fn test_dhcp_acquire_against_server() -> Result<(), anyhow::Error> {
    let stack = stack();
    let done = AtomicBool::new(false);

    let lease = thread::scope(|s| -> Result<_, anyhow::Error> {
        let server = s.spawn(|| -> Result<(), anyhow::Error> {
            while !done.load(Ordering::Acquire) {
                for sent in stack.regs().take_transmissions() {
                    let xid = u32::from_be_bytes(sent.payload[32..36].try_into()?);
                    let options: &[u8] = match message_type(&sent) {
                        1 => &[53, 1, 2, 54, 4, 192, 168, 1, 1, 255],
                        3 => &[53, 1, 5, 51, 4, 0x00, 0x01, 0x51, 0x80, 255],
                        _ => continue,
                    };
                    receive(&stack, 0x0800, SERVER_MAC, &dhcp_reply(xid, options)?);
                }
                thread::yield_now();
            }
            Ok(())
        });

        let mut tx = Transmitter::new(&stack);
        let lease = DhcpClient::default().acquire(&mut tx);
        done.store(true, Ordering::Release);
        server
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
        Ok(lease?)
    })?;

    assert_eq!(lease.address, OWN);
    assert_eq!(lease.server, SERVER);
    assert_eq!(lease.seconds, 86400);
    assert_eq!(stack.session().state(), DhcpState::Bound);
    assert_eq!(
        stack.filter().load(),
        IpFilter::new(Ipv4Addr::UNSPECIFIED, OWN, 0)
    );

    // Bound: the stack now answers ARP and can announce itself.
    let mut tx = Transmitter::new(&stack);
    tx.announce()?;
    let sent = stack.regs().take_transmissions();
    assert_eq!(sent.last().map(|t| t.dest_mac), Some([0xff; 6]));

    // Ping is answered once the lease is held.
    let echo = [8, 0, 0xf7, 0xfd, 0x00, 0x01, 0x00, 0x01];
    receive(&stack, 0x0800, SERVER_MAC, &ipv4(SERVER, OWN, 1, &echo)?);
    assert_eq!(stack.queries().len(), Some(1));
    assert_eq!(tx.service_queries(), Some(QueryKind::Icmp));
    let sent = stack.regs().take_transmissions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload[16..20], SERVER.octets());
    assert_eq!(sent[0].payload[20], 0);
    Ok(())
}

#[test]
fn test_udp_packet_length_and_checksum() -> Result<(), anyhow::Error> {
    let stack = stack();
    let mut tx = Transmitter::new(&stack);
    tx.udp_payload_mut()[..8].copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);
    let len = tx.create_udp_packet(OWN, SERVER, 0, 60000, 8)?;
    assert_eq!(len, 36);

    let header = &tx.buffer_mut()[..20];
    assert_eq!(checksum16(header), 0);
    // UDP checksum is not computed.
    assert_eq!(tx.buffer_mut()[26..28], [0, 0]);

    tx.send_buffered_packet(len)?;
    let sent = stack.regs().take_transmissions();
    assert_eq!(sent[0].payload.len(), 36);
    assert_eq!(sent[0].ether_type, 0x0800);
    Ok(())
}

#[test]
fn test_legacy_length_frames_are_dispatched() {
    let stack = stack();
    stack.session().bind_static(OWN);
    let arp = arp_request(SERVER_MAC, SERVER);
    receive(&stack, 46, SERVER_MAC, &arp);
    assert_eq!(stack.queries().len(), Some(1));
}

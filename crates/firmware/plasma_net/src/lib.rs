//! IPv4 network stack for the Plasma soft core's Ethernet MAC.
//!
//! The MAC strips and inserts the Ethernet header in hardware, so every
//! buffer handled here starts at the IPv4 (or ARP) header. Destination MAC
//! and `EtherType` travel through registers instead.
//!
//! The stack is split along the interrupt boundary:
//!
//! * [`NetStack`] holds everything the receive interrupt touches (the active
//!   IP filter, the DHCP session and the deferred reply queue). All of it is
//!   atomics, so it can live in a `static` and be shared by reference.
//!   [`NetStack::handle_interrupt`] is the receive interrupt handler.
//! * [`Transmitter`] is owned by the foreground loop. It stages outgoing
//!   packets, answers queued ARP/ICMP queries and drives the
//!   [`DhcpClient`].
#![cfg_attr(not(test), no_std)]

pub use self::{
    checksum::checksum16,
    console::{Console, ConsoleLogger, ConsoleWriter},
    dhcp::{
        DhcpClient, DhcpConfig, DhcpError, DhcpMessageType, DhcpPoll, DhcpSession, DhcpState,
        Lease,
    },
    dispatch::{IpPacket, Route, route},
    error::{FrameError, TxError},
    ethernet::{EthType, MacAddr},
    ipv4::{ActiveFilter, IpFilter, IpProtocol, decode_ip_filter},
    query::{PendingQuery, QueryGuard, QueryKind, QueryQueue, QueueState},
    stack::NetStack,
    tx::Transmitter,
};

mod arp;
mod checksum;
mod console;
mod dhcp;
mod dispatch;
mod error;
mod ethernet;
mod icmp;
mod ipv4;
mod query;
mod stack;
mod trace;
mod tx;
mod udp;

pub use self::udp::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

use core::net::Ipv4Addr;

/// Reasons a received frame is dropped.
///
/// None of these leave the interrupt handler; they only end up in the trace
/// log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated")]
    Truncated,
    #[error("unknown EtherType {0:#06x}")]
    UnknownEtherType(u16),
    #[error("rejected by the IP filter")]
    Filtered,
    #[error("ARP frame is not a request")]
    NotArpRequest,
    #[error("ARP request for {0}, not for us")]
    NotOurAddress(Ipv4Addr),
    #[error("ICMP message is not an echo request")]
    NotEchoRequest,
    #[error("DHCP message is not a BOOTREPLY")]
    NotBootReply,
    #[error("DHCP message lacks the magic cookie")]
    BadMagicCookie,
    #[error("DHCP transaction {0:#010x} is not ours")]
    TransactionMismatch(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    /// No local address has been configured yet.
    #[error("network not ready")]
    NotReady,
    #[error("packet of {0} bytes does not fit the transmit buffer")]
    TooLarge(usize),
}

#![no_std]

/// Hardware address programmed into the MAC at start-up.
pub const OWN_MAC: [u8; 6] = [0x02, 0x0a, 0x35, 0x44, 0x54, 0x41];

/// Maximum number of ARP/ICMP replies waiting for the main loop.
pub const MAX_PENDING_QUERIES: usize = 4;

/// Size of one receive bank window in bytes.
pub const RX_BUFFER_LEN: usize = 0x800;

/// Size of the transmit staging buffer (largest IPv4 packet sent).
pub const TX_BUFFER_LEN: usize = 1536;

/// Outer DHCP attempts (DISCOVER round followed by REQUEST).
pub const DHCP_ATTEMPTS: usize = 10;

/// DISCOVER retransmissions within one attempt.
pub const DHCP_DISCOVER_RETRANSMITS: usize = 10;

/// Checks of the session state while waiting for an OFFER or ACK.
pub const DHCP_WAIT_CHECKS: usize = 1000;

/// Busy-wait iterations between two checks.
pub const DHCP_WAIT_SPINS: usize = 10_000;

/// Maximum number of DHCP options inspected per reply.
pub const DHCP_MAX_OPTIONS: usize = 10;

/// Longest DHCP option accepted before the scan is abandoned.
pub const DHCP_MAX_OPTION_LEN: usize = 31;

//! DHCP client.
//!
//! The exchange is split across the interrupt boundary. The receive path
//! ([`handle_receive`]) only records what replies carry into the
//! [`DhcpSession`], and only while the session's state allows it: offered
//! and server addresses while discovering, the lease time while requesting.
//! [`DhcpClient`] runs in the foreground, sends DISCOVER and REQUEST and
//! watches the session change.

use core::{
    net::Ipv4Addr,
    sync::atomic::{AtomicU8, AtomicU32, Ordering},
};

use dataview::{DataView, Pod};
use plasma_net_params::{
    DHCP_ATTEMPTS, DHCP_DISCOVER_RETRANSMITS, DHCP_MAX_OPTION_LEN, DHCP_MAX_OPTIONS,
    DHCP_WAIT_CHECKS, DHCP_WAIT_SPINS,
};
use plasma_regs::Registers;
use strum::FromRepr;

use crate::{
    DHCP_CLIENT_PORT, DHCP_SERVER_PORT, FrameError, IpFilter, IpProtocol, MacAddr, Transmitter,
    TxError,
};

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Offset of the options in a DHCP message.
const OPTIONS_OFFSET: usize = size_of::<DhcpHeader>();
/// Length of the messages we send, the BOOTP minimum.
const MESSAGE_LEN: usize = 300;

/// Fixed part of a DHCP message, magic cookie included.
#[repr(C)]
#[derive(Debug, Pod)]
struct DhcpHeader {
    op: u8,
    htype: u8,
    hlen: u8,
    hops: u8,
    xid: [u8; 4],
    secs: [u8; 2],
    flags: [u8; 2],
    ciaddr: [u8; 4],
    yiaddr: [u8; 4],
    siaddr: [u8; 4],
    giaddr: [u8; 4],
    chaddr: [u8; 16],
    sname: [u8; 64],
    file: [u8; 128],
    cookie: [u8; 4],
}

const _: () = assert!(OPTIONS_OFFSET == 240);

impl DhcpHeader {
    fn xid(&self) -> u32 {
        u32::from_be_bytes(self.xid)
    }

    fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.yiaddr)
    }

    fn siaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.siaddr)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
enum DhcpOptionCode {
    Pad = 0,
    RequestedAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerId = 54,
    End = 255,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DhcpOption<'a> {
    code: u8,
    value: &'a [u8],
}

impl DhcpOption<'_> {
    fn addr(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.value.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}

/// Iterator over the options region of a received message.
///
/// Stops at the end option, after [`DHCP_MAX_OPTIONS`] entries, at an
/// option longer than [`DHCP_MAX_OPTION_LEN`] or at an option cut short by
/// the end of the message.
struct Options<'a> {
    bytes: &'a [u8],
    remaining: usize,
}

impl<'a> Options<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            remaining: DHCP_MAX_OPTIONS,
        }
    }

    fn parse_next(&mut self) -> Option<DhcpOption<'a>> {
        loop {
            self.remaining = self.remaining.checked_sub(1)?;
            let (&code, rest) = self.bytes.split_first()?;
            self.bytes = rest;
            match DhcpOptionCode::from_repr(code) {
                Some(DhcpOptionCode::End) => return None,
                Some(DhcpOptionCode::Pad) => continue,
                _ => {}
            }
            let (&len, rest) = self.bytes.split_first()?;
            let len = usize::from(len);
            if len > DHCP_MAX_OPTION_LEN {
                return None;
            }
            let (value, rest) = rest.split_at_checked(len)?;
            self.bytes = rest;
            return Some(DhcpOption { code, value });
        }
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = DhcpOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let option = self.parse_next();
        if option.is_none() {
            self.bytes = &[];
            self.remaining = 0;
        }
        option
    }
}

/// Writes options after the magic cookie of an outgoing message.
struct OptionWriter<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> OptionWriter<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn message_type(&mut self, ty: DhcpMessageType) {
        self.put(DhcpOptionCode::MessageType, &[ty as u8]);
    }

    fn addr(&mut self, code: DhcpOptionCode, addr: Ipv4Addr) {
        self.put(code, &addr.octets());
    }

    fn put<const N: usize>(&mut self, code: DhcpOptionCode, value: &[u8; N]) {
        const { assert!(N <= DHCP_MAX_OPTION_LEN) };
        let [.., len] = N.to_be_bytes();
        let option = &mut self.bytes[self.pos..self.pos + 2 + N];
        option[0] = code as u8;
        option[1] = len;
        option[2..].copy_from_slice(value);
        self.pos += 2 + N;
    }

    fn end(self) {
        self.bytes[self.pos] = DhcpOptionCode::End as u8;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum DhcpState {
    Init = 0,
    /// DISCOVER sent; offers are recorded.
    Discovering = 1,
    /// REQUEST sent; the lease time is recorded.
    Requesting = 2,
    Bound = 3,
}

/// Address configuration shared by the DHCP receive path and the
/// foreground.
///
/// A zero (unspecified) own address means the network is not ready; every
/// transmit path refuses to send until it is set.
#[derive(Debug)]
pub struct DhcpSession {
    own: AtomicU32,
    server: AtomicU32,
    lease: AtomicU32,
    xid: AtomicU32,
    state: AtomicU8,
}

impl Default for DhcpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DhcpSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            own: AtomicU32::new(0),
            server: AtomicU32::new(0),
            lease: AtomicU32::new(0),
            xid: AtomicU32::new(0),
            state: AtomicU8::new(DhcpState::Init as u8),
        }
    }

    #[must_use]
    pub fn own_address(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.own.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.server.load(Ordering::Acquire))
    }

    /// Lease time in seconds; zero while no lease is held.
    #[must_use]
    pub fn lease_seconds(&self) -> u32 {
        self.lease.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn transaction_id(&self) -> u32 {
        self.xid.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> DhcpState {
        DhcpState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(DhcpState::Init)
    }

    pub(crate) fn set_state(&self, state: DhcpState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_transaction_id(&self, xid: u32) {
        self.xid.store(xid, Ordering::Release);
    }

    /// Forgets the address, server and lease and returns to `Init`.
    pub fn reset(&self) {
        self.set_state(DhcpState::Init);
        self.own.store(0, Ordering::Release);
        self.server.store(0, Ordering::Release);
        self.lease.store(0, Ordering::Release);
    }

    /// Uses `address` without running DHCP. The lease never expires.
    pub fn bind_static(&self, address: Ipv4Addr) {
        self.reset();
        self.own.store(address.to_bits(), Ordering::Release);
        self.set_state(DhcpState::Bound);
    }

    /// Prepares for a new DISCOVER and returns its transaction id.
    fn begin_discover(&self) -> u32 {
        self.set_state(DhcpState::Init);
        self.own.store(0, Ordering::Release);
        self.lease.store(0, Ordering::Release);
        let xid = self.xid.load(Ordering::Acquire).wrapping_add(1);
        self.xid.store(xid, Ordering::Release);
        self.set_state(DhcpState::Discovering);
        xid
    }

    fn lease(&self) -> Lease {
        Lease {
            address: self.own_address(),
            server: self.server_address(),
            seconds: self.lease_seconds(),
        }
    }
}

/// Records a DHCP reply addressed to the client port.
///
/// Runs in interrupt context.
pub(crate) fn handle_receive(session: &DhcpSession, payload: &[u8]) -> Result<(), FrameError> {
    let Some((header, options)) = payload.split_at_checked(OPTIONS_OFFSET) else {
        return Err(FrameError::Truncated);
    };
    let header = DataView::from(header).get::<DhcpHeader>(0);
    if header.op != BOOTREPLY {
        return Err(FrameError::NotBootReply);
    }
    if header.cookie != MAGIC_COOKIE {
        return Err(FrameError::BadMagicCookie);
    }
    let xid = header.xid();
    if xid != session.transaction_id() {
        return Err(FrameError::TransactionMismatch(xid));
    }

    let state = session.state();
    let mut server_id = None;
    for option in Options::new(options) {
        match DhcpOptionCode::from_repr(option.code) {
            Some(DhcpOptionCode::MessageType) => {
                let ty = option
                    .value
                    .first()
                    .and_then(|&ty| DhcpMessageType::from_repr(ty));
                log::trace!(target: "plasma_net::dhcp", "message type {ty:?}");
            }
            Some(DhcpOptionCode::ServerId) => {
                server_id = option.addr();
                log::trace!(target: "plasma_net::dhcp", "server id {server_id:?}");
            }
            Some(DhcpOptionCode::LeaseTime) if state == DhcpState::Requesting => {
                if let Ok(seconds) = <[u8; 4]>::try_from(option.value) {
                    let seconds = u32::from_be_bytes(seconds);
                    log::trace!(target: "plasma_net::dhcp", "lease {seconds}s");
                    session.lease.store(seconds, Ordering::Release);
                }
            }
            _ => {}
        }
    }

    if state == DhcpState::Discovering {
        let mut server = header.siaddr();
        if server.is_unspecified() {
            server = server_id.unwrap_or(server);
        }
        let offered = header.yiaddr();
        log::trace!(target: "plasma_net::dhcp", "offer {offered} from {server}");
        // The server must be visible before the address is.
        session.server.store(server.to_bits(), Ordering::Release);
        session.own.store(offered.to_bits(), Ordering::Release);
    }
    Ok(())
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    /// Stages a broadcast DISCOVER with transaction id `xid`.
    ///
    /// Sets the TX destination MAC to broadcast. Returns the packet length.
    pub fn create_dhcp_discover(&mut self, xid: u32) -> Result<usize, TxError> {
        self.set_dest_mac(MacAddr::BROADCAST);
        let mac = self.stack().mac();

        let message = &mut self.udp_payload_mut()[..MESSAGE_LEN];
        message.fill(0);
        let (header, options) = message.split_at_mut(OPTIONS_OFFSET);
        let header = DataView::from_mut(header).get_mut::<DhcpHeader>(0);
        header.op = BOOTREQUEST;
        header.htype = HTYPE_ETHERNET;
        header.hlen = 6;
        header.xid = xid.to_be_bytes();
        header.chaddr[..6].copy_from_slice(&mac.octets());
        header.cookie = MAGIC_COOKIE;

        let mut writer = OptionWriter::new(options);
        writer.message_type(DhcpMessageType::Discover);
        writer.end();

        self.create_dhcp_packet()
    }

    /// Turns a staged DISCOVER into a REQUEST for `offered` from `server`.
    pub fn change_to_dhcp_request(
        &mut self,
        offered: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<usize, TxError> {
        let message = &mut self.udp_payload_mut()[..MESSAGE_LEN];
        let (header, options) = message.split_at_mut(OPTIONS_OFFSET);
        let header = DataView::from_mut(header).get_mut::<DhcpHeader>(0);
        header.siaddr = server.octets();

        options.fill(0);
        let mut writer = OptionWriter::new(options);
        writer.message_type(DhcpMessageType::Request);
        writer.addr(DhcpOptionCode::RequestedAddress, offered);
        writer.addr(DhcpOptionCode::ServerId, server);
        writer.end();

        self.create_dhcp_packet()
    }

    fn create_dhcp_packet(&mut self) -> Result<usize, TxError> {
        self.create_udp_packet(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            DHCP_CLIENT_PORT,
            DHCP_SERVER_PORT,
            MESSAGE_LEN,
        )
    }
}

/// Retry budget of a [`DhcpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpConfig {
    /// DISCOVER/REQUEST rounds before giving up.
    pub attempts: usize,
    /// DISCOVERs sent per round while no offer arrives.
    pub discover_retransmits: usize,
    /// Checks made while waiting for a reply.
    pub wait_checks: usize,
    /// Busy-wait iterations between two checks.
    pub wait_spins: usize,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            attempts: DHCP_ATTEMPTS,
            discover_retransmits: DHCP_DISCOVER_RETRANSMITS,
            wait_checks: DHCP_WAIT_CHECKS,
            wait_spins: DHCP_WAIT_SPINS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub server: Ipv4Addr,
    pub seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpPoll {
    Pending,
    Bound(Lease),
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DhcpError {
    #[error("no DHCP lease after {attempts} attempts")]
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    Discover,
    AwaitOffer { checks: usize },
    Request,
    AwaitAck { checks: usize },
    Bound,
    GaveUp,
}

/// Foreground DHCP state machine.
///
/// [`DhcpClient::poll`] does at most one transmission or one bounded wait
/// per call, so it can be interleaved with other foreground work.
/// [`DhcpClient::acquire`] polls until the outcome is known.
#[derive(Debug)]
pub struct DhcpClient {
    config: DhcpConfig,
    step: Step,
    attempt: usize,
    retransmits: usize,
}

impl Default for DhcpClient {
    fn default() -> Self {
        Self::new(DhcpConfig::default())
    }
}

impl DhcpClient {
    #[must_use]
    pub const fn new(config: DhcpConfig) -> Self {
        Self {
            config,
            step: Step::Start,
            attempt: 0,
            retransmits: 0,
        }
    }

    /// Starts over from `Init` on the next poll.
    pub fn restart(&mut self) {
        self.step = Step::Start;
    }

    /// Runs the exchange to completion.
    ///
    /// Once bound, the IP filter accepts every packet sent to the leased
    /// address. On failure the session is left without an address.
    pub fn acquire<R>(&mut self, tx: &mut Transmitter<'_, R>) -> Result<Lease, DhcpError>
    where
        R: Registers,
    {
        self.restart();
        loop {
            match self.poll(tx) {
                DhcpPoll::Pending => {}
                DhcpPoll::Bound(lease) => return Ok(lease),
                DhcpPoll::GaveUp => {
                    return Err(DhcpError::Exhausted {
                        attempts: self.config.attempts,
                    });
                }
            }
        }
    }

    pub fn poll<R>(&mut self, tx: &mut Transmitter<'_, R>) -> DhcpPoll
    where
        R: Registers,
    {
        let stack = tx.stack();
        let session = stack.session();
        match self.step {
            Step::Start => {
                stack.set_filter(IpFilter::for_protocol(IpProtocol::Udp));
                session.reset();
                session.set_transaction_id(initial_transaction_id(stack.mac()));
                self.attempt = 0;
                self.retransmits = 0;
                self.step = Step::Discover;
            }
            Step::Discover => {
                if self.retransmits >= self.config.discover_retransmits {
                    self.next_attempt(tx);
                } else {
                    self.retransmits += 1;
                    let xid = session.begin_discover();
                    log::debug!(
                        target: "plasma_net::dhcp",
                        "DISCOVER {xid:#010x} (round {}, try {})",
                        self.attempt + 1,
                        self.retransmits
                    );
                    let len = tx.create_dhcp_discover(xid);
                    send(tx, len);
                    self.step = Step::AwaitOffer { checks: 0 };
                }
            }
            Step::AwaitOffer { checks } => {
                self.spin();
                if !session.own_address().is_unspecified() {
                    self.step = Step::Request;
                } else if checks + 1 >= self.config.wait_checks {
                    self.step = Step::Discover;
                } else {
                    self.step = Step::AwaitOffer { checks: checks + 1 };
                }
            }
            Step::Request => {
                // Later offers are ignored once requesting.
                session.set_state(DhcpState::Requesting);
                let offered = session.own_address();
                let server = session.server_address();
                log::debug!(target: "plasma_net::dhcp", "REQUEST {offered} from {server}");
                let len = tx
                    .create_dhcp_discover(session.transaction_id())
                    .and_then(|_| tx.change_to_dhcp_request(offered, server));
                send(tx, len);
                self.step = Step::AwaitAck { checks: 0 };
            }
            Step::AwaitAck { checks } => {
                self.spin();
                if session.lease_seconds() != 0 {
                    session.set_state(DhcpState::Bound);
                    let lease = session.lease();
                    stack.set_filter(IpFilter::new(Ipv4Addr::UNSPECIFIED, lease.address, 0));
                    log::info!(
                        target: "plasma_net::dhcp",
                        "bound to {} for {}s",
                        lease.address,
                        lease.seconds
                    );
                    self.step = Step::Bound;
                } else if checks + 1 >= self.config.wait_checks {
                    self.next_attempt(tx);
                } else {
                    self.step = Step::AwaitAck { checks: checks + 1 };
                }
            }
            Step::Bound | Step::GaveUp => {}
        }

        match self.step {
            Step::Bound => DhcpPoll::Bound(session.lease()),
            Step::GaveUp => DhcpPoll::GaveUp,
            _ => DhcpPoll::Pending,
        }
    }

    fn next_attempt<R>(&mut self, tx: &Transmitter<'_, R>) {
        self.attempt += 1;
        self.retransmits = 0;
        if self.attempt < self.config.attempts {
            self.step = Step::Discover;
            return;
        }
        log::warn!(
            target: "plasma_net::dhcp",
            "giving up after {} rounds",
            self.config.attempts
        );
        tx.stack().session().reset();
        self.step = Step::GaveUp;
    }

    fn spin(&self) {
        for _ in 0..self.config.wait_spins {
            core::hint::spin_loop();
        }
    }
}

/// Seeds transaction ids with the low four bytes of the MAC.
fn initial_transaction_id(mac: MacAddr) -> u32 {
    let [_, _, a, b, c, d] = mac.octets();
    u32::from_be_bytes([a, b, c, d])
}

fn send<R>(tx: &mut Transmitter<'_, R>, len: Result<usize, TxError>)
where
    R: Registers,
{
    if let Err(e) = len.and_then(|len| tx.send_buffered_packet(len)) {
        log::warn!(target: "plasma_net::dhcp", "send failed: {e}");
    }
}

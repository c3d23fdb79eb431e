use core::{
    net::Ipv4Addr,
    sync::atomic::{AtomicIsize, AtomicU8, AtomicU32, Ordering},
};

use plasma_net_params::MAX_PENDING_QUERIES;
use plasma_regs::{Registers, low_half};
use strum::FromRepr;

use crate::{IpFilter, MacAddr, Transmitter};

const EMPTY: isize = -1;
const LOCKED: isize = MAX_PENDING_QUERIES as isize;
const LAST: isize = LOCKED - 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum QueryKind {
    Arp = 1,
    Icmp = 2,
}

/// A reply the interrupt handler wants the foreground to send.
///
/// `payload[0..3]` holds the requester's MAC as three 16-bit words. For ARP
/// `payload[3]` is the IPv4 address to answer; for ICMP it is the echo
/// identifier and sequence number (`ident << 16 | seq`) and `filter`
/// describes the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingQuery {
    pub kind: QueryKind,
    pub filter: IpFilter,
    pub payload: [u32; 4],
}

#[derive(Debug)]
struct QuerySlot {
    kind: AtomicU8,
    source_addr: AtomicU32,
    dest_addr: AtomicU32,
    protocol: AtomicU8,
    payload: [AtomicU32; 4],
}

impl QuerySlot {
    const fn new() -> Self {
        Self {
            kind: AtomicU8::new(0),
            source_addr: AtomicU32::new(0),
            dest_addr: AtomicU32::new(0),
            protocol: AtomicU8::new(0),
            payload: [const { AtomicU32::new(0) }; 4],
        }
    }

    fn store(&self, query: &PendingQuery) {
        self.kind.store(query.kind as u8, Ordering::Relaxed);
        self.source_addr
            .store(query.filter.source_addr.to_bits(), Ordering::Relaxed);
        self.dest_addr
            .store(query.filter.dest_addr.to_bits(), Ordering::Relaxed);
        self.protocol
            .store(query.filter.protocol, Ordering::Relaxed);
        for (slot, word) in self.payload.iter().zip(query.payload) {
            slot.store(word, Ordering::Relaxed);
        }
    }

    fn load(&self) -> Option<PendingQuery> {
        let kind = QueryKind::from_repr(self.kind.load(Ordering::Relaxed))?;
        let filter = IpFilter::new(
            Ipv4Addr::from_bits(self.source_addr.load(Ordering::Relaxed)),
            Ipv4Addr::from_bits(self.dest_addr.load(Ordering::Relaxed)),
            self.protocol.load(Ordering::Relaxed),
        );
        let payload = [
            self.payload[0].load(Ordering::Relaxed),
            self.payload[1].load(Ordering::Relaxed),
            self.payload[2].load(Ordering::Relaxed),
            self.payload[3].load(Ordering::Relaxed),
        ];
        Some(PendingQuery {
            kind,
            filter,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    /// The top entry is at this index.
    Holding(usize),
    /// A [`QueryGuard`] is alive; pushes are dropped.
    Locked,
}

/// Bounded LIFO of [`PendingQuery`]s, filled by the interrupt handler and
/// drained by the foreground.
///
/// The top index is `-1` when empty and equals the capacity while the
/// foreground holds the lock, which is outside the range a push can
/// produce. Pushes onto a full or locked queue are dropped.
#[derive(Debug)]
pub struct QueryQueue {
    top: AtomicIsize,
    slots: [QuerySlot; MAX_PENDING_QUERIES],
}

impl Default for QueryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            top: AtomicIsize::new(EMPTY),
            slots: [const { QuerySlot::new() }; MAX_PENDING_QUERIES],
        }
    }

    /// Pushes a query. Returns `false` if the queue was full or locked.
    pub fn push(&self, query: &PendingQuery) -> bool {
        let top = self.top.load(Ordering::Acquire);
        if top >= LAST {
            return false;
        }
        let index = top + 1;
        self.slots[index.unsigned_abs()].store(query);
        self.top
            .compare_exchange(top, index, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Takes the lock on the top entry.
    ///
    /// Returns `None` if the queue is empty or already locked. Dropping the
    /// guard removes the entry and releases the lock.
    pub fn lock(&self) -> Option<QueryGuard<'_>> {
        let top = self.top.swap(LOCKED, Ordering::AcqRel);
        match top {
            LOCKED => None,
            EMPTY => {
                self.top.store(EMPTY, Ordering::Release);
                None
            }
            index => Some(QueryGuard { queue: self, index }),
        }
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        match self.top.load(Ordering::Acquire) {
            EMPTY => QueueState::Empty,
            LOCKED => QueueState::Locked,
            index => QueueState::Holding(index.unsigned_abs()),
        }
    }

    /// Returns the number of queued entries, or `None` while locked.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self.state() {
            QueueState::Empty => Some(0),
            QueueState::Holding(index) => Some(index + 1),
            QueueState::Locked => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state() == QueueState::Empty
    }
}

/// Exclusive access to the top entry of a [`QueryQueue`].
#[derive(Debug)]
pub struct QueryGuard<'a> {
    queue: &'a QueryQueue,
    index: isize,
}

impl QueryGuard<'_> {
    #[must_use]
    pub fn query(&self) -> Option<PendingQuery> {
        self.queue.slots[self.index.unsigned_abs()].load()
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.queue.top.store(self.index - 1, Ordering::Release);
    }
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    /// Answers the most recently queued ARP or ICMP query, if any.
    ///
    /// The TX destination MAC is restored afterwards, so this can be called
    /// between application packets. The entry is consumed even if the reply
    /// cannot be sent.
    pub fn service_queries(&mut self) -> Option<QueryKind> {
        let guard = self.stack().queries().lock()?;
        let query = guard.query()?;
        log::debug!(
            target: "plasma_net::query",
            "{:?} query at {}",
            query.kind,
            guard.index
        );

        let saved = self.dest_mac();
        let res = match query.kind {
            QueryKind::Arp => {
                let (mac, ip) = split_payload(&query);
                self.send_arp_reply(mac, ip)
            }
            QueryKind::Icmp => self.send_echo_reply(&query),
        };
        self.set_dest_mac(saved);
        if let Err(e) = res {
            log::debug!(target: "plasma_net::query", "{:?} reply not sent: {e}", query.kind);
        }
        Some(query.kind)
    }
}

/// Packs a requester MAC and one extra word into a query payload.
pub(crate) fn make_payload(mac: MacAddr, last: u32) -> [u32; 4] {
    let [high, mid, low] = mac.to_words();
    [u32::from(high), u32::from(mid), u32::from(low), last]
}

/// Splits a query payload into the requester's MAC and the last word.
pub(crate) fn split_payload(query: &PendingQuery) -> (MacAddr, Ipv4Addr) {
    let [high, mid, low, last] = query.payload;
    let mac = MacAddr::from_words([low_half(high), low_half(mid), low_half(low)]);
    (mac, Ipv4Addr::from_bits(last))
}

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

use plasma_net_params::RX_BUFFER_LEN;
use plasma_regs::{EtherReg, IrqLines, IrqReg, Registers, RxBank, low_half};

use crate::{
    ActiveFilter, DhcpSession, EthType, IpFilter, MacAddr, QueryQueue, dispatch,
};

/// State shared between the receive interrupt and the foreground.
///
/// Every field is immutable, made of atomics or guarded by an atomic flag,
/// so a `NetStack` can be placed in a `static` and used through `&self` from
/// both sides. Received frames are copied into a buffer owned by the stack,
/// not onto the interrupt stack.
#[derive(Debug)]
pub struct NetStack<R> {
    regs: R,
    mac: MacAddr,
    filter: ActiveFilter,
    session: DhcpSession,
    queries: QueryQueue,
    rx_scratch: RxScratch,
}

/// Buffer a received frame is copied into while it is dispatched.
#[derive(Debug)]
struct RxScratch {
    busy: AtomicBool,
    buf: UnsafeCell<[u8; RX_BUFFER_LEN]>,
}

// `buf` is only reached through `with`, which lets one caller in at a time.
unsafe impl Sync for RxScratch {}

impl RxScratch {
    const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            buf: UnsafeCell::new([0; RX_BUFFER_LEN]),
        }
    }

    /// Runs `f` on the buffer, or returns `None` if it is already in use.
    fn with<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut [u8; RX_BUFFER_LEN]) -> T,
    {
        if self.busy.swap(true, Ordering::Acquire) {
            return None;
        }
        let res = f(unsafe { &mut *self.buf.get() });
        self.busy.store(false, Ordering::Release);
        Some(res)
    }
}

impl<R> NetStack<R> {
    /// Creates a stack that accepts every packet and has no address yet.
    #[must_use]
    pub const fn new(regs: R, mac: MacAddr) -> Self {
        Self {
            regs,
            mac,
            filter: ActiveFilter::new(IpFilter::ANY),
            session: DhcpSession::new(),
            queries: QueryQueue::new(),
            rx_scratch: RxScratch::new(),
        }
    }

    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    #[must_use]
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    #[must_use]
    pub fn filter(&self) -> &ActiveFilter {
        &self.filter
    }

    pub fn set_filter(&self, filter: IpFilter) {
        self.filter.store(filter);
    }

    #[must_use]
    pub fn session(&self) -> &DhcpSession {
        &self.session
    }

    #[must_use]
    pub fn queries(&self) -> &QueryQueue {
        &self.queries
    }
}

impl<R> NetStack<R>
where
    R: Registers,
{
    /// Programs the MAC and enables its receive interrupt.
    ///
    /// Installing the interrupt vector and enabling interrupts on the CPU
    /// are left to the platform.
    pub fn init(&self) {
        let regs = &self.regs;
        let [high, mid, low] = self.mac.to_words();
        regs.write(EtherReg::OwnMacHigh.addr(), u32::from(high));
        regs.write(EtherReg::OwnMacMid.addr(), u32::from(mid));
        regs.write(EtherReg::OwnMacLow.addr(), u32::from(low));
        for bank in RxBank::ALL {
            regs.write(EtherReg::RxPacketLength.banked(bank), 0);
        }
        regs.write(EtherReg::TxType.addr(), u32::from(EthType::Ipv4 as u16));
        regs.write(IrqReg::MaskSet.addr(), IrqLines::ETHERNET.bits());
        regs.write(IrqReg::StatusClr.addr(), IrqLines::ETHERNET.bits());
        log::info!("ethernet up, mac {}", self.mac);
    }

    /// Receive interrupt handler.
    ///
    /// Dispatches the frame held by each receive bank and frees the bank,
    /// then acknowledges `irq_status` at the interrupt controller. Banks are
    /// freed whether or not their frame was accepted.
    pub fn handle_interrupt(&self, irq_status: u32) {
        let regs = &self.regs;
        let drained = self.rx_scratch.with(|frame| {
            for bank in RxBank::ALL {
                let len = regs.read(EtherReg::RxPacketLength.banked(bank));
                if len != 0 {
                    let len =
                        usize::try_from(len).map_or(RX_BUFFER_LEN, |len| len.min(RX_BUFFER_LEN));
                    let frame = &mut frame[..len];
                    regs.read_bytes(EtherReg::RxBuf.banked(bank), frame);
                    let ether_type = low_half(regs.read(EtherReg::RxType.banked(bank)));
                    dispatch::handle_receive(self, bank, ether_type, frame);
                }
                regs.write(EtherReg::RxPacketLength.banked(bank), 0);
            }
        });
        if drained.is_none() {
            // The outer invocation drains the banks and acknowledges.
            log::warn!(target: "plasma_net::rx", "receive interrupt re-entered");
            return;
        }
        regs.write(IrqReg::StatusClr.addr(), irq_status);
    }

    /// Returns the source MAC of the frame held by `bank`.
    pub(crate) fn rx_src_mac(&self, bank: RxBank) -> MacAddr {
        let regs = &self.regs;
        MacAddr::from_words([
            low_half(regs.read(EtherReg::RxSrcMacHigh.banked(bank))),
            low_half(regs.read(EtherReg::RxSrcMacMid.banked(bank))),
            low_half(regs.read(EtherReg::RxSrcMacLow.banked(bank))),
        ])
    }
}

#[cfg(test)]
mod tests {
    use plasma_regs::SimRegisters;

    use super::*;

    fn stack() -> NetStack<SimRegisters> {
        NetStack::new(
            SimRegisters::new(),
            MacAddr::new(plasma_net_params::OWN_MAC),
        )
    }

    #[test]
    fn test_init() {
        let stack = stack();
        let regs = stack.regs();
        regs.write(EtherReg::RxPacketLength.banked(RxBank::Second), 60);
        stack.init();
        assert_eq!(regs.peek(EtherReg::OwnMacHigh.addr()), 0x020a);
        assert_eq!(regs.peek(EtherReg::OwnMacMid.addr()), 0x3544);
        assert_eq!(regs.peek(EtherReg::OwnMacLow.addr()), 0x5441);
        assert_eq!(regs.peek(EtherReg::RxPacketLength.banked(RxBank::Second)), 0);
        assert_eq!(regs.peek(EtherReg::TxType.addr()), 0x0800);
        assert_eq!(regs.peek(IrqReg::MaskSet.addr()), IrqLines::ETHERNET.bits());
    }

    #[test]
    fn test_interrupt_frees_both_banks() {
        let stack = stack();
        let regs = stack.regs();
        // Unknown EtherType in one bank, truncated IPv4 in the other.
        regs.load_frame(RxBank::First, 0x86dd, [2, 0, 0, 0, 0, 1], &[0x60; 40]);
        regs.load_frame(RxBank::Second, 0x0800, [2, 0, 0, 0, 0, 1], &[0x45; 8]);
        stack.handle_interrupt(IrqLines::ETHERNET.bits());

        for bank in RxBank::ALL {
            assert_eq!(regs.peek(EtherReg::RxPacketLength.banked(bank)), 0);
        }
        assert_eq!(regs.peek(IrqReg::Status.addr()), 0);
        assert!(stack.queries().lock().is_none());
    }

    #[test]
    fn test_scratch_is_exclusive() {
        let scratch = RxScratch::new();
        let inner = scratch.with(|buf| {
            buf[0] = 0x45;
            scratch.with(|_| ())
        });
        assert_eq!(inner, Some(None));
        assert_eq!(scratch.with(|buf| buf[0]), Some(0x45));
    }

    #[test]
    fn test_rx_src_mac() {
        let stack = stack();
        let src = [0x70, 0xf3, 0x95, 0x00, 0x72, 0x1f];
        stack.regs().load_frame(RxBank::Second, 0x0806, src, &[0; 28]);
        assert_eq!(stack.rx_src_mac(RxBank::Second), MacAddr::new(src));
        assert_eq!(stack.rx_src_mac(RxBank::First), MacAddr::ZERO);
    }
}

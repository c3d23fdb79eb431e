use plasma_net_params::TX_BUFFER_LEN;
use plasma_regs::{EtherReg, Registers, TxControl, low_half};

use crate::{EthType, MacAddr, NetStack, TxError};

/// Foreground handle on the transmit side of the MAC.
///
/// Packets are built in a staging buffer and copied into the TX window by
/// [`Transmitter::send_buffered_packet`], so a packet can be assembled while
/// the previous one is still being sent. ARP and ICMP replies are written
/// straight to the window and leave the staging buffer untouched.
///
/// There must be only one `Transmitter` per [`NetStack`]; the interrupt
/// handler never transmits.
pub struct Transmitter<'a, R> {
    stack: &'a NetStack<R>,
    buf: [u8; TX_BUFFER_LEN],
}

impl<'a, R> Transmitter<'a, R> {
    #[must_use]
    pub const fn new(stack: &'a NetStack<R>) -> Self {
        Self {
            stack,
            buf: [0; TX_BUFFER_LEN],
        }
    }

    #[must_use]
    pub fn stack(&self) -> &'a NetStack<R> {
        self.stack
    }

    /// Returns the staging buffer. Byte 0 is the first byte of the IPv4
    /// header.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl<R> Transmitter<'_, R>
where
    R: Registers,
{
    fn regs(&self) -> &R {
        self.stack.regs()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        TxControl::from_bits_retain(self.regs().read(EtherReg::TxControl.addr()))
            .contains(TxControl::BUSY)
    }

    /// Spins until the MAC has finished the current transmission.
    pub fn wait_for_tx_to_finish(&self) {
        while self.is_busy() {
            core::hint::spin_loop();
        }
    }

    /// Sends the first `len` bytes of the staging buffer.
    pub fn send_buffered_packet(&mut self, len: usize) -> Result<(), TxError> {
        let Some(bytes) = self.buf.get(..len) else {
            return Err(TxError::TooLarge(len));
        };
        send_raw(self.stack.regs(), bytes)
    }

    /// Sends `bytes` directly through the TX window.
    pub(crate) fn send_now(&self, bytes: &[u8]) -> Result<(), TxError> {
        if bytes.len() > TX_BUFFER_LEN {
            return Err(TxError::TooLarge(bytes.len()));
        }
        send_raw(self.regs(), bytes)
    }

    /// Returns the destination MAC used for subsequent packets.
    #[must_use]
    pub fn dest_mac(&self) -> MacAddr {
        let regs = self.regs();
        MacAddr::from_words([
            low_half(regs.read(EtherReg::TxDestMacHigh.addr())),
            low_half(regs.read(EtherReg::TxDestMacMid.addr())),
            low_half(regs.read(EtherReg::TxDestMacLow.addr())),
        ])
    }

    /// Sets the destination MAC for subsequent packets.
    ///
    /// Waits for the current transmission first.
    pub fn set_dest_mac(&self, mac: MacAddr) {
        self.wait_for_tx_to_finish();
        let [high, mid, low] = mac.to_words();
        let regs = self.regs();
        regs.write(EtherReg::TxDestMacHigh.addr(), u32::from(high));
        regs.write(EtherReg::TxDestMacMid.addr(), u32::from(mid));
        regs.write(EtherReg::TxDestMacLow.addr(), u32::from(low));
    }

    /// Sets the `EtherType` the MAC puts in front of subsequent packets.
    ///
    /// Waits for the current transmission first.
    pub fn set_ether_type(&self, ty: EthType) {
        self.wait_for_tx_to_finish();
        self.regs()
            .write(EtherReg::TxType.addr(), u32::from(ty as u16));
    }
}

fn send_raw<R>(regs: &R, bytes: &[u8]) -> Result<(), TxError>
where
    R: Registers,
{
    let Ok(len) = u32::try_from(bytes.len()) else {
        return Err(TxError::TooLarge(bytes.len()));
    };
    while TxControl::from_bits_retain(regs.read(EtherReg::TxControl.addr()))
        .contains(TxControl::BUSY)
    {
        core::hint::spin_loop();
    }
    regs.write_bytes(EtherReg::TxBuf.addr(), bytes);
    regs.write(EtherReg::TxPacketLength.addr(), len);
    regs.write(EtherReg::TxControl.addr(), TxControl::START.bits());
    Ok(())
}

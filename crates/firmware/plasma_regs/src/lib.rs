//! Register access for the Plasma SoC peripherals used by the network stack.
//!
//! Every peripheral is reached through 32-bit words at fixed physical
//! addresses. [`Registers`] is the only seam between protocol code and the
//! hardware: [`Mmio`] implements it with volatile accesses on the target, and
//! `SimRegisters` (feature `sim`) implements it with an in-memory word map so
//! the protocol code can run on a host.
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

pub use self::{
    map::{
        ETHER_BASE, EtherReg, IrqLines, IrqReg, PERIPH_BASE, RX_SELECT_MASK, RxBank, TxControl,
        UartReg, UartStatus, low_half, mac_from_words, mac_to_words,
    },
    mmio::Mmio,
};
#[cfg(any(test, feature = "sim"))]
pub use self::sim::{SimRegisters, Transmission};

mod map;
mod mmio;
#[cfg(any(test, feature = "sim"))]
mod sim;

/// Word-granular access to a physical memory map.
pub trait Registers {
    /// Reads the 32-bit word at `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Writes `value` to the 32-bit word at `addr`.
    fn write(&self, addr: u32, value: u32);

    /// Copies `buf.len()` bytes out of the window starting at `addr`.
    ///
    /// Words are stored big-endian, so the first byte of the window is the
    /// most significant byte of the first word.
    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        let mut word_addr = addr;
        for chunk in buf.chunks_mut(4) {
            let word = self.read(word_addr).to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
            word_addr = word_addr.wrapping_add(4);
        }
    }

    /// Copies `bytes` into the window starting at `addr`.
    ///
    /// A trailing partial word is zero-padded.
    fn write_bytes(&self, addr: u32, bytes: &[u8]) {
        let mut word_addr = addr;
        for chunk in bytes.chunks(4) {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write(word_addr, u32::from_be_bytes(word));
            word_addr = word_addr.wrapping_add(4);
        }
    }
}

impl<R> Registers for &R
where
    R: Registers + ?Sized,
{
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value);
    }
}

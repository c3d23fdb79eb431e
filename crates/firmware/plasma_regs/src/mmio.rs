use core::ptr;

use crate::Registers;

/// Volatile access to the physical memory map of the running SoC.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Returns a handle to the physical memory map.
    ///
    /// # Safety
    ///
    /// The caller must be running on the Plasma SoC with the peripheral block
    /// mapped at its physical addresses, and must only pass addresses from
    /// the memory map to [`Registers::read`] and [`Registers::write`].
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn reg(addr: u32) -> *mut u32 {
        ptr::with_exposed_provenance_mut::<u32>(addr as usize)
    }
}

impl Registers for Mmio {
    fn read(&self, addr: u32) -> u32 {
        unsafe { Self::reg(addr).read_volatile() }
    }

    fn write(&self, addr: u32, value: u32) {
        unsafe { Self::reg(addr).write_volatile(value) }
    }
}

use bitflags::bitflags;

/// Base address of the peripheral block (UART, interrupt controller, ...).
pub const PERIPH_BASE: u32 = 0x2000_0000;

/// Base address of the Ethernet MAC.
pub const ETHER_BASE: u32 = 0x2001_0000;

/// XOR mask selecting the second receive bank.
pub const RX_SELECT_MASK: u32 = 0x0800;

/// Ethernet MAC registers, as offsets from [`ETHER_BASE`].
///
/// MAC addresses are split over three registers holding 16 bits each, most
/// significant bytes in `*High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EtherReg {
    /// Own MAC address, bytes 0-1 - RW
    OwnMacHigh = 0x0024,
    /// Own MAC address, bytes 2-3 - RW
    OwnMacMid = 0x0028,
    /// Own MAC address, bytes 4-5 - RW
    OwnMacLow = 0x002C,
    /// Transmit buffer window, starts at the IPv4/ARP header
    TxBuf = 0x2000,
    /// TX Control - RW, see [`TxControl`]
    TxControl = 0x3000,
    /// TX packet length in bytes, Ethernet header excluded - RW
    TxPacketLength = 0x3020,
    /// TX destination MAC, bytes 0-1 - RW
    TxDestMacHigh = 0x3024,
    /// TX destination MAC, bytes 2-3 - RW
    TxDestMacMid = 0x3028,
    /// TX destination MAC, bytes 4-5 - RW
    TxDestMacLow = 0x302C,
    /// TX `EtherType` - RW
    TxType = 0x3030,
    /// Receive buffer window, starts at the IPv4/ARP header. Banked.
    RxBuf = 0x4000,
    /// RX Control - RW. Banked.
    RxControl = 0x5000,
    /// RX packet length, zero when the bank is free - RW. Banked.
    RxPacketLength = 0x5020,
    /// RX destination MAC, bytes 0-1 - R. Banked.
    RxDestMacHigh = 0x5024,
    /// RX destination MAC, bytes 2-3 - R. Banked.
    RxDestMacMid = 0x5028,
    /// RX destination MAC, bytes 4-5 - R. Banked.
    RxDestMacLow = 0x502C,
    /// RX `EtherType` (or 802.3 length) - R. Banked.
    RxType = 0x5030,
    /// RX source MAC, bytes 0-1 - R. Banked.
    RxSrcMacHigh = 0x5034,
    /// RX source MAC, bytes 2-3 - R. Banked.
    RxSrcMacMid = 0x5038,
    /// RX source MAC, bytes 4-5 - R. Banked.
    RxSrcMacLow = 0x503C,
    /// CRC computed over the received frame - R. Banked.
    RxCrcActual = 0x5040,
    /// CRC carried by the received frame - R. Banked.
    RxCrcExpected = 0x5044,
}

impl EtherReg {
    /// Returns the absolute address of the register.
    #[must_use]
    pub const fn addr(self) -> u32 {
        ETHER_BASE + self as u32
    }

    /// Returns the address of the register within the given receive bank.
    #[must_use]
    pub const fn banked(self, bank: RxBank) -> u32 {
        self.addr() ^ bank.select()
    }
}

/// One of the two receive buffers the MAC fills alternately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxBank {
    First,
    Second,
}

impl RxBank {
    /// Both banks, in the order the interrupt handler drains them.
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// Returns the XOR mask applied to RX addresses for this bank.
    #[must_use]
    pub const fn select(self) -> u32 {
        match self {
            Self::First => 0,
            Self::Second => RX_SELECT_MASK,
        }
    }
}

/// Interrupt controller registers, as offsets from [`PERIPH_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IrqReg {
    Status = 0x40,
    StatusClr = 0x44,
    Vector = 0x4C,
    Mask = 0x50,
    MaskSet = 0x54,
    MaskClr = 0x58,
}

impl IrqReg {
    #[must_use]
    pub const fn addr(self) -> u32 {
        PERIPH_BASE + self as u32
    }
}

/// UART registers, as offsets from [`PERIPH_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UartReg {
    Tx = 0x00,
    Rx = 0x04,
    Status = 0x08,
    Control = 0x0C,
    BaudDiv = 0x10,
}

impl UartReg {
    #[must_use]
    pub const fn addr(self) -> u32 {
        PERIPH_BASE + self as u32
    }
}

bitflags! {
    /// TX Control register values
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxControl: u32 {
        /// start transmitting the staged packet
        const START = 0x0000_0002;
        /// a transmission is in progress
        const BUSY  = 0x0000_0004;
    }
}

bitflags! {
    /// UART Status register values
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UartStatus: u32 {
        /// transmitter cannot accept a character
        const TX_BUSY       = 0x0000_0001;
        /// a received character is waiting in RX
        const RX_DATA_VALID = 0x0000_0008;
    }
}

bitflags! {
    /// Interrupt lines of the interrupt controller
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqLines: u32 {
        const ETHERNET = 0x0000_0004;
    }
}

/// Returns the low 16 bits of a register value.
#[must_use]
pub const fn low_half(value: u32) -> u16 {
    let [_, _, hi, lo] = value.to_be_bytes();
    u16::from_be_bytes([hi, lo])
}

/// Splits a MAC address into the three 16-bit register values.
#[must_use]
pub const fn mac_to_words(mac: [u8; 6]) -> [u16; 3] {
    [
        u16::from_be_bytes([mac[0], mac[1]]),
        u16::from_be_bytes([mac[2], mac[3]]),
        u16::from_be_bytes([mac[4], mac[5]]),
    ]
}

/// Joins three 16-bit register values into a MAC address.
#[must_use]
pub const fn mac_from_words(words: [u16; 3]) -> [u8; 6] {
    let [a, b] = words[0].to_be_bytes();
    let [c, d] = words[1].to_be_bytes();
    let [e, f] = words[2].to_be_bytes();
    [a, b, c, d, e, f]
}

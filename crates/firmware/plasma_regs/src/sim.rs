use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use crate::{
    Registers,
    map::{
        EtherReg, IrqLines, IrqReg, RxBank, TxControl, UartReg, UartStatus, low_half,
        mac_from_words, mac_to_words,
    },
};

/// A packet handed to the MAC by writing [`TxControl::START`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub dest_mac: [u8; 6],
    pub ether_type: u16,
    /// Bytes from the start of the TX window, `TxPacketLength` long.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    words: HashMap<u32, u32>,
    transmissions: Vec<Transmission>,
    uart_output: Vec<u8>,
    uart_input: VecDeque<u8>,
    tx_busy_polls: usize,
}

impl State {
    fn word(&self, addr: u32) -> u32 {
        self.words.get(&addr).copied().unwrap_or(0)
    }

    fn capture_transmission(&mut self) {
        let len = usize::try_from(self.word(EtherReg::TxPacketLength.addr())).unwrap_or(0);
        let mut payload = Vec::with_capacity(len);
        let mut addr = EtherReg::TxBuf.addr();
        while payload.len() < len {
            let word = self.word(addr).to_be_bytes();
            let take = usize::min(4, len - payload.len());
            payload.extend_from_slice(&word[..take]);
            addr += 4;
        }
        let dest_mac = mac_from_words([
            low_half(self.word(EtherReg::TxDestMacHigh.addr())),
            low_half(self.word(EtherReg::TxDestMacMid.addr())),
            low_half(self.word(EtherReg::TxDestMacLow.addr())),
        ]);
        let ether_type = low_half(self.word(EtherReg::TxType.addr()));
        self.transmissions.push(Transmission {
            dest_mac,
            ether_type,
            payload,
        });
    }
}

/// Host-side stand-in for the SoC memory map.
///
/// Plain registers behave as memory. The TX control register, the UART and
/// the receive banks get just enough behaviour for the network stack to be
/// driven from tests:
///
/// * writing [`TxControl::START`] captures a [`Transmission`],
/// * [`TxControl::BUSY`] reads as set for as many polls as requested by
///   [`SimRegisters::hold_tx_busy`],
/// * UART TX writes are collected and UART RX reads drain an input queue.
#[derive(Debug, Default)]
pub struct SimRegisters {
    state: Mutex<State>,
}

impl SimRegisters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads a word without triggering any register side effect.
    #[must_use]
    pub fn peek(&self, addr: u32) -> u32 {
        self.lock().word(addr)
    }

    /// Places a received frame into `bank` as the MAC would, and raises the
    /// Ethernet interrupt status line.
    pub fn load_frame(&self, bank: RxBank, ether_type: u16, src_mac: [u8; 6], frame: &[u8]) {
        self.write_bytes(EtherReg::RxBuf.banked(bank), frame);
        self.write(EtherReg::RxType.banked(bank), u32::from(ether_type));
        let src = mac_to_words(src_mac);
        self.write(EtherReg::RxSrcMacHigh.banked(bank), u32::from(src[0]));
        self.write(EtherReg::RxSrcMacMid.banked(bank), u32::from(src[1]));
        self.write(EtherReg::RxSrcMacLow.banked(bank), u32::from(src[2]));
        let len = u32::try_from(frame.len()).unwrap_or(u32::MAX);
        self.write(EtherReg::RxPacketLength.banked(bank), len);
        let status = self.peek(IrqReg::Status.addr());
        self.write(IrqReg::Status.addr(), status | IrqLines::ETHERNET.bits());
    }

    /// Returns every packet transmitted since the last call.
    pub fn take_transmissions(&self) -> Vec<Transmission> {
        core::mem::take(&mut self.lock().transmissions)
    }

    /// Returns everything written to the UART so far.
    #[must_use]
    pub fn uart_output(&self) -> Vec<u8> {
        self.lock().uart_output.clone()
    }

    /// Queues bytes to be read from the UART.
    pub fn push_uart_input(&self, bytes: &[u8]) {
        self.lock().uart_input.extend(bytes);
    }

    /// Makes the TX control register report busy for the next `polls` reads.
    pub fn hold_tx_busy(&self, polls: usize) {
        self.lock().tx_busy_polls = polls;
    }
}

impl Registers for SimRegisters {
    fn read(&self, addr: u32) -> u32 {
        let mut state = self.lock();
        if addr == EtherReg::TxControl.addr() {
            let mut value = state.word(addr) & !TxControl::BUSY.bits();
            if state.tx_busy_polls > 0 {
                state.tx_busy_polls -= 1;
                value |= TxControl::BUSY.bits();
            }
            return value;
        }
        if addr == UartReg::Status.addr() {
            if state.uart_input.is_empty() {
                return 0;
            }
            return UartStatus::RX_DATA_VALID.bits();
        }
        if addr == UartReg::Rx.addr() {
            return state.uart_input.pop_front().map_or(0, u32::from);
        }
        state.word(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        let mut state = self.lock();
        if addr == EtherReg::TxControl.addr() {
            if value & TxControl::START.bits() != 0 {
                state.capture_transmission();
            }
            state
                .words
                .insert(addr, value & !(TxControl::START | TxControl::BUSY).bits());
            return;
        }
        if addr == UartReg::Tx.addr() {
            let [.., byte] = value.to_be_bytes();
            state.uart_output.push(byte);
            return;
        }
        if addr == IrqReg::StatusClr.addr() {
            let status = state.word(IrqReg::Status.addr());
            state.words.insert(IrqReg::Status.addr(), status & !value);
            return;
        }
        state.words.insert(addr, value);
    }
}

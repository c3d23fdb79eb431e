//! Diagnostic byte stream over the SoC UART.

use core::{fmt, hint};

use log::{LevelFilter, Log, Metadata, Record};
use plasma_regs::{Registers, UartReg, UartStatus};

/// Blocking character I/O on the UART.
#[derive(Debug)]
pub struct Console<R> {
    regs: R,
}

impl<R> Console<R>
where
    R: Registers,
{
    #[must_use]
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    fn status(&self) -> UartStatus {
        UartStatus::from_bits_retain(self.regs.read(UartReg::Status.addr()))
    }

    /// Sends one byte, waiting while the transmitter is busy.
    pub fn write_char(&self, c: u8) {
        while self.status().contains(UartStatus::TX_BUSY) {
            hint::spin_loop();
        }
        self.regs.write(UartReg::Tx.addr(), u32::from(c));
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        for &c in bytes {
            self.write_char(c);
        }
    }

    /// Returns a received byte if one is waiting.
    pub fn try_read_char(&self) -> Option<u8> {
        if !self.status().contains(UartStatus::RX_DATA_VALID) {
            return None;
        }
        let [.., c] = self.regs.read(UartReg::Rx.addr()).to_be_bytes();
        Some(c)
    }

    /// Waits for a received byte.
    pub fn read_char(&self) -> u8 {
        loop {
            if let Some(c) = self.try_read_char() {
                return c;
            }
            hint::spin_loop();
        }
    }

    #[must_use]
    pub fn writer(&self) -> ConsoleWriter<'_, R> {
        ConsoleWriter { console: self }
    }
}

pub struct ConsoleWriter<'a, R> {
    console: &'a Console<R>,
}

impl<R> fmt::Write for ConsoleWriter<'_, R>
where
    R: Registers,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.console.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// [`log`] backend writing one line per record to a [`Console`].
///
/// ```text
/// [DEBUG plasma_net::dhcp] DISCOVER 0x35445442 (round 1, try 1)
/// ```
#[derive(Debug)]
pub struct ConsoleLogger<R> {
    console: Console<R>,
    level: LevelFilter,
}

impl<R> ConsoleLogger<R>
where
    R: Registers,
{
    #[must_use]
    pub const fn new(regs: R, level: LevelFilter) -> Self {
        Self {
            console: Console::new(regs),
            level,
        }
    }

    #[must_use]
    pub fn console(&self) -> &Console<R> {
        &self.console
    }
}

impl<R> Log for ConsoleLogger<R>
where
    R: Registers + Send + Sync,
{
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = self.console.writer();
        fmt::Write::write_fmt(
            &mut writer,
            format_args!("[{} {}] {}\r\n", record.level(), record.target(), record.args()),
        )
        .unwrap();
    }

    fn flush(&self) {}
}

//! Scripted stand-in for the chip on the other end of the UART.

use std::collections::{HashMap, VecDeque};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::nb;
use embedded_hal_nb::serial::{self, ErrorKind, ErrorType, Read, Write};

use crate::frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

impl serial::Error for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Answers read requests from a per-address script and records every frame written.
///
/// A register without a scripted answer falls back to its `registers` value; a register with
/// neither stays silent.
#[derive(Default)]
pub struct MockChip {
    pub registers: HashMap<u8, (u32, u8)>,
    pub scripted: HashMap<u8, VecDeque<Vec<u8>>>,
    pub written: Vec<Vec<u8>>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
}

impl MockChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chip that passes setup with valid stored coefficients.
    pub fn healthy() -> Self {
        let mut chip = Self::new();
        chip.set(0x00, 0x0A04, 2);
        chip.set(0x43, 0x10, 1);
        let coefficients: [u16; 8] = [52241, 52241, 42563, 44513, 44513, 44513, 44513, 44513];
        let mut sum = 0xFFFFu16;
        for (i, c) in coefficients.iter().enumerate() {
            chip.set(0x70 + i as u8, u32::from(*c), 2);
            sum = sum.wrapping_add(*c);
        }
        chip.set(0x6F, u32::from(!sum), 2);
        chip
    }

    pub fn set(&mut self, address: u8, value: u32, size: u8) {
        self.registers.insert(address, (value, size));
    }

    /// Queue a raw answer used once, before falling back to the register value.
    pub fn script(&mut self, address: u8, bytes: Vec<u8>) {
        self.scripted.entry(address).or_default().push_back(bytes);
    }

    pub fn read_requests(&self, address: u8) -> usize {
        self.written
            .iter()
            .filter(|f| f.as_slice() == [frame::HEADER, address])
            .count()
    }

    fn answer(&mut self, address: u8) {
        if let Some(bytes) = self.scripted.get_mut(&address).and_then(VecDeque::pop_front) {
            self.rx.extend(bytes);
        } else if let Some((value, size)) = self.registers.get(&address) {
            let payload = &value.to_be_bytes()[4 - *size as usize..];
            self.rx.extend(frame::response(address, payload));
        }
    }
}

impl ErrorType for MockChip {
    type Error = MockError;
}

impl Read<u8> for MockChip {
    fn read(&mut self) -> nb::Result<u8, MockError> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockChip {
    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        self.pending.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let request = core::mem::take(&mut self.pending);
        if request.len() == 2 && request[0] == frame::HEADER {
            self.answer(request[1]);
        }
        self.written.push(request);
        Ok(())
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

use core::f32::consts::PI;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::nb;
use embedded_hal_nb::serial::{ErrorType, Read, Write};
use log::{debug, error, warn};

use crate::frame::{self, FrameError, Request, MAX_PAYLOAD};
use crate::register::{
    Coefficient, Command, Register, COEFFICIENT_COUNT, IREF, PREF, SPECIAL_COMMAND,
    SYSCON_RESET_VALUE, SYSSTATUS_WREN, UREF, WRITE_FLAG,
};

/// Attempts made by [`CSE7761Driver::read`] before giving up on a register.
pub const READ_ATTEMPTS: u8 = 3;

const BYTE_POLLS: u32 = 20;
const BYTE_POLL_US: u32 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    A,
    B,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CSE7761Error<E> {
    #[error("unable to connect to CSE7761")]
    Connect,
    #[error("serial error: {0:?}")]
    Serial(E),
    #[error("no response reading register {register:#04X}")]
    NoResponse { register: u8 },
    #[error("incomplete response from register {register:#04X}: {received} of {expected} bytes")]
    Incomplete {
        register: u8,
        received: usize,
        expected: usize,
    },
    #[error(
        "checksum mismatch reading register {register:#04X}: expected {expected:#04X}, received {received:#04X}"
    )]
    Checksum {
        register: u8,
        expected: u8,
        received: u8,
    },
    #[error("register {register:#04X} cannot hold {size} bytes")]
    InvalidSize { register: u8, size: usize },
    #[error("protected registers are not write enabled")]
    WriteProtected,
    #[error("conversion coefficient {0:?} is zero")]
    InvalidCoefficient(Coefficient),
}

type DriverResult<T, UART> = Result<T, CSE7761Error<<UART as ErrorType>::Error>>;

fn frame_error<E>(register: u8, err: FrameError) -> CSE7761Error<E> {
    match err {
        FrameError::Empty => CSE7761Error::NoResponse { register },
        FrameError::Oversized(size) => CSE7761Error::InvalidSize { register, size },
        FrameError::Checksum { expected, received } => CSE7761Error::Checksum {
            register,
            expected,
            received,
        },
    }
}

pub struct CSE7761Driver<UART, Delay> {
    uart: UART,
    delay: Delay,
    coefficients: [u16; COEFFICIENT_COUNT],
}

impl<UART, Delay> CSE7761Driver<UART, Delay> {
    /// Give back the serial port and delay.
    pub fn release(self) -> (UART, Delay) {
        (self.uart, self.delay)
    }

    pub fn coefficients(&self) -> &[u16; COEFFICIENT_COUNT] {
        &self.coefficients
    }
}

impl<UART, Delay> CSE7761Driver<UART, Delay>
where
    UART: Read<u8> + Write<u8>,
    Delay: DelayNs,
{
    /// Reset the chip, verify it answers, load its conversion coefficients and configure it for
    /// signed dual-channel power measurement.
    ///
    /// # Arguments
    ///
    /// * `uart`: The serial port, configured for 38400 baud, 8 data bits, even parity, 1 stop bit.
    /// * `delay`: Used while waiting for response bytes.
    ///
    /// returns: Result<CSE7761Driver<UART, Delay>, CSE7761Error<<UART as ErrorType>::Error>>
    pub fn new(uart: UART, delay: Delay) -> DriverResult<Self, UART> {
        let mut driver = Self {
            uart,
            delay,
            coefficients: [0; COEFFICIENT_COUNT],
        };

        driver.command(Command::Reset)?;
        let syscon = driver.read(Register::SysCon).map_err(|err| {
            warn!("CSE7761 did not answer after reset: {err}");
            CSE7761Error::Connect
        })?;
        if syscon != u32::from(SYSCON_RESET_VALUE) {
            warn!("Unexpected SYSCON value {syscon:#06X} after reset");
            return Err(CSE7761Error::Connect);
        }

        driver.load_coefficients();
        driver.init_chip()?;
        driver.command(Command::CloseWrite)?;
        debug!("CSE7761 found");

        Ok(driver)
    }

    /// RMS line voltage in volts.
    pub fn get_voltage(&mut self) -> DriverResult<f32, UART> {
        let raw = self.read(Register::RmsU)?;
        // readings with the top bit set are invalid
        let raw = if raw >= 0x80_0000 { 0 } else { raw };
        Ok(raw as f32 / self.conversion(Coefficient::RmsUC)?)
    }

    /// RMS current of `channel` in amperes, before software offset correction.
    pub fn get_current(&mut self, channel: Channel) -> DriverResult<f32, UART> {
        let (register, coefficient) = match channel {
            Channel::A => (Register::RmsIA, Coefficient::RmsIAC),
            Channel::B => (Register::RmsIB, Coefficient::RmsIBC),
        };
        let raw = frame::sign_extend_24(self.read(register)?);
        Ok(raw as f32 / self.conversion(coefficient)? / PI)
    }

    /// Signed active power of `channel` in watts, before software offset correction.
    pub fn get_active_power(&mut self, channel: Channel) -> DriverResult<f32, UART> {
        let (register, coefficient) = match channel {
            Channel::A => (Register::PowerPA, Coefficient::PowerPAC),
            Channel::B => (Register::PowerPB, Coefficient::PowerPBC),
        };
        let raw = self.read(register)? as i32;
        Ok(raw as f32 / self.conversion(coefficient)? / PI)
    }

    /// Divisor turning a raw reading into physical units.
    pub fn conversion(&self, coefficient: Coefficient) -> DriverResult<f32, UART> {
        let stored = u64::from(self.coefficients[coefficient as usize]);
        if stored == 0 {
            return Err(CSE7761Error::InvalidCoefficient(coefficient));
        }
        let divisor = match coefficient {
            Coefficient::RmsIAC | Coefficient::RmsIBC => (0x80_0000 * 100 / stored) * 10,
            Coefficient::RmsUC => 0x40_0000 * 100 / stored,
            _ => 0x8000_0000 / stored,
        };
        Ok(divisor as f32)
    }

    pub fn command(&mut self, command: Command) -> DriverResult<(), UART> {
        self.write(SPECIAL_COMMAND, command as u16)
    }

    /// Send `data` to `address` as is. Protected registers need [`WRITE_FLAG`] set on the address
    /// and a preceding [`Command::EnableWrite`].
    pub fn write(&mut self, address: u8, data: u16) -> DriverResult<(), UART> {
        self.send(frame::encode(address, data))
    }

    /// Write a protected register, enabling writes for the duration of the call.
    pub fn write_register(&mut self, address: u8, value: u16) -> DriverResult<(), UART> {
        self.command(Command::EnableWrite)?;
        self.write(address | WRITE_FLAG, value)?;
        self.command(Command::CloseWrite)
    }

    pub fn read(&mut self, register: Register) -> DriverResult<u32, UART> {
        self.read_address(register.address(), register.size())
    }

    /// Read a `size` byte register, retrying up to [`READ_ATTEMPTS`] times.
    pub fn read_address(&mut self, address: u8, size: u8) -> DriverResult<u32, UART> {
        let mut attempt = 1;
        loop {
            match self.read_once(address, size) {
                Ok(value) => return Ok(value),
                Err(err @ CSE7761Error::InvalidSize { .. }) => return Err(err),
                Err(err) if attempt < READ_ATTEMPTS => {
                    debug!("Reading register {address:#04X} attempt {attempt} failed: {err}");
                    attempt += 1;
                }
                Err(err) => {
                    error!("Reading register {address:#04X} failed: {err}");
                    return Err(err);
                }
            }
        }
    }

    /// Single read attempt. Bytes that never arrive are skipped, which leaves the checksum to
    /// reject the frame.
    pub fn read_once(&mut self, address: u8, size: u8) -> DriverResult<u32, UART> {
        let size = usize::from(size);
        if size == 0 || size > MAX_PAYLOAD {
            return Err(CSE7761Error::InvalidSize {
                register: address,
                size,
            });
        }

        self.drain();
        self.send(frame::read_request(address))?;

        let mut buffer = [0u8; MAX_PAYLOAD + 1];
        let mut received = 0;
        for _ in 0..=size {
            if let Some(byte) = self.receive_byte()? {
                buffer[received] = byte;
                received += 1;
            }
        }

        frame::decode_response(address, &buffer[..received])
            .map_err(|err| frame_error(address, err))
    }

    /// Read the raw payload of `address` into `buffer`, whose length is the register width.
    ///
    /// Unlike [`read`](Self::read) this makes a single attempt and fails on a short frame.
    pub fn read_raw(&mut self, address: u8, buffer: &mut [u8]) -> DriverResult<(), UART> {
        let size = buffer.len();
        if size == 0 || size > MAX_PAYLOAD {
            return Err(CSE7761Error::InvalidSize {
                register: address,
                size,
            });
        }

        self.drain();
        self.send(frame::read_request(address))?;

        let mut response = [0u8; MAX_PAYLOAD + 1];
        for received in 0..=size {
            match self.receive_byte()? {
                Some(byte) => response[received] = byte,
                None => {
                    warn!(
                        "Incomplete read of register {address:#04X}: {received} of {} bytes",
                        size + 1
                    );
                    return Err(CSE7761Error::Incomplete {
                        register: address,
                        received,
                        expected: size + 1,
                    });
                }
            }
        }

        frame::decode_response(address, &response[..=size])
            .map_err(|err| frame_error(address, err))?;
        buffer.copy_from_slice(&response[..size]);

        Ok(())
    }

    /// An unreadable coefficient or checksum register counts as zero, which fails the checksum and
    /// selects the reference coefficients.
    fn load_coefficients(&mut self) {
        let mut sum = 0xFFFFu16;
        for (index, coefficient) in (0..COEFFICIENT_COUNT).zip(Register::RmsIAC.address()..) {
            let value = self.read_or_zero(coefficient, 2);
            self.coefficients[index] = value;
            sum = sum.wrapping_add(value);
        }

        let calculated = !sum;
        let stored = self.read_or_zero(
            Register::CoeffChecksum.address(),
            Register::CoeffChecksum.size(),
        );
        if calculated != stored || calculated == 0 {
            debug!("Default calibration");
            self.coefficients[Coefficient::RmsIAC as usize] = IREF;
            self.coefficients[Coefficient::RmsIBC as usize] = IREF;
            self.coefficients[Coefficient::RmsUC as usize] = UREF;
            self.coefficients[Coefficient::PowerPAC as usize] = PREF;
            self.coefficients[Coefficient::PowerPBC as usize] = PREF;
        }
    }

    fn read_or_zero(&mut self, address: u8, size: u8) -> u16 {
        match self.read_address(address, size) {
            Ok(value) => value as u16,
            Err(err) => {
                debug!("Coefficient register {address:#04X} unreadable: {err}");
                0
            }
        }
    }

    fn init_chip(&mut self) -> DriverResult<(), UART> {
        self.command(Command::EnableWrite)?;

        let status = self.read(Register::SysStatus)? as u8;
        if status & SYSSTATUS_WREN == 0 {
            debug!("Write failed at chip init");
            return Err(CSE7761Error::WriteProtected);
        }

        self.write(Register::SysCon.address() | WRITE_FLAG, 0xFF04)?;
        // signed power, frequency measurement off
        self.write(Register::EmuCon.address() | WRITE_FLAG, 0x1583)?;
        self.write(Register::EmuCon2.address() | WRITE_FLAG, 0x0FC1)?;
        self.write(Register::Pulse1Sel.address() | WRITE_FLAG, 0x3290)?;

        Ok(())
    }

    fn send(&mut self, request: Request) -> DriverResult<(), UART> {
        for byte in request.as_bytes() {
            nb::block!(self.uart.write(*byte)).map_err(CSE7761Error::Serial)?;
        }
        nb::block!(self.uart.flush()).map_err(CSE7761Error::Serial)
    }

    fn drain(&mut self) {
        while self.uart.read().is_ok() {}
    }

    fn receive_byte(&mut self) -> DriverResult<Option<u8>, UART> {
        for _ in 0..BYTE_POLLS {
            match self.uart.read() {
                Ok(byte) => return Ok(Some(byte)),
                Err(nb::Error::WouldBlock) => self.delay.delay_us(BYTE_POLL_US),
                Err(nb::Error::Other(err)) => return Err(CSE7761Error::Serial(err)),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::{MockChip, NoopDelay};

    fn driver(chip: MockChip) -> CSE7761Driver<MockChip, NoopDelay> {
        CSE7761Driver::new(chip, NoopDelay).expect("setup should succeed")
    }

    #[test]
    fn setup_resets_and_configures_chip() {
        let driver = driver(MockChip::healthy());
        let (chip, _) = driver.release();

        assert_eq!(chip.written[0], vec![0xA5, 0xEA, 0x96, 0xDA]);
        assert!(chip.written.contains(&frame::encode(0xEA, 0xE5).as_bytes().to_vec()));
        assert!(chip.written.contains(&frame::encode(0x80, 0xFF04).as_bytes().to_vec()));
        assert!(chip.written.contains(&frame::encode(0x81, 0x1583).as_bytes().to_vec()));
        assert!(chip.written.contains(&frame::encode(0x93, 0x0FC1).as_bytes().to_vec()));
        assert!(chip.written.contains(&frame::encode(0x9D, 0x3290).as_bytes().to_vec()));
        assert_eq!(
            chip.written.last(),
            Some(&frame::encode(0xEA, 0xDC).as_bytes().to_vec())
        );
    }

    #[test]
    fn setup_fails_without_chip() {
        let result = CSE7761Driver::new(MockChip::new(), NoopDelay);
        assert!(matches!(result, Err(CSE7761Error::Connect)));
    }

    #[test]
    fn setup_fails_on_wrong_syscon() {
        let mut chip = MockChip::healthy();
        chip.set(0x00, 0x1234, 2);
        assert!(matches!(
            CSE7761Driver::new(chip, NoopDelay),
            Err(CSE7761Error::Connect)
        ));
    }

    #[test]
    fn setup_fails_when_write_protected() {
        let mut chip = MockChip::healthy();
        chip.set(0x43, 0x00, 1);
        assert!(matches!(
            CSE7761Driver::new(chip, NoopDelay),
            Err(CSE7761Error::WriteProtected)
        ));
    }

    #[test]
    fn stored_coefficients_are_kept_when_checksum_matches() {
        let mut chip = MockChip::healthy();
        chip.set(0x72, 40000, 2);
        // recompute checksum for the changed coefficient
        let mut sum = 0xFFFFu16;
        for address in 0x70..0x78u8 {
            sum = sum.wrapping_add(chip.registers[&address].0 as u16);
        }
        chip.set(0x6F, u32::from(!sum), 2);

        let driver = driver(chip);
        assert_eq!(driver.coefficients()[Coefficient::RmsUC as usize], 40000);
    }

    #[test]
    fn bad_coefficient_checksum_falls_back_to_reference() {
        let mut chip = MockChip::healthy();
        chip.set(0x72, 40000, 2);

        let driver = driver(chip);
        assert_eq!(driver.coefficients()[Coefficient::RmsUC as usize], UREF);
        assert_eq!(driver.coefficients()[Coefficient::RmsIAC as usize], IREF);
        assert_eq!(driver.coefficients()[Coefficient::PowerPAC as usize], PREF);
    }

    #[test]
    fn silent_coefficient_register_falls_back_to_reference() {
        let mut chip = MockChip::healthy();
        chip.registers.remove(&0x75);

        let driver = driver(chip);
        assert_eq!(driver.coefficients()[Coefficient::PowerSC as usize], 0);
        assert_eq!(driver.coefficients()[Coefficient::RmsUC as usize], UREF);
        assert_eq!(driver.coefficients()[Coefficient::PowerPBC as usize], PREF);
    }

    #[test]
    fn silent_checksum_register_falls_back_to_reference() {
        let mut chip = MockChip::healthy();
        chip.set(0x70, 50000, 2);
        let mut sum = 0xFFFFu16;
        for address in 0x70..0x78u8 {
            sum = sum.wrapping_add(chip.registers[&address].0 as u16);
        }
        chip.set(0x6F, u32::from(!sum), 2);
        assert_eq!(driver(chip).coefficients()[Coefficient::RmsIAC as usize], 50000);

        let mut chip = MockChip::healthy();
        chip.set(0x70, 50000, 2);
        chip.registers.remove(&0x6F);
        assert_eq!(driver(chip).coefficients()[Coefficient::RmsIAC as usize], IREF);
    }

    #[test]
    fn release_needs_no_bus_bounds() {
        fn take_apart<U, D>(driver: CSE7761Driver<U, D>) -> (U, D) {
            driver.release()
        }

        let (chip, _) = take_apart(driver(MockChip::healthy()));
        assert_eq!(chip.written[0], frame::encode(0xEA, 0x96).as_bytes().to_vec());
    }

    #[test]
    fn read_retries_garbled_frames() {
        let mut driver = driver(MockChip::healthy());
        let (mut chip, delay) = driver.release();
        chip.set(0x26, 0x123456, 3);
        chip.script(0x26, vec![0x12, 0x34, 0x56, 0x00]);
        chip.script(0x26, vec![0x12]);
        driver = CSE7761Driver {
            uart: chip,
            delay,
            coefficients: [IREF, IREF, UREF, PREF, PREF, PREF, PREF, PREF],
        };

        assert_eq!(driver.read(Register::RmsU), Ok(0x123456));
        let (chip, _) = driver.release();
        assert_eq!(chip.read_requests(0x26), 3);
    }

    #[test]
    fn read_gives_up_after_three_attempts() {
        let mut driver = driver(MockChip::healthy());
        let result = driver.read_address(0x50, 2);
        assert_eq!(result, Err(CSE7761Error::NoResponse { register: 0x50 }));
        let (chip, _) = driver.release();
        assert_eq!(chip.read_requests(0x50), usize::from(READ_ATTEMPTS));
    }

    #[test]
    fn read_rejects_impossible_sizes() {
        let mut driver = driver(MockChip::healthy());
        assert_eq!(
            driver.read_address(0x24, 5),
            Err(CSE7761Error::InvalidSize {
                register: 0x24,
                size: 5
            })
        );
    }

    #[test]
    fn voltage_is_scaled_by_coefficient() {
        let mut driver = driver(MockChip::healthy());
        let (mut chip, delay) = driver.release();
        chip.set(0x26, 2_300_000, 3);
        driver = CSE7761Driver {
            uart: chip,
            delay,
            coefficients: [IREF, IREF, UREF, PREF, PREF, PREF, PREF, PREF],
        };

        let divisor = (0x40_0000u64 * 100 / u64::from(UREF)) as f32;
        let voltage = driver.get_voltage().unwrap();
        assert!((voltage - 2_300_000.0 / divisor).abs() < 1e-3);
    }

    #[test]
    fn invalid_voltage_reads_as_zero() {
        let mut chip = MockChip::healthy();
        chip.set(0x26, 0x80_0001, 3);
        let mut driver = driver(chip);
        assert_eq!(driver.get_voltage(), Ok(0.0));
    }

    #[test]
    fn current_is_signed() {
        let mut chip = MockChip::healthy();
        chip.set(0x25, 0xFF_FF00, 3);
        let mut driver = driver(chip);
        let current = driver.get_current(Channel::B).unwrap();
        let divisor = ((0x80_0000u64 * 100 / u64::from(IREF)) * 10) as f32;
        assert!(current < 0.0);
        assert!((current - (-256.0 / divisor / PI)).abs() < 1e-6);
    }

    #[test]
    fn active_power_is_signed() {
        let mut chip = MockChip::healthy();
        chip.set(0x2C, (-1_000_000i32) as u32, 4);
        let mut driver = driver(chip);
        let power = driver.get_active_power(Channel::A).unwrap();
        let divisor = (0x8000_0000u64 / u64::from(PREF)) as f32;
        assert!((power - (-1_000_000.0 / divisor / PI)).abs() < 1e-3);
    }

    #[test]
    fn zero_coefficient_is_an_error() {
        let mut driver = driver(MockChip::healthy());
        driver.coefficients[Coefficient::PowerSC as usize] = 0;
        assert_eq!(
            driver.conversion(Coefficient::PowerSC),
            Err(CSE7761Error::InvalidCoefficient(Coefficient::PowerSC))
        );
    }

    #[test]
    fn raw_read_returns_payload() {
        let mut chip = MockChip::healthy();
        chip.set(0x1D, 0x3290, 2);
        let mut driver = driver(chip);
        let mut buffer = [0u8; 2];
        driver.read_raw(0x1D, &mut buffer).unwrap();
        assert_eq!(buffer, [0x32, 0x90]);
    }

    #[test]
    fn raw_read_fails_on_short_frame() {
        let mut driver = driver(MockChip::healthy());
        let mut buffer = [0u8; 2];
        assert_eq!(
            driver.read_raw(0x50, &mut buffer),
            Err(CSE7761Error::Incomplete {
                register: 0x50,
                received: 0,
                expected: 3
            })
        );
    }

    #[test]
    fn write_register_brackets_with_write_enable() {
        let mut driver = driver(MockChip::healthy());
        let (mut chip, delay) = driver.release();
        chip.written.clear();
        driver = CSE7761Driver {
            uart: chip,
            delay,
            coefficients: [IREF; COEFFICIENT_COUNT],
        };

        driver.write_register(0x0F, 0x0123).unwrap();
        let (chip, _) = driver.release();
        assert_eq!(
            chip.written,
            vec![
                frame::encode(0xEA, 0xE5).as_bytes().to_vec(),
                frame::encode(0x8F, 0x0123).as_bytes().to_vec(),
                frame::encode(0xEA, 0xDC).as_bytes().to_vec(),
            ]
        );
    }
}

//! Helpers for the raw register services: rendering payloads and parsing user input.

use std::fmt::Write;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumberError {
    #[error("'{0}' is not a number")]
    Invalid(String),
    #[error("{value:#X} is out of range (0-{max:#X})")]
    OutOfRange { value: u64, max: u64 },
}

/// Bytes as upper case hex pairs, each followed by a space: `0A FF `.
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(out, "{byte:02X} ");
    }
    out
}

/// Bytes as eight binary digits, each group followed by a space: `00001010 11111111 `.
pub fn format_bin(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 9);
    for byte in bytes {
        let _ = write!(out, "{byte:08b} ");
    }
    out
}

/// Parse an unsigned number, picking the base from its prefix like `strtoul` with base 0:
/// `0x` for hexadecimal, a leading `0` for octal, decimal otherwise.
pub fn parse_number(input: &str) -> Result<u64, NumberError> {
    let invalid = || NumberError::Invalid(input.to_string());

    let text = input.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(invalid());
    }
    u64::from_str_radix(digits, radix).map_err(|_| invalid())
}

/// [`parse_number`] limited to `max`.
pub fn parse_bounded(input: &str, max: u64) -> Result<u64, NumberError> {
    let value = parse_number(input)?;
    if value > max {
        return Err(NumberError::OutOfRange { value, max });
    }
    Ok(value)
}

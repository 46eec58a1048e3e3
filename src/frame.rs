//! Byte framing of the CSE7761 UART protocol.
//!
//! Every request starts with [`HEADER`] followed by the register address. A read request stops
//! there; the chip answers with the register payload (most significant byte first) and a checksum
//! byte. A write request carries one or two data bytes and its own checksum. Both checksums are the
//! bitwise inverse of the wrapping sum of every byte that precedes them, with the response
//! checksum also covering the header and address of the request.

/// First byte of every request.
pub const HEADER: u8 = 0xA5;

/// Largest register payload the chip returns.
pub const MAX_PAYLOAD: usize = 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("no bytes received")]
    Empty,
    #[error("payload of {0} bytes does not fit a register")]
    Oversized(usize),
    #[error("checksum mismatch: expected {expected:#04X}, received {received:#04X}")]
    Checksum { expected: u8, received: u8 },
}

/// An encoded request, at most five bytes long.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request {
    bytes: [u8; 5],
    len: usize,
}

impl Request {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_read(&self) -> bool {
        self.len == 2
    }
}

/// Bitwise inverse of the wrapping sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a request for `address` carrying `data`.
///
/// A zero `data` produces a bare read request. Values below `0xFF` are sent as a single byte,
/// anything else as two bytes, big endian.
pub fn encode(address: u8, data: u16) -> Request {
    let mut bytes = [HEADER, address, 0, 0, 0];
    let mut len = 2;

    if data != 0 {
        if data < 0xFF {
            bytes[2] = data as u8;
            len = 3;
        } else {
            bytes[2..4].copy_from_slice(&data.to_be_bytes());
            len = 4;
        }
        bytes[len] = checksum(&bytes[..len]);
        len += 1;
    }

    Request { bytes, len }
}

pub fn read_request(address: u8) -> Request {
    encode(address, 0)
}

/// Validate a response to a read of `address` and assemble its payload.
///
/// `bytes` holds the payload followed by the checksum byte.
pub fn decode_response(address: u8, bytes: &[u8]) -> Result<u32, FrameError> {
    let (received, payload) = bytes.split_last().ok_or(FrameError::Empty)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::Oversized(payload.len()));
    }

    let expected = !payload
        .iter()
        .fold(HEADER.wrapping_add(address), |acc, b| acc.wrapping_add(*b));
    if expected != *received {
        return Err(FrameError::Checksum {
            expected,
            received: *received,
        });
    }

    Ok(payload
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Interpret the low 24 bits of `value` as a two's complement number.
pub fn sign_extend_24(value: u32) -> i32 {
    ((value << 8) as i32) >> 8
}


#[cfg(test)]
pub(crate) use tests::response;

use std::convert::TryFrom;

use crate::{Error, Result};

/// Returns the number of bytes that this varint will need
pub const fn size(int: u64) -> usize {
    if int <= 240 {
        1
    } else if int <= 2287 {
        2
    } else if int <= 67823 {
        3
    } else if int <= 0x00FF_FFFF {
        4
    } else if int <= 0xFFFF_FFFF {
        5
    } else if int <= 0x00FF_FFFF_FFFF {
        6
    } else if int <= 0xFFFF_FFFF_FFFF {
        7
    } else if int <= 0x00FF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

#[allow(clippy::cast_possible_truncation)]
fn low_byte(int: u64) -> u8 {
    (int & 0xFF) as u8
}

/// Returns how many bytes the varint consumed while serializing
pub fn serialize_into(int: u64, buf: &mut [u8]) -> usize {
    if int <= 240 {
        buf[0] = low_byte(int);
        1
    } else if int <= 2287 {
        buf[0] = low_byte((int - 240) / 256 + 241);
        buf[1] = low_byte((int - 240) % 256);
        2
    } else if int <= 67823 {
        buf[0] = 249;
        buf[1] = low_byte((int - 2288) / 256);
        buf[2] = low_byte((int - 2288) % 256);
        3
    } else {
        let sz = size(int);
        buf[0] = low_byte(247 + sz as u64 - 1);
        let bytes = int.to_le_bytes();
        buf[1..sz].copy_from_slice(&bytes[..sz - 1]);
        sz
    }
}

/// Appends the varint to the end of `buf`.
pub fn push(int: u64, buf: &mut Vec<u8>) {
    let mut scratch = [0_u8; 9];
    let sz = serialize_into(int, &mut scratch);
    buf.extend_from_slice(&scratch[..sz]);
}

/// Returns the deserialized varint, along with how many bytes
/// were taken up by the varint.
pub fn deserialize(buf: &[u8]) -> Result<(u64, usize)> {
    if buf.is_empty() {
        return Err(Error::corruption(None, "empty varint"));
    }
    let needed = match buf[0] {
        0..=240 => 1,
        241..=248 => 2,
        249 => 3,
        other => usize::from(other) - 247 + 1,
    };
    if buf.len() < needed {
        return Err(Error::corruption(None, "truncated varint"));
    }
    let res = match buf[0] {
        0..=240 => (u64::from(buf[0]), 1),
        241..=248 => {
            let varint =
                240 + 256 * (u64::from(buf[0]) - 241) + u64::from(buf[1]);
            (varint, 2)
        }
        249 => {
            let varint = 2288 + 256 * u64::from(buf[1]) + u64::from(buf[2]);
            (varint, 3)
        }
        other => {
            let sz = usize::from(other) - 247;
            let mut aligned = [0; 8];
            aligned[..sz].copy_from_slice(&buf[1..=sz]);
            let varint = u64::from_le_bytes(aligned);
            (varint, sz + 1)
        }
    };
    Ok(res)
}

/// Consumes a varint from the front of `buf`.
pub fn take(buf: &mut &[u8]) -> Result<u64> {
    let (int, sz) = deserialize(buf)?;
    *buf = &buf[sz..];
    Ok(int)
}

/// Consumes a varint that must fit into a `usize`.
pub fn take_usize(buf: &mut &[u8]) -> Result<usize> {
    usize::try_from(take(buf)?)
        .map_err(|_| Error::corruption(None, "varint overflows usize"))
}

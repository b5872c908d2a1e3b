//! Fixed-width big-endian integer codec and zigzag transform.
//!
//! Every multi-byte integer on the wire is in network byte order. Signed
//! values are zigzag-mapped first so that small magnitudes keep their high
//! bits clear regardless of sign:
//!
//! ```text
//!           0 ->          0
//!          -1 ->          1
//!           1 ->          2
//!          -2 ->          3
//!  2147483647 -> 4294967294
//! -2147483648 -> 4294967295
//! ```

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn decode_u16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_u32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub fn decode_u64(bytes: [u8; 8]) -> u64 {
    u64::from_be_bytes(bytes)
}

/// Maps a signed 32-bit value onto the unsigned range, interleaving signs.
pub fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`].
pub fn zigzag_decode32(u: u32) -> i32 {
    ((u >> 1) as i32) ^ -((u & 1) as i32)
}

pub fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn zigzag_decode64(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

/// Zigzag-encodes and serializes a signed value as 4 network-order bytes.
pub fn encode_i32(n: i32) -> [u8; 4] {
    encode_u32(zigzag_encode32(n))
}

pub fn decode_i32(bytes: [u8; 4]) -> i32 {
    zigzag_decode32(decode_u32(bytes))
}

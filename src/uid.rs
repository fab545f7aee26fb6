use std::fmt;

/// A 128-bit unique ID.
/// Structure, most significant bits first:
/// - 64 bits: Timestamp delta (milliseconds since the configured epoch)
/// - 32 bits: Node ID
/// - 16 bits: Sequence (65536 IDs/ms)
/// - 16 bits: Random discriminator
pub type Uid = u128;

pub const NODE_ID_BITS: u32 = 32;
pub const SEQUENCE_BITS: u32 = 16;
pub const RANDOM_BITS: u32 = 16;

/// Maximum sequence value within one millisecond.
pub const MAX_SEQUENCE: u32 = (1 << SEQUENCE_BITS) - 1;

const SEQUENCE_SHIFT: u32 = RANDOM_BITS;
const NODE_ID_SHIFT: u32 = RANDOM_BITS + SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = RANDOM_BITS + SEQUENCE_BITS + NODE_ID_BITS;

/// Base32-encoded length: 128 bits at 5 bits per character.
const BASE32_LEN: usize = 26;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Create a Uid from its four fields.
pub fn from_parts(timestamp_delta: u64, node_id: u32, sequence: u16, random: u16) -> Uid {
    ((timestamp_delta as u128) << TIMESTAMP_SHIFT)
        | ((node_id as u128) << NODE_ID_SHIFT)
        | ((sequence as u128) << SEQUENCE_SHIFT)
        | (random as u128)
}

/// Extract the timestamp delta (milliseconds since epoch).
pub fn timestamp_delta(uid: Uid) -> u64 {
    (uid >> TIMESTAMP_SHIFT) as u64
}

/// Extract the node ID.
pub fn node_id(uid: Uid) -> u32 {
    ((uid >> NODE_ID_SHIFT) & ((1 << NODE_ID_BITS) - 1)) as u32
}

/// Extract the sequence.
pub fn sequence(uid: Uid) -> u16 {
    ((uid >> SEQUENCE_SHIFT) & ((1 << SEQUENCE_BITS) - 1)) as u16
}

/// Extract the random discriminator.
pub fn random_part(uid: Uid) -> u16 {
    (uid & ((1 << RANDOM_BITS) - 1)) as u16
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidLength { expected: usize, got: usize },
    InvalidChar { index: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "Invalid length: expected {}, got {}", expected, got)
            }
            Self::InvalidChar { index } => write!(f, "Invalid character at index {}", index),
        }
    }
}

impl std::error::Error for ParseError {}

/// Serialize as Crockford Base32, fixed 26 characters.
/// Sorts lexicographically in the same order as the numeric value.
pub fn to_str_base32(uid: Uid) -> String {
    let mut chars = vec!['0'; BASE32_LEN];
    let mut v = uid;
    for i in (0..BASE32_LEN).rev() {
        chars[i] = ALPHABET[(v % 32) as usize] as char;
        v /= 32;
    }
    chars.into_iter().collect()
}

/// Parse a 26-character Crockford Base32 string back into a Uid.
/// Accepts lowercase input.
pub fn from_str_base32(s: &str) -> Result<Uid, ParseError> {
    if s.len() != BASE32_LEN {
        return Err(ParseError::InvalidLength {
            expected: BASE32_LEN,
            got: s.len(),
        });
    }

    const DECODE: [i8; 256] = {
        let mut map = [-1; 256];
        let mut i = 0;
        while i < 32 {
            map[b"0123456789ABCDEFGHJKMNPQRSTVWXYZ"[i] as usize] = i as i8;
            i += 1;
        }
        // Support lowercase as well
        let mut i = 0;
        while i < 32 {
            map[b"0123456789abcdefghjkmnpqrstvwxyz"[i] as usize] = i as i8;
            i += 1;
        }
        map
    };

    let bytes = s.as_bytes();

    // 26 chars carry 130 bits; the top character may only use 3 of its 5 bits
    if DECODE[bytes[0] as usize] > 7 {
        return Err(ParseError::InvalidChar { index: 0 });
    }

    let mut val: u128 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let digit = DECODE[b as usize];
        if digit == -1 {
            return Err(ParseError::InvalidChar { index: i });
        }
        val = (val << 5) | (digit as u128);
    }

    Ok(val)
}

/// Serialize as Decimal String
pub fn to_str_decimal(uid: Uid) -> String {
    uid.to_string()
}

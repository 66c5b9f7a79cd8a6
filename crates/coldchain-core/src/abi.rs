//! Minimal ABI word codec for the ledger's event payloads and view calls.
//!
//! Only the static types the ledger emits are supported: `bytes32`,
//! `address`, `bool`, `uint256`/`int256` narrowed to 64 bits, plus a single
//! dynamic `string`. Values that do not fit in 64 bits are rejected rather
//! than truncated.

use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

pub const WORD: usize = 32;

/// Errors raised while reading an ABI-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("payload too short: need {need} bytes at offset {offset}, have {have}")]
    OutOfBounds {
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("value in word {index} does not fit in 64 bits")]
    Overflow { index: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// keccak256 of arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}

/// Topic hash of a canonical event signature, e.g. `"Delivered(bytes32,string,address)"`.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// 4-byte function selector of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

fn slice(data: &[u8], offset: usize, need: usize) -> Result<&[u8], AbiError> {
    data.get(offset..offset.saturating_add(need))
        .filter(|s| s.len() == need)
        .ok_or(AbiError::OutOfBounds {
            offset,
            need,
            have: data.len(),
        })
}

/// The `index`-th 32-byte head word.
pub fn word(data: &[u8], index: usize) -> Result<&[u8], AbiError> {
    slice(data, index * WORD, WORD)
}

fn word_as_u64(w: &[u8], index: usize) -> Result<u64, AbiError> {
    if w[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow { index });
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(tail))
}

/// Read head word `index` as an unsigned integer.
pub fn read_u64(data: &[u8], index: usize) -> Result<u64, AbiError> {
    word_as_u64(word(data, index)?, index)
}

/// Read head word `index` as a two's-complement signed integer.
pub fn read_i64(data: &[u8], index: usize) -> Result<i64, AbiError> {
    let w = word(data, index)?;
    let negative = w[24] & 0x80 != 0;
    let pad = if negative { 0xff } else { 0x00 };
    if w[..24].iter().any(|b| *b != pad) {
        return Err(AbiError::Overflow { index });
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&w[24..]);
    Ok(i64::from_be_bytes(tail))
}

pub fn read_bool(data: &[u8], index: usize) -> Result<bool, AbiError> {
    Ok(read_u64(data, index)? != 0)
}

/// Read head word `index` as an address (`0x` + 40 hex chars, lowercase).
pub fn read_address(data: &[u8], index: usize) -> Result<String, AbiError> {
    let w = word(data, index)?;
    Ok(format!("0x{}", hex::encode(&w[12..])))
}

/// Read the dynamic `string` whose offset is stored in head word `index`.
pub fn read_string(data: &[u8], index: usize) -> Result<String, AbiError> {
    let offset = read_u64(data, index)? as usize;
    let len_word = slice(data, offset, WORD)?;
    let len = word_as_u64(len_word, index)? as usize;
    let bytes = slice(data, offset + WORD, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

/// Parse a 32-byte topic (`0x…`) into raw bytes.
pub fn topic_bytes(topic: &str) -> Option<[u8; 32]> {
    let raw = topic.strip_prefix("0x").unwrap_or(topic);
    let mut out = [0u8; 32];
    hex::decode_to_slice(raw, &mut out).ok()?;
    Some(out)
}

/// Address stored in an indexed topic (right-aligned in 32 bytes).
pub fn topic_address(topic: &str) -> Option<String> {
    let bytes = topic_bytes(topic)?;
    Some(format!("0x{}", hex::encode(&bytes[12..])))
}

// ─── Encoding ─────────────────────────────────────────────────────────────────

/// A head/tail ABI encoder for the same narrow type set.
#[derive(Debug, Default)]
pub struct Encoder {
    head: Vec<[u8; 32]>,
    tail: Vec<(usize, Vec<u8>)>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uint(mut self, v: u64) -> Self {
        let mut w = [0u8; 32];
        w[24..].copy_from_slice(&v.to_be_bytes());
        self.head.push(w);
        self
    }

    pub fn int(mut self, v: i64) -> Self {
        let mut w = if v < 0 { [0xffu8; 32] } else { [0u8; 32] };
        w[24..].copy_from_slice(&v.to_be_bytes());
        self.head.push(w);
        self
    }

    pub fn boolean(self, v: bool) -> Self {
        self.uint(u64::from(v))
    }

    pub fn bytes32(mut self, v: [u8; 32]) -> Self {
        self.head.push(v);
        self
    }

    /// Encode an address given as `0x` + 40 hex chars. Invalid hex encodes as zero.
    pub fn address(mut self, addr: &str) -> Self {
        let raw = addr.strip_prefix("0x").unwrap_or(addr);
        let mut w = [0u8; 32];
        if hex::decode_to_slice(raw, &mut w[12..]).is_err() {
            w = [0u8; 32];
        }
        self.head.push(w);
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.tail.push((self.head.len(), s.as_bytes().to_vec()));
        self.head.push([0u8; 32]);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let mut tail_bytes = Vec::new();
        let head_len = self.head.len() * WORD;
        for (slot, bytes) in std::mem::take(&mut self.tail) {
            let offset = (head_len + tail_bytes.len()) as u64;
            self.head[slot][24..].copy_from_slice(&offset.to_be_bytes());
            let mut len = [0u8; 32];
            len[24..].copy_from_slice(&(bytes.len() as u64).to_be_bytes());
            tail_bytes.extend_from_slice(&len);
            tail_bytes.extend_from_slice(&bytes);
            let pad = (WORD - bytes.len() % WORD) % WORD;
            tail_bytes.extend(std::iter::repeat(0u8).take(pad));
        }
        let mut out: Vec<u8> = self.head.iter().flatten().copied().collect();
        out.extend(tail_bytes);
        out
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_transfer_topic() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn erc20_transfer_selector() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn string_with_trailing_words() {
        let data = Encoder::new().string("SH-1").int(-452).uint(30).finish();
        assert_eq!(read_string(&data, 0).unwrap(), "SH-1");
        assert_eq!(read_i64(&data, 1).unwrap(), -452);
        assert_eq!(read_u64(&data, 2).unwrap(), 30);
    }

    #[test]
    fn oversized_uint_rejected() {
        let mut data = Encoder::new().uint(1).finish();
        data[0] = 1;
        assert_eq!(read_u64(&data, 0), Err(AbiError::Overflow { index: 0 }));
    }

    #[test]
    fn bad_sign_extension_rejected() {
        // Negative low bytes with zero padding is not a valid int64.
        let mut data = Encoder::new().uint(0).finish();
        data[24] = 0x80;
        assert!(read_i64(&data, 0).is_err());
    }

    #[test]
    fn truncated_string_rejected() {
        let data = Encoder::new().string("SH-451-B7").finish();
        let cut = &data[..data.len() - 32];
        assert!(matches!(read_string(cut, 0), Err(AbiError::OutOfBounds { .. })));
    }

    #[test]
    fn address_word() {
        let data = Encoder::new()
            .address("0x00000000000000000000000000000000000000aa")
            .finish();
        assert_eq!(
            read_address(&data, 0).unwrap(),
            "0x00000000000000000000000000000000000000aa"
        );
    }
}

//! Minimal Solidity ABI codec for the attendance contract.
//!
//! Only the shapes the contract uses are supported: `address`, `uint256`
//! (values that fit in a `u64`), `bool`, `string` and `address[]`.

use crate::chain::error::ChainError;
use crate::chain::types::Address;
use sha3::{Digest, Keccak256};

const WORD: usize = 32;

/// `Error(string)` selector prefixed to revert data.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// First four bytes of the keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Full keccak-256 hash of an event signature, as used in log topic 0.
pub fn event_topic(signature: &str) -> [u8; 32] {
    let mut topic = [0u8; 32];
    topic.copy_from_slice(&Keccak256::digest(signature.as_bytes()));
    topic
}

/// A call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Address(Address),
    Uint(u64),
    Bool(bool),
    String(String),
    AddressArray(Vec<Address>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::AddressArray(_))
    }
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn static_word(token: &Token) -> [u8; WORD] {
    match token {
        Token::Address(address) => address_word(address),
        Token::Uint(value) => uint_word(*value),
        Token::Bool(value) => uint_word(*value as u64),
        Token::String(_) | Token::AddressArray(_) => [0u8; WORD],
    }
}

fn encode_tail(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::String(value) => {
            let bytes = value.as_bytes();
            out.extend_from_slice(&uint_word(bytes.len() as u64));
            out.extend_from_slice(bytes);
            let padding = (WORD - bytes.len() % WORD) % WORD;
            out.extend(std::iter::repeat(0u8).take(padding));
        }
        Token::AddressArray(items) => {
            out.extend_from_slice(&uint_word(items.len() as u64));
            for item in items {
                out.extend_from_slice(&address_word(item));
            }
        }
        _ => {}
    }
}

/// Encode arguments with the standard head/tail layout.
pub fn encode_args(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
            encode_tail(token, &mut tail);
        } else {
            head.extend_from_slice(&static_word(token));
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector plus encoded arguments, ready for `eth_call` data.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode_args(tokens));
    data
}

/// Decode a `0x`-prefixed hex string into bytes.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, ChainError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| ChainError::DecodeError(format!("invalid hex: {}", e)))
}

/// Reader over ABI-encoded return data.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn slice(&self, start: usize, len: usize) -> Option<&'a [u8]> {
        let end = start.checked_add(len)?;
        self.data.get(start..end)
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], ChainError> {
        self.slice(offset, WORD)
            .ok_or_else(|| ChainError::DecodeError(format!("return data too short at byte {}", offset)))
    }

    /// Offset or length word, bounded by the size of the return data.
    fn usize_at(&self, offset: usize) -> Result<usize, ChainError> {
        let value = self.uint_at(offset)?;
        usize::try_from(value)
            .ok()
            .filter(|v| *v <= self.data.len())
            .ok_or_else(|| ChainError::DecodeError(format!("offset or length {} out of range", value)))
    }

    fn uint_at(&self, offset: usize) -> Result<u64, ChainError> {
        let word = self.word_at(offset)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(ChainError::DecodeError("uint256 value exceeds u64".to_string()));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn uint(&self, index: usize) -> Result<u64, ChainError> {
        self.uint_at(index * WORD)
    }

    pub fn bool(&self, index: usize) -> Result<bool, ChainError> {
        Ok(self.uint(index)? != 0)
    }

    pub fn address(&self, index: usize) -> Result<Address, ChainError> {
        let word = self.word_at(index * WORD)?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Ok(Address::from_bytes(bytes))
    }

    pub fn string(&self, index: usize) -> Result<String, ChainError> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        let bytes = offset
            .checked_add(WORD)
            .and_then(|start| self.slice(start, len))
            .ok_or_else(|| ChainError::DecodeError("string out of bounds".to_string()))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ChainError::DecodeError(format!("invalid utf-8 string: {}", e)))
    }

    pub fn address_array(&self, index: usize) -> Result<Vec<Address>, ChainError> {
        let offset = self.usize_at(index * WORD)?;
        let len = self.usize_at(offset)?;
        let items = Decoder::new(
            offset
                .checked_add(WORD)
                .and_then(|start| self.data.get(start..))
                .unwrap_or_default(),
        );
        (0..len).map(|i| items.address(i)).collect()
    }
}

/// Decode `Error(string)` revert data.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    Decoder::new(body).string(0).ok()
}

/// Extract a revert reason from an RPC error, from its data or message.
pub fn revert_reason(err: &ChainError) -> Option<String> {
    let ChainError::Rpc { message, data, .. } = err else {
        return None;
    };

    if let Some(reason) = data
        .as_deref()
        .and_then(|raw| decode_hex(raw).ok())
        .and_then(|bytes| decode_revert_data(&bytes))
    {
        return Some(reason);
    }

    if let Some((_, reason)) = message.split_once("reverted with reason string '") {
        return Some(reason.trim_end_matches('\'').to_string());
    }
    message
        .split_once("execution reverted: ")
        .map(|(_, reason)| reason.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector("owner()")), "8da5cb5b");
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("Error(string)")), "08c379a0");
    }

    #[test]
    fn test_encode_static_and_dynamic_args() {
        let student = Address::from_bytes([0x11; 20]);
        let encoded = encode_args(&[
            Token::Address(student),
            Token::String("Alice".to_string()),
            Token::Uint(7),
        ]);

        // three head words, then length word and one padded data word
        assert_eq!(encoded.len(), 5 * WORD);
        assert_eq!(&encoded[12..32], student.as_bytes());
        assert_eq!(encoded[63], 0x60);
        assert_eq!(encoded[95], 7);
        assert_eq!(encoded[127], 5);
        assert_eq!(&encoded[128..133], b"Alice");
        assert!(encoded[133..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decoder_reads_tuple() {
        let teacher = Address::from_bytes([0x70; 20]);
        let data = encode_args(&[
            Token::String("Compilers".to_string()),
            Token::Uint(100),
            Token::Uint(200),
            Token::Address(teacher),
            Token::Bool(true),
        ]);
        let decoder = Decoder::new(&data);
        assert_eq!(decoder.string(0).unwrap(), "Compilers");
        assert_eq!(decoder.uint(1).unwrap(), 100);
        assert_eq!(decoder.uint(2).unwrap(), 200);
        assert_eq!(decoder.address(3).unwrap(), teacher);
        assert!(decoder.bool(4).unwrap());
    }

    #[test]
    fn test_decoder_reads_address_array() {
        let students = vec![Address::from_bytes([1; 20]), Address::from_bytes([2; 20])];
        let data = encode_args(&[Token::AddressArray(students.clone())]);
        assert_eq!(Decoder::new(&data).address_array(0).unwrap(), students);
    }

    #[test]
    fn test_short_data_is_decode_error() {
        let decoder = Decoder::new(&[0u8; 16]);
        assert!(matches!(decoder.uint(0), Err(ChainError::DecodeError(_))));
    }

    #[test]
    fn test_oversized_offsets_are_decode_errors() {
        let mut data = [0u8; 2 * WORD];
        data[24..32].copy_from_slice(&[0xff; 8]);
        let decoder = Decoder::new(&data);
        assert!(matches!(decoder.string(0), Err(ChainError::DecodeError(_))));
        assert!(matches!(decoder.address_array(0), Err(ChainError::DecodeError(_))));

        // in-range offset pointing at a huge length
        let mut data = [0u8; 2 * WORD];
        data[31] = WORD as u8;
        data[WORD + 24..].copy_from_slice(&[0xff; 8]);
        let decoder = Decoder::new(&data);
        assert!(matches!(decoder.string(0), Err(ChainError::DecodeError(_))));
        assert!(matches!(decoder.address_array(0), Err(ChainError::DecodeError(_))));
    }

    #[test]
    fn test_revert_reason_from_data_and_message() {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend_from_slice(&encode_args(&[Token::String("Already attended".to_string())]));
        let from_data = ChainError::Rpc {
            code: 3,
            message: "execution reverted".to_string(),
            data: Some(format!("0x{}", hex::encode(&data))),
        };
        assert_eq!(revert_reason(&from_data).as_deref(), Some("Already attended"));

        let from_message = ChainError::Rpc {
            code: -32603,
            message: "VM Exception while processing transaction: reverted with reason string 'Course not active'".to_string(),
            data: None,
        };
        assert_eq!(revert_reason(&from_message).as_deref(), Some("Course not active"));

        assert_eq!(revert_reason(&ChainError::NotConnected), None);
    }
}

//! Buffer encodings
//!
//! Conversions between bytes and every text representation a [`Buffer`]
//! understands. `decode` turns text into bytes, `encode` turns bytes into
//! text. Both are pure functions.
//!
//! Decoding is strict where the representation has a well-defined alphabet:
//! odd-length or non-hex input is rejected, and so is base64 with characters
//! outside either alphabet. Text encodings (`utf8`, `utf16le`, `latin1`,
//! `ascii`) are total.
//!
//! [`atob`] and [`btoa`] are the legacy Latin1 / base64 pair. They operate on
//! strings, not bytes, and report failures as `InvalidCharacterError`.
//!
//! [`Buffer`]: super::Buffer

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::error::{NodeError, NodeResult};

/// Standard alphabet, padded output, padding optional on input
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// URL-safe alphabet, unpadded output
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// =============================================================================
// Encoding Names
// =============================================================================

/// Text representation of a byte sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StringEncoding {
    #[default]
    Utf8,
    /// Little-endian UTF-16 (`ucs2` is an alias)
    Utf16le,
    /// One byte per character (`binary` is an alias)
    Latin1,
    Base64,
    Base64Url,
    Hex,
    /// 7-bit; the high bit is dropped when bytes are turned into text
    Ascii,
}

impl StringEncoding {
    pub const ALL: [StringEncoding; 7] = [
        StringEncoding::Utf8,
        StringEncoding::Utf16le,
        StringEncoding::Latin1,
        StringEncoding::Base64,
        StringEncoding::Base64Url,
        StringEncoding::Hex,
        StringEncoding::Ascii,
    ];

    /// Parse an encoding name, case-insensitively. Returns `None` for
    /// unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        let encoding = match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => StringEncoding::Utf8,
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => StringEncoding::Utf16le,
            "latin1" | "binary" => StringEncoding::Latin1,
            "base64" => StringEncoding::Base64,
            "base64url" => StringEncoding::Base64Url,
            "hex" => StringEncoding::Hex,
            "ascii" => StringEncoding::Ascii,
            _ => return None,
        };
        Some(encoding)
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            StringEncoding::Utf8 => "utf8",
            StringEncoding::Utf16le => "utf16le",
            StringEncoding::Latin1 => "latin1",
            StringEncoding::Base64 => "base64",
            StringEncoding::Base64Url => "base64url",
            StringEncoding::Hex => "hex",
            StringEncoding::Ascii => "ascii",
        }
    }

    /// Text into bytes
    pub fn decode(&self, text: &str) -> NodeResult<Vec<u8>> {
        decode(text, *self)
    }

    /// Bytes into text
    pub fn encode(&self, bytes: &[u8]) -> String {
        encode(bytes, *self)
    }
}

impl FromStr for StringEncoding {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| NodeError::UnknownEncoding(s.to_string()))
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Codecs
// =============================================================================

/// Convert text into bytes
pub fn decode(text: &str, encoding: StringEncoding) -> NodeResult<Vec<u8>> {
    match encoding {
        StringEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        StringEncoding::Utf16le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        // Low byte of each UTF-16 code unit
        StringEncoding::Latin1 | StringEncoding::Ascii => {
            Ok(text.encode_utf16().map(|unit| unit as u8).collect())
        }
        StringEncoding::Hex => hex::decode(text).map_err(|e| NodeError::decode("hex", e)),
        StringEncoding::Base64 | StringEncoding::Base64Url => decode_base64(text),
    }
}

/// Convert bytes into text
pub fn encode(bytes: &[u8], encoding: StringEncoding) -> String {
    match encoding {
        StringEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        StringEncoding::Utf16le => {
            // A trailing odd byte is not a whole code unit and is dropped
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        StringEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        StringEncoding::Ascii => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
        StringEncoding::Hex => hex::encode(bytes),
        StringEncoding::Base64 => BASE64.encode(bytes),
        StringEncoding::Base64Url => BASE64_URL.encode(bytes),
    }
}

/// Number of bytes `text` occupies once decoded
pub fn byte_length(text: &str, encoding: StringEncoding) -> usize {
    match encoding {
        StringEncoding::Utf8 => text.len(),
        StringEncoding::Utf16le => text.encode_utf16().count() * 2,
        StringEncoding::Latin1 | StringEncoding::Ascii => text.encode_utf16().count(),
        StringEncoding::Hex => text.len() / 2,
        StringEncoding::Base64 | StringEncoding::Base64Url => {
            let trimmed = text.trim_end_matches('=');
            trimmed.len() * 3 / 4
        }
    }
}

/// Base64 in either alphabet, padding optional, ASCII whitespace ignored
fn decode_base64(text: &str) -> NodeResult<Vec<u8>> {
    let normalized: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    BASE64
        .decode(normalized.as_bytes())
        .map_err(|e| NodeError::decode("base64", e))
}

// =============================================================================
// Legacy atob / btoa
// =============================================================================

const BASE64_NO_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 into a string with one Latin1 character per byte
pub fn atob(data: &str) -> NodeResult<String> {
    let mut compact: String = data
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\x0c' | '\r'))
        .collect();

    if compact.len() % 4 == 0 {
        for _ in 0..2 {
            if compact.ends_with('=') {
                compact.pop();
            }
        }
    }
    if compact.len() % 4 == 1 {
        return Err(NodeError::InvalidCharacter(
            "The string to be decoded is not correctly encoded.".to_string(),
        ));
    }
    if let Some(bad) = compact
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '+' || *c == '/'))
    {
        return Err(NodeError::InvalidCharacter(format!(
            "Invalid character '{}' in base64 input",
            bad
        )));
    }

    let bytes = BASE64_NO_PAD
        .decode(compact.as_bytes())
        .map_err(|e| NodeError::InvalidCharacter(e.to_string()))?;
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Encode a Latin1 string as base64. Fails on characters above U+00FF.
pub fn btoa(data: &str) -> NodeResult<String> {
    let mut bytes = Vec::with_capacity(data.len());
    for c in data.chars() {
        let code = c as u32;
        if code > 0xff {
            return Err(NodeError::InvalidCharacter(format!(
                "Invalid character '{}' (U+{:04X})",
                c, code
            )));
        }
        bytes.push(code as u8);
    }
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(StringEncoding::parse("UTF-8"), Some(StringEncoding::Utf8));
        assert_eq!(StringEncoding::parse("ucs2"), Some(StringEncoding::Utf16le));
        assert_eq!(StringEncoding::parse("Binary"), Some(StringEncoding::Latin1));
        assert_eq!(StringEncoding::parse("base64url"), Some(StringEncoding::Base64Url));
        assert_eq!(StringEncoding::parse("utf32"), None);
        assert!(matches!(
            "nope".parse::<StringEncoding>(),
            Err(NodeError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_hex() {
        assert_eq!(decode("DEADbeef", StringEncoding::Hex).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(encode(&[0x00, 0xff], StringEncoding::Hex), "00ff");
    }

    #[test]
    fn test_hex_rejects_malformed() {
        assert!(matches!(
            decode("abc", StringEncoding::Hex),
            Err(NodeError::Decode { encoding: "hex", .. })
        ));
        assert!(decode("zz", StringEncoding::Hex).is_err());
    }

    #[test]
    fn test_base64_known_values() {
        assert_eq!(encode(b"hello", StringEncoding::Base64), "aGVsbG8=");
        assert_eq!(encode(b"hello", StringEncoding::Base64Url), "aGVsbG8");
        assert_eq!(decode("aGVsbG8", StringEncoding::Base64).unwrap(), b"hello");
        assert_eq!(decode("aGVs\nbG8=", StringEncoding::Base64).unwrap(), b"hello");
    }

    #[test]
    fn test_base64_accepts_both_alphabets() {
        let bytes = [0xfb, 0xff, 0xbf];
        assert_eq!(encode(&bytes, StringEncoding::Base64), "+/+/");
        assert_eq!(encode(&bytes, StringEncoding::Base64Url), "-_-_");
        assert_eq!(decode("-_-_", StringEncoding::Base64).unwrap(), bytes);
        assert_eq!(decode("+/+/", StringEncoding::Base64Url).unwrap(), bytes);
    }

    #[test]
    fn test_base64_rejects_malformed() {
        assert!(decode("ab$d", StringEncoding::Base64).is_err());
    }

    #[test]
    fn test_utf16le() {
        let bytes = decode("hi", StringEncoding::Utf16le).unwrap();
        assert_eq!(bytes, vec![b'h', 0, b'i', 0]);
        // Odd trailing byte dropped
        assert_eq!(encode(&[b'h', 0, b'i'], StringEncoding::Utf16le), "h");
        // Lone surrogate
        assert_eq!(encode(&[0x00, 0xd8], StringEncoding::Utf16le), "\u{fffd}");
    }

    #[test]
    fn test_latin1_and_ascii() {
        assert_eq!(decode("é", StringEncoding::Latin1).unwrap(), vec![0xe9]);
        assert_eq!(encode(&[0xe9], StringEncoding::Latin1), "é");
        assert_eq!(encode(&[0xe9], StringEncoding::Ascii), "i");
        assert_eq!(decode("\u{20ac}", StringEncoding::Latin1).unwrap(), vec![0xac]);
    }

    #[test]
    fn test_round_trips() {
        let text = "The quick brown fox 123";
        for encoding in StringEncoding::ALL {
            let bytes = decode(text, encoding);
            match encoding {
                StringEncoding::Hex | StringEncoding::Base64 | StringEncoding::Base64Url => {
                    // Not valid input in these alphabets; round trip the other way
                    let encoded = encode(text.as_bytes(), encoding);
                    assert_eq!(decode(&encoded, encoding).unwrap(), text.as_bytes());
                }
                _ => assert_eq!(encode(&bytes.unwrap(), encoding), text),
            }
        }
    }

    #[test]
    fn test_byte_length() {
        assert_eq!(byte_length("héllo", StringEncoding::Utf8), 6);
        assert_eq!(byte_length("héllo", StringEncoding::Utf16le), 10);
        assert_eq!(byte_length("héllo", StringEncoding::Latin1), 5);
        assert_eq!(byte_length("abcd", StringEncoding::Hex), 2);
        assert_eq!(byte_length("aGVsbG8=", StringEncoding::Base64), 5);
    }

    #[test]
    fn test_atob_btoa() {
        assert_eq!(btoa("hello").unwrap(), "aGVsbG8=");
        assert_eq!(atob("aGVsbG8=").unwrap(), "hello");
        assert_eq!(atob(" aGVs bG8 ").unwrap(), "hello");
        assert_eq!(atob(&btoa("\u{ff}\u{00}").unwrap()).unwrap(), "\u{ff}\u{00}");
    }

    #[test]
    fn test_atob_btoa_reject_invalid() {
        assert!(matches!(btoa("\u{20ac}"), Err(NodeError::InvalidCharacter(_))));
        assert!(matches!(atob("a"), Err(NodeError::InvalidCharacter(_))));
        assert!(matches!(atob("ab-d"), Err(NodeError::InvalidCharacter(_))));
    }
}

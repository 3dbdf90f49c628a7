//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers for captured windows, log output and the `decode` command.
//! Encoding is upper-case throughout, matching how meter captures are usually
//! written down.
//!
//! ```rust
//! use smartmeter_rs::util::hex::{decode_hex, encode_hex_upper, format_hex_compact};
//!
//! let data = decode_hex("68 fa fa 68").unwrap();
//! assert_eq!(encode_hex_upper(&data), "68FAFA68");
//! assert_eq!(format_hex_compact(&data), "68 FA FA 68");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    decode_cleaned(&cleaned)
}

/// Parse hex that may contain separators such as `:` or `-`.
pub fn parse_hex_lenient(input: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = input.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    decode_cleaned(&cleaned)
}

fn decode_cleaned(cleaned: &str) -> Result<Vec<u8>, HexError> {
    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }
    hex::decode(cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Formats data as `68 FA FA 68`, for log lines.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Offset-prefixed dump with an ASCII column, similar to `hexdump -C`.
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(1);
    data.chunks(width)
        .enumerate()
        .map(|(i, chunk)| {
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!(
                "{:04X}: {:<pad$} |{}|",
                i * width,
                format_hex_compact(chunk),
                ascii,
                pad = width * 3 - 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_hex_upper(&[0xAB, 0xCD, 0xEF]), "ABCDEF");
    }

    #[test]
    fn test_decode_with_whitespace() {
        let expected = vec![0x68, 0xFA, 0xFA, 0x68];
        assert_eq!(decode_hex("68 FA\nfa 68").unwrap(), expected);
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(
            parse_hex_lenient("68-fa:fa 68").unwrap(),
            vec![0x68, 0xFA, 0xFA, 0x68]
        );
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x68, 0x14, 0x14, 0x68]), "68 14 14 68");
        assert_eq!(format_hex_compact(&[]), "");
    }

    #[test]
    fn test_pretty_hex() {
        let pretty = pretty_hex(b"181220000009\x00", 8);
        let lines: Vec<&str> = pretty.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 31 38 31 32"));
        assert!(lines[0].ends_with("|18122000|"));
        assert!(lines[1].starts_with("0008: "));
        assert!(lines[1].ends_with("|0009.|"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("1"), Err(HexError::OddLength(1)));
        assert!(matches!(decode_hex("GG"), Err(HexError::DecodeError(_))));
    }
}

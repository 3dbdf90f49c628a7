//! # Utility Modules
//!
//! Helpers shared across the crate. Currently the hex encoding used by
//! captures, logs and the command line.

pub mod hex;

pub use hex::{
    decode_hex, encode_hex_upper, format_hex_compact, parse_hex_lenient, pretty_hex, HexError,
};

//! # M-Bus Long Frame Codec
//!
//! This module decodes and encodes the M-Bus (EN 13757-2) long frames that carry
//! the smart meter's push data over the customer interface. It leverages the
//! `nom` crate for parsing.
//!
//! A long frame is laid out as:
//!
//! ```text
//! 0x68 | L | L | 0x68 | C | A | CI | data (L - 3 bytes) | checksum | 0x16
//! ```
//!
//! The checksum is the 8-bit sum of C, A, CI and the data bytes.
//!
//! ## Usage
//!
//! ```rust
//! use smartmeter_rs::mbus::frame::{pack_frame, parse_frame, verify_frame, MBusFrame};
//!
//! let frame = MBusFrame::new(0x53, 0xFF, 0x00, vec![0x01, 0x67]);
//! let bytes = pack_frame(&frame);
//! let (_rest, parsed) = parse_frame(&bytes).unwrap();
//! assert_eq!(parsed, frame);
//! assert!(verify_frame(&parsed).is_ok());
//! ```

use crate::constants::{
    MBUS_FRAME_FIXED_HEADER_LENGTH, MBUS_FRAME_HEADER_LENGTH, MBUS_FRAME_LONG_START,
    MBUS_FRAME_STOP, MBUS_FRAME_TRAILER_LENGTH,
};
use crate::mbus::envelope::FrameError;
use nom::bytes::complete::{tag, take};
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err as NomErr, IResult};

/// Represents an M-Bus long frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

impl MBusFrame {
    /// Builds a frame and fills in its checksum.
    pub fn new(control: u8, address: u8, control_information: u8, data: Vec<u8>) -> Self {
        let mut frame = MBusFrame {
            control,
            address,
            control_information,
            data,
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }

    /// Value of the L field.
    pub fn length_field(&self) -> usize {
        self.data.len() + MBUS_FRAME_FIXED_HEADER_LENGTH
    }

    /// Bytes the frame occupies on the wire.
    pub fn wire_length(&self) -> usize {
        MBUS_FRAME_HEADER_LENGTH + self.length_field() + MBUS_FRAME_TRAILER_LENGTH
    }
}

/// Uses the `nom` crate to parse one long frame from the front of a byte slice.
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], MBusFrame> {
    let (input, length) = parse_long_header(input)?;
    let (input, control) = be_u8(input)?;
    let (input, address) = be_u8(input)?;
    let (input, control_information) = be_u8(input)?;
    let payload_len = (length as usize).saturating_sub(MBUS_FRAME_FIXED_HEADER_LENGTH);
    let (input, data) = take(payload_len)(input)?;
    let (input, checksum) = be_u8(input)?;
    let (input, _) = tag(&[MBUS_FRAME_STOP][..])(input)?;
    Ok((
        input,
        MBusFrame {
            control,
            address,
            control_information,
            data: data.to_vec(),
            checksum,
        },
    ))
}

/// Parses `0x68 L L 0x68` and returns L.
fn parse_long_header(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, _) = tag(&[MBUS_FRAME_LONG_START][..])(input)?;
    let (input, length1) = be_u8(input)?;
    let (input, length2) = be_u8(input)?;
    if length1 != length2 || (length1 as usize) < MBUS_FRAME_FIXED_HEADER_LENGTH {
        return Err(NomErr::Error(NomError::new(input, ErrorKind::Verify)));
    }
    let (input, _) = tag(&[MBUS_FRAME_LONG_START][..])(input)?;
    Ok((input, length1))
}

/// Packs a long frame into its wire representation.
pub fn pack_frame(frame: &MBusFrame) -> Vec<u8> {
    let length = frame.length_field() as u8;
    let mut data = Vec::with_capacity(frame.wire_length());
    data.push(MBUS_FRAME_LONG_START);
    data.push(length);
    data.push(length);
    data.push(MBUS_FRAME_LONG_START);
    data.push(frame.control);
    data.push(frame.address);
    data.push(frame.control_information);
    data.extend_from_slice(&frame.data);
    data.push(frame.checksum);
    data.push(MBUS_FRAME_STOP);
    data
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), FrameError> {
    let calculated = calculate_checksum(frame);
    if frame.checksum != calculated {
        return Err(FrameError::InvalidChecksum {
            expected: frame.checksum,
            calculated,
        });
    }
    Ok(())
}

/// Calculates the checksum of an M-Bus frame.
fn calculate_checksum(frame: &MBusFrame) -> u8 {
    let mut checksum: u8 = 0;
    checksum = checksum.wrapping_add(frame.control);
    checksum = checksum.wrapping_add(frame.address);
    checksum = checksum.wrapping_add(frame.control_information);
    for byte in &frame.data {
        checksum = checksum.wrapping_add(*byte);
    }
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_frame() {
        let frame_data = &[
            0x68, 0x08, 0x08, 0x68, 0x53, 0x01, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x63, 0x16,
        ];
        let (rest, frame) = parse_frame(frame_data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(frame.control, 0x53);
        assert_eq!(frame.address, 0x01);
        assert_eq!(frame.control_information, 0x00);
        assert_eq!(frame.data, &[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(frame.checksum, 0x63);
        assert!(verify_frame(&frame).is_ok());
    }

    #[test]
    fn test_parse_leaves_following_frame() {
        let mut bytes = pack_frame(&MBusFrame::new(0x53, 0xFF, 0x00, vec![0xAA]));
        bytes.extend_from_slice(&[0x68, 0x03]);
        let (rest, frame) = parse_frame(&bytes).unwrap();
        assert_eq!(frame.data, vec![0xAA]);
        assert_eq!(rest, &[0x68, 0x03]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let frame_data = &[0x68, 0x04, 0x05, 0x68, 0x53, 0x01, 0x00, 0x01, 0x55, 0x16];
        assert!(parse_frame(frame_data).is_err());
    }

    #[test]
    fn test_missing_stop_byte_rejected() {
        let mut bytes = pack_frame(&MBusFrame::new(0x53, 0xFF, 0x00, vec![0x01]));
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = pack_frame(&MBusFrame::new(0x53, 0xFF, 0x00, vec![1, 2, 3, 4]));
        assert!(parse_frame(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = MBusFrame::new(0x53, 0xFF, 0x00, vec![0x10, 0x20]);
        frame.checksum = frame.checksum.wrapping_add(1);
        assert!(matches!(
            verify_frame(&frame),
            Err(FrameError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn test_pack_layout() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x11, vec![0x01, 0x67]);
        let bytes = pack_frame(&frame);
        assert_eq!(bytes.len(), frame.wire_length());
        assert_eq!(&bytes[..4], &[0x68, 0x05, 0x05, 0x68]);
        assert_eq!(bytes[bytes.len() - 1], 0x16);
    }
}

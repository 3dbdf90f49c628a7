//! # Frame Splitter
//!
//! Turns one raw window read from the customer interface into a [`FrameEnvelope`]:
//! the validated M-Bus wrapper plus the DLMS security parameters and the ciphertext.
//!
//! The meter pushes one ciphered `general-glo-ciphering` APDU split over two long
//! frames. The first frame carries the security header and most of the ciphertext,
//! the continuation frame carries the rest:
//!
//! ```text
//! 68 FA FA 68 | 53 FF 00 | 01 67 | DB 08 <system title> 81 F8 20 <frame counter> <ciphertext ...> | cs 16
//! 68 14 14 68 | 53 FF 11 | 01 67 | <ciphertext ...>                                              | cs 16
//! ```
//!
//! The security length (`81 F8` = 248) counts the security control byte, the frame
//! counter and the ciphertext, so it tells how many bytes must be collected from the
//! continuation frames.

use crate::constants::{
    DLMS_GENERAL_GLO_CIPHERING, DLMS_SECURITY_HEADER_LENGTH, DLMS_SYSTEM_TITLE_LENGTH,
    MBUS_FRAME_HEADER_LENGTH, MBUS_FRAME_LONG_START, MBUS_FRAME_TRAILER_LENGTH,
    MBUS_FRAME_FIXED_HEADER_LENGTH, MBUS_TRANSPORT_HEADER_LENGTH,
};
use crate::dlms::axdr::{encode_length, parse_length};
use crate::dlms::security::{nonce, SecurityControl};
use crate::mbus::frame::{pack_frame, parse_frame, verify_frame, MBusFrame};
use crate::mbus::serial::RawWindow;
use crate::util::hex::encode_hex_upper;
use log::debug;
use nom::bytes::complete::{tag, take};
use nom::number::complete::be_u8;
use nom::IResult;
use thiserror::Error;

/// Reasons a raw window is rejected before decryption.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Wrong M-Bus start byte: 0x{0:02X}")]
    BadStartMarker(u8),

    #[error("Length bytes differ: 0x{0:02X} != 0x{1:02X}")]
    LengthMismatch(u8, u8),

    #[error("Wrong M-Bus end marker: 0x{0:02X}")]
    BadEndMarker(u8),

    #[error("Window too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Malformed long frame at offset {offset}")]
    MalformedFrame { offset: usize },

    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    InvalidChecksum { expected: u8, calculated: u8 },

    #[error("Not a ciphered APDU: tag 0x{0:02X}")]
    NotCiphered(u8),

    #[error("Malformed security header")]
    MalformedSecurityHeader,
}

/// Validated view over a raw window.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    /// `0x68 L L 0x68`
    pub mbus_start: [u8; 4],
    /// Declared length of the first frame (L field)
    pub frame_len: u8,
    pub system_title: [u8; 8],
    pub frame_counter: [u8; 4],
    pub security_control: SecurityControl,
    /// Ciphertext (including the GCM tag when the frame is authenticated)
    pub ciphertext: Vec<u8>,
}

impl FrameEnvelope {
    /// Start marker as upper-case hex, e.g. `68FAFA68`.
    pub fn mbus_start_hex(&self) -> String {
        encode_hex_upper(&self.mbus_start)
    }

    /// GCM nonce: system title followed by the frame counter.
    pub fn nonce(&self) -> [u8; 12] {
        nonce(&self.system_title, &self.frame_counter)
    }

    /// Frame counter as an integer, for logging.
    pub fn frame_counter_value(&self) -> u32 {
        u32::from_be_bytes(self.frame_counter)
    }
}

/// Security header of a `general-glo-ciphering` APDU.
struct SecurityHeader<'a> {
    system_title: [u8; 8],
    /// Bytes following the security length field
    secured_len: usize,
    security_control: SecurityControl,
    frame_counter: [u8; 4],
    ciphertext: &'a [u8],
}

/// Validates the M-Bus wrapper of `window` and extracts the crypto parameters.
///
/// The ciphertext ends where the security length of the glo-ciphering header
/// says it does. Bytes from continuation frames are appended without their
/// M-Bus header, checksum and stop byte. Slicing the window from offset 26 to
/// `6 + L` instead would yield 230 bytes that include the first frame's
/// checksum and stop byte and miss the continuation; that span does not
/// decrypt to a valid APDU. For a 282-byte EVN window the ciphertext is 243
/// bytes: 228 from the first frame and 15 from the second.
pub fn split(window: &RawWindow) -> Result<FrameEnvelope, FrameError> {
    let bytes = window.as_bytes();
    let mbus_start = check_start(bytes)?;
    let frame_len = mbus_start[1];

    let (mut rest, first) = parse_verified(bytes, 0)?;
    let payload = strip_transport_header(&first.data, MBUS_FRAME_HEADER_LENGTH)?;
    let header = parse_security_header(payload)
        .map(|(_, header)| header)
        .map_err(|_| match payload.first() {
            Some(&tag) if tag != DLMS_GENERAL_GLO_CIPHERING => FrameError::NotCiphered(tag),
            _ => FrameError::MalformedSecurityHeader,
        })?;

    let expected = header
        .secured_len
        .checked_sub(DLMS_SECURITY_HEADER_LENGTH)
        .ok_or(FrameError::MalformedSecurityHeader)?;
    let mut ciphertext = header.ciphertext.to_vec();

    // Collect the remainder from continuation frames.
    while ciphertext.len() < expected {
        let offset = bytes.len() - rest.len();
        if rest.is_empty() {
            return Err(FrameError::Truncated {
                needed: expected - ciphertext.len(),
                available: 0,
            });
        }
        check_start(rest)?;
        let (next_rest, frame) = parse_verified(rest, offset)?;
        debug!(
            "continuation frame at offset {offset}: CI 0x{:02X}, {} bytes",
            frame.control_information,
            frame.data.len()
        );
        let more = strip_transport_header(&frame.data, offset)?;
        let wanted = (expected - ciphertext.len()).min(more.len());
        ciphertext.extend_from_slice(&more[..wanted]);
        rest = next_rest;
    }
    ciphertext.truncate(expected);

    Ok(FrameEnvelope {
        mbus_start,
        frame_len,
        system_title: header.system_title,
        frame_counter: header.frame_counter,
        security_control: header.security_control,
        ciphertext,
    })
}

/// Control and address fields of the meter's push frames
const PUSH_CONTROL: u8 = 0x53;
const PUSH_ADDRESS: u8 = 0xFF;
/// CI field of the first frame and of continuation frames
const CI_FIRST: u8 = 0x00;
const CI_CONTINUATION: u8 = 0x11;
/// STSAP and DTSAP
const TRANSPORT_HEADER: [u8; 2] = [0x01, 0x67];
/// Largest L field of a long frame
const MAX_FRAME_LEN: usize = 0xFA;

/// Packs a ciphered APDU into long frames the way the meter sends it:
/// a first frame filled up to the maximum length, then continuation frames.
pub fn assemble(
    system_title: &[u8; 8],
    frame_counter: &[u8; 4],
    security_control: SecurityControl,
    ciphertext: &[u8],
) -> RawWindow {
    let mut apdu = vec![DLMS_GENERAL_GLO_CIPHERING, DLMS_SYSTEM_TITLE_LENGTH as u8];
    apdu.extend_from_slice(system_title);
    encode_length(DLMS_SECURITY_HEADER_LENGTH + ciphertext.len(), &mut apdu);
    apdu.push(security_control.bits());
    apdu.extend_from_slice(frame_counter);
    apdu.extend_from_slice(ciphertext);

    let capacity = MAX_FRAME_LEN - MBUS_FRAME_FIXED_HEADER_LENGTH - TRANSPORT_HEADER.len();
    let mut bytes = Vec::new();
    for (i, chunk) in apdu.chunks(capacity).enumerate() {
        let ci = if i == 0 { CI_FIRST } else { CI_CONTINUATION };
        let mut data = TRANSPORT_HEADER.to_vec();
        data.extend_from_slice(chunk);
        bytes.extend(pack_frame(&MBusFrame::new(PUSH_CONTROL, PUSH_ADDRESS, ci, data)));
    }
    RawWindow::from(bytes)
}

/// Checks `0x68 L L 0x68` at the front of `bytes`.
fn check_start(bytes: &[u8]) -> Result<[u8; 4], FrameError> {
    if bytes.len() < MBUS_FRAME_HEADER_LENGTH {
        return Err(FrameError::Truncated {
            needed: MBUS_FRAME_HEADER_LENGTH,
            available: bytes.len(),
        });
    }
    let start = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if start[0] != MBUS_FRAME_LONG_START {
        return Err(FrameError::BadStartMarker(start[0]));
    }
    if start[1] != start[2] {
        return Err(FrameError::LengthMismatch(start[1], start[2]));
    }
    if start[3] != MBUS_FRAME_LONG_START {
        return Err(FrameError::BadEndMarker(start[3]));
    }
    Ok(start)
}

/// Parses one long frame and verifies its checksum.
fn parse_verified(bytes: &[u8], offset: usize) -> Result<(&[u8], MBusFrame), FrameError> {
    let needed = MBUS_FRAME_HEADER_LENGTH + bytes[1] as usize + MBUS_FRAME_TRAILER_LENGTH;
    if bytes.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    let (rest, frame) = parse_frame(bytes).map_err(|_| FrameError::MalformedFrame { offset })?;
    verify_frame(&frame)?;
    Ok((rest, frame))
}

fn strip_transport_header(data: &[u8], offset: usize) -> Result<&[u8], FrameError> {
    data.get(MBUS_TRANSPORT_HEADER_LENGTH..)
        .ok_or(FrameError::MalformedFrame { offset })
}

/// `DB 08 <system title> <length> <SC> <frame counter> <ciphertext>`
fn parse_security_header(input: &[u8]) -> IResult<&[u8], SecurityHeader<'_>> {
    let (input, _) = tag(&[DLMS_GENERAL_GLO_CIPHERING][..])(input)?;
    let (input, _) = tag(&[DLMS_SYSTEM_TITLE_LENGTH as u8][..])(input)?;
    let (input, title) = take(DLMS_SYSTEM_TITLE_LENGTH)(input)?;
    let (input, secured_len) = parse_length(input)?;
    let (input, control) = be_u8(input)?;
    let (input, counter) = take(4usize)(input)?;

    let mut system_title = [0u8; 8];
    system_title.copy_from_slice(title);
    let mut frame_counter = [0u8; 4];
    frame_counter.copy_from_slice(counter);

    Ok((
        &input[input.len()..],
        SecurityHeader {
            system_title,
            secured_len,
            security_control: SecurityControl::from_bits_retain(control),
            frame_counter,
            ciphertext: input,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbus::frame::pack_frame;

    fn window_from(frames: &[MBusFrame]) -> RawWindow {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend(pack_frame(frame));
        }
        RawWindow::from(bytes)
    }

    fn ciphered_payload(secured_len: u8, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0x01, 0x67, 0xDB, 0x08];
        data.extend_from_slice(&[0x4B, 0x46, 0x4D, 0x67, 0x50, 0x00, 0x00, 0x09]);
        data.push(secured_len);
        data.push(0x30);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x2A]);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_single_frame_envelope() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 3, &[1, 2, 3]));
        let envelope = split(&window_from(&[frame])).unwrap();
        assert_eq!(envelope.ciphertext, vec![1, 2, 3]);
        assert_eq!(envelope.frame_counter_value(), 42);
        assert_eq!(envelope.security_control, SecurityControl::from_bits_retain(0x30));
        assert_eq!(&envelope.nonce()[..8], &envelope.system_title);
    }

    #[test]
    fn test_continuation_frame_appended() {
        let first = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 5, &[1, 2, 3]));
        let second = MBusFrame::new(0x53, 0xFF, 0x11, vec![0x01, 0x67, 4, 5]);
        let envelope = split(&window_from(&[first, second])).unwrap();
        assert_eq!(envelope.ciphertext, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 2, &[9, 9]));
        let mut bytes = pack_frame(&frame);
        bytes.extend_from_slice(&[0x00, 0xE5, 0x10]);
        let envelope = split(&RawWindow::from(bytes)).unwrap();
        assert_eq!(envelope.ciphertext, vec![9, 9]);
    }

    #[test]
    fn test_missing_continuation_is_truncated() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 10, &[1, 2, 3]));
        assert!(matches!(
            split(&window_from(&[frame])),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_assemble_splits_like_the_meter() {
        let title = [0x4B, 0x46, 0x4D, 0x67, 0x50, 0x00, 0x00, 0x09];
        let counter = [0x00, 0x00, 0x00, 0x23];
        let ciphertext: Vec<u8> = (0..243).map(|i| i as u8).collect();
        let window = assemble(
            &title,
            &counter,
            SecurityControl::ENCRYPTED,
            &ciphertext,
        );
        assert_eq!(window.len(), 282);
        assert_eq!(&window.as_bytes()[..4], &[0x68, 0xFA, 0xFA, 0x68]);
        assert_eq!(&window.as_bytes()[256..260], &[0x68, 0x14, 0x14, 0x68]);

        let envelope = split(&window).unwrap();
        assert_eq!(envelope.ciphertext, ciphertext);
        assert_eq!(envelope.system_title, title);
        assert_eq!(envelope.frame_counter, counter);
    }

    #[test]
    fn test_bad_start_marker() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 1, &[1]));
        let mut bytes = pack_frame(&frame);
        bytes[0] = 0x10;
        assert_eq!(
            split(&RawWindow::from(bytes)),
            Err(FrameError::BadStartMarker(0x10))
        );
    }

    #[test]
    fn test_length_mismatch() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 1, &[1]));
        let mut bytes = pack_frame(&frame);
        bytes[2] = bytes[2].wrapping_add(1);
        assert!(matches!(
            split(&RawWindow::from(bytes)),
            Err(FrameError::LengthMismatch(_, _))
        ));
    }

    #[test]
    fn test_bad_end_marker() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 1, &[1]));
        let mut bytes = pack_frame(&frame);
        bytes[3] = 0x00;
        assert_eq!(
            split(&RawWindow::from(bytes)),
            Err(FrameError::BadEndMarker(0x00))
        );
    }

    #[test]
    fn test_corrupted_checksum() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, ciphered_payload(5 + 1, &[1]));
        let mut bytes = pack_frame(&frame);
        let cs = bytes.len() - 2;
        bytes[cs] ^= 0xFF;
        assert!(matches!(
            split(&RawWindow::from(bytes)),
            Err(FrameError::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn test_unciphered_payload_rejected() {
        let frame = MBusFrame::new(0x53, 0xFF, 0x00, vec![0x01, 0x67, 0x0F, 0x80, 0x00]);
        assert_eq!(
            split(&window_from(&[frame])),
            Err(FrameError::NotCiphered(0x0F))
        );
    }
}

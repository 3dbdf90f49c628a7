//! Protocol Constants
//!
//! This module defines constants used by the EVN customer interface pipeline:
//! M-Bus link layer (EN 13757-2), DLMS/COSEM security layer (IEC 62056-5-3)
//! and the timing policy of the acquisition loop.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Link layer
// ----------------------------------------------------------------------------

/// Bytes read from the serial line per cycle (one 256-byte frame plus one 26-byte continuation)
pub const WINDOW_SIZE: usize = 282;

/// Long frame start marker
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Frame stop byte
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Header bytes before the user data: 0x68 L L 0x68
pub const MBUS_FRAME_HEADER_LENGTH: usize = 4;

/// Bytes after the user data: checksum and stop byte
pub const MBUS_FRAME_TRAILER_LENGTH: usize = 2;

/// C, A and CI fields counted in the L field
pub const MBUS_FRAME_FIXED_HEADER_LENGTH: usize = 3;

/// STSAP and DTSAP in front of the DLMS payload
pub const MBUS_TRANSPORT_HEADER_LENGTH: usize = 2;

/// Default baud rate of the customer interface
pub const DEFAULT_BAUDRATE: u32 = 2400;

// ----------------------------------------------------------------------------
// DLMS security layer
// ----------------------------------------------------------------------------

/// general-glo-ciphering APDU tag
pub const DLMS_GENERAL_GLO_CIPHERING: u8 = 0xDB;

/// System title length in bytes
pub const DLMS_SYSTEM_TITLE_LENGTH: usize = 8;

/// Frame counter length in bytes
pub const DLMS_FRAME_COUNTER_LENGTH: usize = 4;

/// Security control byte plus frame counter, counted in the security length
pub const DLMS_SECURITY_HEADER_LENGTH: usize = 1 + DLMS_FRAME_COUNTER_LENGTH;

/// Truncated GCM tag length used by DLMS security suite 0
pub const DLMS_GCM_TAG_LENGTH: usize = 12;

/// AES-128 key length in bytes
pub const AES_KEY_LENGTH: usize = 16;

// ----------------------------------------------------------------------------
// Application layer
// ----------------------------------------------------------------------------

/// data-notification APDU tag
pub const DLMS_DATA_NOTIFICATION: u8 = 0x0F;

/// Leading bytes of an accepted APDU: data-notification with high priority invoke id
pub const APDU_ACCEPTED_PREFIX: [u8; 2] = [DLMS_DATA_NOTIFICATION, 0x80];

/// COSEM date-time length in bytes
pub const COSEM_DATE_TIME_LENGTH: usize = 12;

// ----------------------------------------------------------------------------
// Acquisition policy
// ----------------------------------------------------------------------------

/// Pause before the link is flushed and reopened after a framing error
pub const RECOVERY_PAUSE: Duration = Duration::from_millis(2500);

/// Pause after a dispatched reading, matches the meter's reporting cadence
pub const CYCLE_PAUSE: Duration = Duration::from_secs(29);

/// Time without a dispatched reading after which the process gives up
pub const LINK_HEALTH_DEADLINE: Duration = Duration::from_secs(600);

/// Environment variable holding the 32 hex character decryption key
pub const ENV_DECRYPTION_KEY: &str = "EVN_SCHLUESSEL";

/// Environment variable holding the optional authentication key
pub const ENV_AUTHENTICATION_KEY: &str = "EVN_AUTH_KEY";
